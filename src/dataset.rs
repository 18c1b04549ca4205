//! # Gridded Dataset Model
//!
//! [`GridDataset`] is an in-memory copy of one NetCDF file: its dimensions,
//! variables (values decoded to `f64`) and attributes. Every transformation of the
//! clip stage consumes a dataset and returns a new one, and the result is written
//! back to NetCDF with [`GridDataset::write`].
//!
//! Floating-point variables are decoded on read: values equal to `_FillValue` or
//! `missing_value` become NaN. On write they are stored with a NaN `_FillValue`.

use crate::error::{PipelineError, Result};
use chrono::Utc;
use log::{debug, warn};
use netcdf::AttributeValue;
use netcdf::types::{FloatType, IntType, NcVariableType};
use std::path::{Path, PathBuf};

/// Latitude coordinate name used by CMIP6 files
pub const LAT: &str = "lat";
/// Longitude coordinate name used by CMIP6 files
pub const LON: &str = "lon";
/// Time coordinate name used by CMIP6 files
pub const TIME: &str = "time";

/// Attributes that describe the on-disk encoding and are rewritten on output
const ENCODING_ATTRIBUTES: [&str; 2] = ["_FillValue", "missing_value"];

/// On-disk numeric type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    F32,
    F64,
    I16,
    I32,
    I64,
}

impl StorageType {
    /// Maps a NetCDF variable type; `None` for char, string and compound types.
    pub fn from_nc(vartype: &NcVariableType) -> Option<Self> {
        match vartype {
            NcVariableType::Float(FloatType::F32) => Some(StorageType::F32),
            NcVariableType::Float(FloatType::F64) => Some(StorageType::F64),
            NcVariableType::Int(IntType::I8 | IntType::U8 | IntType::I16) => {
                Some(StorageType::I16)
            }
            NcVariableType::Int(IntType::U16 | IntType::I32) => Some(StorageType::I32),
            NcVariableType::Int(_) => Some(StorageType::I64),
            _ => None,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, StorageType::F32 | StorageType::F64)
    }
}

/// A named dimension and its length
#[derive(Debug, Clone, PartialEq)]
pub struct GridDimension {
    pub name: String,
    pub len: usize,
}

/// One variable with its values flattened in row-major order
#[derive(Debug, Clone)]
pub struct GridVariable {
    pub name: String,
    pub dimensions: Vec<String>,
    pub storage: StorageType,
    pub attributes: Vec<(String, AttributeValue)>,
    pub values: Vec<f64>,
}

impl GridVariable {
    /// Returns the attribute with the given name, if any.
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Returns the attribute as text when it is a string attribute.
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        match self.attribute(name)? {
            AttributeValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Inserts or replaces an attribute, keeping the original position.
    pub fn set_attribute(&mut self, name: &str, value: AttributeValue) {
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn has_dimension(&self, dim: &str) -> bool {
        self.dimensions.iter().any(|d| d == dim)
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d == dim)
    }
}

/// Coordinate reference system attached to a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
    pub epsg: u32,
    pub wkt: String,
}

/// Names of the x (longitude) and y (latitude) dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialDims {
    pub x: String,
    pub y: String,
}

/// In-memory copy of a NetCDF file
#[derive(Debug, Clone)]
pub struct GridDataset {
    pub source: PathBuf,
    pub dimensions: Vec<GridDimension>,
    pub variables: Vec<GridVariable>,
    pub global_attributes: Vec<(String, AttributeValue)>,
    pub crs: Option<Crs>,
    pub spatial_dims: Option<SpatialDims>,
}

impl GridDataset {
    /// Reads every numeric variable of a NetCDF file into memory.
    ///
    /// Char, string and compound variables are skipped with a warning.
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening NetCDF file: {}", path.display());
        let file = netcdf::open(path)?;

        let dimensions: Vec<GridDimension> = file
            .dimensions()
            .map(|d| GridDimension {
                name: d.name().to_string(),
                len: d.len(),
            })
            .collect();

        let mut variables = Vec::new();
        for var in file.variables() {
            let name = var.name().to_string();
            let Some(storage) = StorageType::from_nc(&var.vartype()) else {
                warn!("Skipping non-numeric variable '{}' in {}", name, path.display());
                continue;
            };

            let mut attributes = Vec::new();
            for attr in var.attributes() {
                attributes.push((attr.name().to_string(), attr.value()?));
            }

            let mut values: Vec<f64> = var.get_values::<f64, _>(..)?;
            if storage.is_float() {
                let fills: Vec<f64> = ENCODING_ATTRIBUTES
                    .iter()
                    .filter_map(|a| attributes.iter().find(|(n, _)| n == a))
                    .filter_map(|(_, v)| attribute_as_f64(v))
                    .collect();
                if !fills.is_empty() {
                    for v in values.iter_mut() {
                        if fills.iter().any(|f| *v == *f) {
                            *v = f64::NAN;
                        }
                    }
                }
                attributes.retain(|(n, _)| !ENCODING_ATTRIBUTES.contains(&n.as_str()));
            }

            variables.push(GridVariable {
                name,
                dimensions: var
                    .dimensions()
                    .iter()
                    .map(|d| d.name().to_string())
                    .collect(),
                storage,
                attributes,
                values,
            });
        }

        let mut global_attributes = Vec::new();
        for attr in file.attributes() {
            global_attributes.push((attr.name().to_string(), attr.value()?));
        }

        file.close()?;

        Ok(GridDataset {
            source: path.to_path_buf(),
            dimensions,
            variables,
            global_attributes,
            crs: None,
            spatial_dims: None,
        })
    }

    pub fn variable(&self, name: &str) -> Option<&GridVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut GridVariable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.len)
    }

    /// Values of a coordinate variable.
    pub fn coordinate(&self, name: &str) -> Result<&[f64]> {
        self.variable(name)
            .map(|v| v.values.as_slice())
            .ok_or_else(|| PipelineError::CoordinateNotFound(name.to_string()))
    }

    /// Shape of a variable as dimension lengths.
    pub fn shape_of(&self, var: &GridVariable) -> Result<Vec<usize>> {
        var.dimensions
            .iter()
            .map(|d| {
                self.dimension_len(d)
                    .ok_or_else(|| PipelineError::InvalidDimensions {
                        variable: var.name.clone(),
                        message: format!("unknown dimension '{}'", d),
                    })
            })
            .collect()
    }

    /// Keeps only the given indices (in the given order) along `dim` for every
    /// variable that uses it, and resizes the dimension.
    pub fn select_along(mut self, dim: &str, indices: &[usize]) -> Result<Self> {
        let dim_len = self
            .dimension_len(dim)
            .ok_or_else(|| PipelineError::CoordinateNotFound(dim.to_string()))?;
        if let Some(bad) = indices.iter().find(|&&i| i >= dim_len) {
            return Err(PipelineError::InvalidDimensions {
                variable: dim.to_string(),
                message: format!("index {} out of range for length {}", bad, dim_len),
            });
        }

        let shapes: Vec<Vec<usize>> = self
            .variables
            .iter()
            .map(|v| self.shape_of(v))
            .collect::<Result<_>>()?;

        for (var, shape) in self.variables.iter_mut().zip(shapes) {
            let Some(axis) = var.axis_of(dim) else {
                continue;
            };
            var.values = take_along_axis(&var.values, &shape, axis, indices);
        }

        if let Some(d) = self.dimensions.iter_mut().find(|d| d.name == dim) {
            d.len = indices.len();
        }
        Ok(self)
    }

    /// Writes the dataset to a new netCDF-4 file, appending a `history` entry.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut file = netcdf::create(path)?;

        for dim in &self.dimensions {
            file.add_dimension(&dim.name, dim.len)?;
        }

        for (name, value) in &self.global_attributes {
            if name != "history" {
                file.add_attribute(name, value.clone())?;
            }
        }
        let entry = format!(
            "{}: clipped and converted by tdd-hotspots from {}",
            Utc::now().to_rfc3339(),
            self.source.display()
        );
        let history = match self.global_attributes.iter().find(|(n, _)| n == "history") {
            Some((_, AttributeValue::Str(previous))) => format!("{}\n{}", entry, previous),
            _ => entry,
        };
        file.add_attribute("history", history)?;

        for var in &self.variables {
            let dims: Vec<&str> = var.dimensions.iter().map(|d| d.as_str()).collect();
            match var.storage {
                StorageType::F32 => {
                    let mut out = file.add_variable::<f32>(&var.name, &dims)?;
                    out.put_attribute("_FillValue", f32::NAN)?;
                    for (name, value) in &var.attributes {
                        out.put_attribute(name, value.clone())?;
                    }
                    let data: Vec<f32> = var.values.iter().map(|&v| v as f32).collect();
                    out.put_values(&data, ..)?;
                }
                StorageType::F64 => {
                    let mut out = file.add_variable::<f64>(&var.name, &dims)?;
                    out.put_attribute("_FillValue", f64::NAN)?;
                    for (name, value) in &var.attributes {
                        out.put_attribute(name, value.clone())?;
                    }
                    out.put_values(&var.values, ..)?;
                }
                StorageType::I16 => {
                    let mut out = file.add_variable::<i16>(&var.name, &dims)?;
                    for (name, value) in &var.attributes {
                        out.put_attribute(name, value.clone())?;
                    }
                    let data: Vec<i16> = var.values.iter().map(|&v| v as i16).collect();
                    out.put_values(&data, ..)?;
                }
                StorageType::I32 => {
                    let mut out = file.add_variable::<i32>(&var.name, &dims)?;
                    for (name, value) in &var.attributes {
                        out.put_attribute(name, value.clone())?;
                    }
                    let data: Vec<i32> = var.values.iter().map(|&v| v as i32).collect();
                    out.put_values(&data, ..)?;
                }
                StorageType::I64 => {
                    let mut out = file.add_variable::<i64>(&var.name, &dims)?;
                    for (name, value) in &var.attributes {
                        out.put_attribute(name, value.clone())?;
                    }
                    let data: Vec<i64> = var.values.iter().map(|&v| v as i64).collect();
                    out.put_values(&data, ..)?;
                }
            }
        }

        Ok(())
    }
}

/// Gathers `indices` along `axis` of a row-major array with the given shape.
pub fn take_along_axis(values: &[f64], shape: &[usize], axis: usize, indices: &[usize]) -> Vec<f64> {
    let axis_len = shape[axis];
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();

    let mut out = Vec::with_capacity(outer * indices.len() * inner);
    for o in 0..outer {
        for &i in indices {
            let start = (o * axis_len + i) * inner;
            out.extend_from_slice(&values[start..start + inner]);
        }
    }
    out
}

/// Numeric value of a scalar attribute.
pub fn attribute_as_f64(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Float(v) => Some(*v as f64),
        AttributeValue::Double(v) => Some(*v),
        AttributeValue::Short(v) => Some(*v as f64),
        AttributeValue::Int(v) => Some(*v as f64),
        AttributeValue::Longlong(v) => Some(*v as f64),
        AttributeValue::Ushort(v) => Some(*v as f64),
        AttributeValue::Uint(v) => Some(*v as f64),
        AttributeValue::Uchar(v) => Some(*v as f64),
        AttributeValue::Schar(v) => Some(*v as f64),
        AttributeValue::Floats(v) if v.len() == 1 => Some(v[0] as f64),
        AttributeValue::Doubles(v) if v.len() == 1 => Some(v[0]),
        _ => None,
    }
}

/// Renders an attribute value for display.
pub fn format_attribute_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Str(s) => s.clone(),
        AttributeValue::Strs(ss) => ss.join(", "),
        AttributeValue::Float(v) => v.to_string(),
        AttributeValue::Double(v) => v.to_string(),
        AttributeValue::Short(v) => v.to_string(),
        AttributeValue::Int(v) => v.to_string(),
        AttributeValue::Longlong(v) => v.to_string(),
        other => format!("{:?}", other),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::cmip6_like;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_take_along_axis_middle() {
        // shape (2, 3, 2)
        let values: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let out = take_along_axis(&values, &[2, 3, 2], 1, &[2, 0]);
        assert_eq!(out, vec![4.0, 5.0, 0.0, 1.0, 10.0, 11.0, 6.0, 7.0]);
    }

    #[test]
    fn test_select_along_reorders_every_variable() {
        let ds = cmip6_like(2, vec![60.0, 70.0], vec![0.0, 10.0, 20.0], |t, y, x| {
            (t * 100 + y * 10 + x) as f64
        });
        let ds = ds.select_along(LON, &[2, 0]).unwrap();

        assert_eq!(ds.dimension_len(LON), Some(2));
        assert_eq!(ds.coordinate(LON).unwrap(), &[20.0, 0.0]);
        let tas = ds.variable("tas").unwrap();
        assert_eq!(tas.values, vec![2.0, 0.0, 12.0, 10.0, 102.0, 100.0, 112.0, 110.0]);
        // variables without the dimension are untouched
        assert_eq!(ds.coordinate(LAT).unwrap(), &[60.0, 70.0]);
    }

    #[test]
    fn test_select_along_rejects_out_of_range() {
        let ds = cmip6_like(1, vec![60.0], vec![0.0], |_, _, _| 0.0);
        assert!(ds.select_along(LON, &[3]).is_err());
    }

    #[test]
    fn test_write_and_reopen_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roundtrip.nc");

        let mut ds = cmip6_like(2, vec![60.0, 70.0], vec![0.0, 10.0], |t, y, x| {
            250.0 + (t + y + x) as f64
        });
        ds.variable_mut("tas").unwrap().values[0] = f64::NAN;
        ds.write(&path).unwrap();

        let back = GridDataset::open(&path).unwrap();
        assert_eq!(back.dimension_len(TIME), Some(2));
        let tas = back.variable("tas").unwrap();
        assert_eq!(tas.storage, StorageType::F32);
        assert!(tas.values[0].is_nan());
        assert_eq!(tas.values[1], 251.0);
        assert_eq!(tas.attribute_str("units"), Some("K"));
        assert!(tas.attribute("_FillValue").is_none());

        let history = back
            .global_attributes
            .iter()
            .find(|(n, _)| n == "history")
            .map(|(_, v)| format_attribute_value(v))
            .unwrap();
        assert!(history.contains("tdd-hotspots"));
    }

    #[test]
    fn test_open_decodes_fill_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fill.nc");
        {
            let mut file = netcdf::create(&path).unwrap();
            file.add_dimension("x", 3).unwrap();
            let mut var = file.add_variable::<f32>("tas", &["x"]).unwrap();
            var.put_attribute("_FillValue", 1.0e20f32).unwrap();
            var.put_values(&[271.0f32, 1.0e20, 275.0], ..).unwrap();
        }

        let ds = GridDataset::open(&path).unwrap();
        let tas = ds.variable("tas").unwrap();
        assert_eq!(tas.values[0], 271.0);
        assert!(tas.values[1].is_nan());
        assert_eq!(tas.values[2], 275.0);
    }
}
