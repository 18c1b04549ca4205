//! # Dataset Transformations
//!
//! The clip stage is a chain of [`DatasetTransform`]s applied to a
//! [`GridDataset`]. Each step takes ownership of the dataset and returns the
//! transformed one, so a step never mutates a loaded file in place.
//!
//! ## Built-in transforms
//! - [`LongitudeNormalizer`]: 0–360° longitudes to −180–180°, re-sorted ascending
//! - [`KelvinToCelsius`]: unit conversion of the temperature variable
//! - [`CrsAssigner`]: EPSG:4326 grid mapping and spatial dimension names
//! - [`BoundaryClip`]: mask and crop to the study-area boundary
//!
//! ## Example
//! ```rust,no_run
//! use tdd_hotspots::transform::{KelvinToCelsius, LongitudeNormalizer, TransformPipeline};
//! use tdd_hotspots::dataset::GridDataset;
//!
//! let mut pipeline = TransformPipeline::new();
//! pipeline.add(Box::new(LongitudeNormalizer::default()));
//! pipeline.add(Box::new(KelvinToCelsius::new("tas")));
//!
//! let ds = GridDataset::open(std::path::Path::new("tas_2045.nc"))?;
//! let converted = pipeline.execute(ds)?;
//! # Ok::<(), tdd_hotspots::error::PipelineError>(())
//! ```

use crate::boundary::{Boundary, WGS84_EPSG};
use crate::dataset::{Crs, GridDataset, GridVariable, LAT, LON, SpatialDims, StorageType};
use crate::error::{PipelineError, Result};
use gdal::spatial_ref::SpatialRef;
use log::{debug, warn};
use netcdf::AttributeValue;

/// Offset between Kelvin and degrees Celsius
pub const KELVIN_OFFSET: f64 = 273.15;

/// Name of the grid-mapping variable written by [`CrsAssigner`]
pub const GRID_MAPPING_VARIABLE: &str = "spatial_ref";

/// A transformation from one dataset to another
pub trait DatasetTransform {
    /// Transform the dataset and return the result
    fn apply(&self, ds: GridDataset) -> Result<GridDataset>;

    /// Identifier used in logs
    fn name(&self) -> &str;
}

/// Chain of transforms executed in insertion order
#[derive(Default)]
pub struct TransformPipeline<'a> {
    steps: Vec<Box<dyn DatasetTransform + 'a>>,
}

impl<'a> TransformPipeline<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, step: Box<dyn DatasetTransform + 'a>) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn execute(&self, mut ds: GridDataset) -> Result<GridDataset> {
        for step in &self.steps {
            debug!("Applying transform '{}' to {}", step.name(), ds.source.display());
            ds = step.apply(ds)?;
        }
        Ok(ds)
    }
}

/// Maps a longitude to the −180–180° convention: `((lon + 180) mod 360) − 180`
/// with a floored modulo.
pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Remaps 0–360° longitudes to −180–180° and sorts the longitude axis ascending.
///
/// Applied only when the maximum longitude exceeds 180°.
#[derive(Debug, Clone)]
pub struct LongitudeNormalizer {
    pub lon_name: String,
}

impl Default for LongitudeNormalizer {
    fn default() -> Self {
        Self {
            lon_name: LON.to_string(),
        }
    }
}

impl DatasetTransform for LongitudeNormalizer {
    fn apply(&self, mut ds: GridDataset) -> Result<GridDataset> {
        let lon = ds.coordinate(&self.lon_name)?;
        let max = lon.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max <= 180.0 {
            return Ok(ds);
        }

        let normalized: Vec<f64> = lon.iter().map(|&v| normalize_longitude(v)).collect();
        let mut order: Vec<usize> = (0..normalized.len()).collect();
        order.sort_by(|&a, &b| normalized[a].total_cmp(&normalized[b]));

        debug!(
            "Normalizing {} longitudes (max {}) in {}",
            normalized.len(),
            max,
            ds.source.display()
        );
        if let Some(var) = ds.variable_mut(&self.lon_name) {
            var.values = normalized;
        }
        ds.select_along(&self.lon_name, &order)
    }

    fn name(&self) -> &str {
        "normalize_longitude"
    }
}

/// Converts the temperature variable from Kelvin to degrees Celsius.
///
/// A dataset without the variable passes through unchanged. When the `units`
/// attribute already states Celsius the conversion is skipped.
#[derive(Debug, Clone)]
pub struct KelvinToCelsius {
    pub variable: String,
}

impl KelvinToCelsius {
    pub fn new(variable: &str) -> Self {
        Self {
            variable: variable.to_string(),
        }
    }
}

/// Whether a units string denotes degrees Celsius.
pub fn is_celsius(units: &str) -> bool {
    matches!(
        units.trim().to_ascii_lowercase().as_str(),
        "degc" | "deg_c" | "c" | "celsius" | "degrees_celsius" | "degree_celsius" | "°c"
    )
}

impl DatasetTransform for KelvinToCelsius {
    fn apply(&self, mut ds: GridDataset) -> Result<GridDataset> {
        let source = ds.source.display().to_string();
        let Some(var) = ds.variable_mut(&self.variable) else {
            debug!("No '{}' variable in {}, skipping conversion", self.variable, source);
            return Ok(ds);
        };

        if var.attribute_str("units").is_some_and(is_celsius) {
            warn!(
                "'{}' in {} is already in degrees Celsius, not converting again",
                self.variable, source
            );
            return Ok(ds);
        }

        for v in var.values.iter_mut() {
            *v -= KELVIN_OFFSET;
        }
        set_str(var, "units", "degC");
        set_str(var, "long_name", "Near-Surface Air Temperature");
        set_str(var, "standard_name", "air_temperature");
        set_str(var, "comment", "Converted from Kelvin to degrees Celsius");
        Ok(ds)
    }

    fn name(&self) -> &str {
        "kelvin_to_celsius"
    }
}

fn set_str(var: &mut GridVariable, name: &str, value: &str) {
    var.set_attribute(name, AttributeValue::Str(value.to_string()));
}

/// Tags the dataset with EPSG:4326 and names its spatial dimensions.
///
/// Adds a CF `spatial_ref` grid-mapping variable and a `grid_mapping`
/// attribute on every variable spanning both spatial dimensions.
#[derive(Debug, Clone)]
pub struct CrsAssigner {
    pub crs: Crs,
    pub x_dim: String,
    pub y_dim: String,
}

impl CrsAssigner {
    /// EPSG:4326 with `lon`/`lat` spatial dimensions.
    pub fn wgs84() -> Result<Self> {
        let srs = SpatialRef::from_epsg(WGS84_EPSG)?;
        Ok(Self {
            crs: Crs {
                epsg: WGS84_EPSG,
                wkt: srs.to_wkt()?,
            },
            x_dim: LON.to_string(),
            y_dim: LAT.to_string(),
        })
    }
}

impl DatasetTransform for CrsAssigner {
    fn apply(&self, mut ds: GridDataset) -> Result<GridDataset> {
        for dim in [&self.x_dim, &self.y_dim] {
            if ds.dimension_len(dim).is_none() {
                return Err(PipelineError::CoordinateNotFound(dim.clone()));
            }
        }

        for var in ds.variables.iter_mut() {
            if var.has_dimension(&self.x_dim) && var.has_dimension(&self.y_dim) {
                set_str(var, "grid_mapping", GRID_MAPPING_VARIABLE);
            }
        }

        ds.variables.retain(|v| v.name != GRID_MAPPING_VARIABLE);
        ds.variables.push(GridVariable {
            name: GRID_MAPPING_VARIABLE.to_string(),
            dimensions: vec![],
            storage: StorageType::I32,
            attributes: vec![
                ("crs_wkt".to_string(), AttributeValue::Str(self.crs.wkt.clone())),
                ("spatial_ref".to_string(), AttributeValue::Str(self.crs.wkt.clone())),
                (
                    "grid_mapping_name".to_string(),
                    AttributeValue::Str("latitude_longitude".to_string()),
                ),
                ("semi_major_axis".to_string(), AttributeValue::Double(6_378_137.0)),
                ("inverse_flattening".to_string(), AttributeValue::Double(298.257_223_563)),
                ("longitude_of_prime_meridian".to_string(), AttributeValue::Double(0.0)),
            ],
            values: vec![0.0],
        });

        ds.crs = Some(self.crs.clone());
        ds.spatial_dims = Some(SpatialDims {
            x: self.x_dim.clone(),
            y: self.y_dim.clone(),
        });
        Ok(ds)
    }

    fn name(&self) -> &str {
        "assign_crs"
    }
}

/// Masks cells outside the boundary and crops the grid to the inside cells.
///
/// Floating-point variables spanning both spatial dimensions receive NaN outside
/// the boundary; every variable is then cropped to the bounding rows and columns
/// of the inside cells.
pub struct BoundaryClip<'a> {
    pub boundary: &'a Boundary,
}

impl<'a> BoundaryClip<'a> {
    pub fn new(boundary: &'a Boundary) -> Self {
        Self { boundary }
    }
}

impl DatasetTransform for BoundaryClip<'_> {
    fn apply(&self, mut ds: GridDataset) -> Result<GridDataset> {
        let crs = ds.crs.as_ref().ok_or(PipelineError::MissingSpatialMetadata("CRS"))?;
        if crs.epsg != self.boundary.epsg {
            return Err(PipelineError::InvalidBoundary(format!(
                "boundary is in EPSG:{} but the dataset is in EPSG:{}",
                self.boundary.epsg, crs.epsg
            )));
        }
        let dims = ds
            .spatial_dims
            .clone()
            .ok_or(PipelineError::MissingSpatialMetadata("spatial dimensions"))?;

        let lat = ds.coordinate(&dims.y)?.to_vec();
        let lon = ds.coordinate(&dims.x)?.to_vec();
        let mask = self.boundary.mask(&lat, &lon);

        let Some((rows, cols)) = mask.bounding_window() else {
            return Err(PipelineError::NoDataInBounds(self.boundary.source.clone()));
        };
        debug!(
            "{} of {} cells inside boundary, window {}x{}",
            mask.inside_count(),
            lat.len() * lon.len(),
            rows.len(),
            cols.len()
        );

        let shapes: Vec<Vec<usize>> = ds
            .variables
            .iter()
            .map(|v| ds.shape_of(v))
            .collect::<Result<_>>()?;

        for (var, shape) in ds.variables.iter_mut().zip(shapes) {
            if !var.storage.is_float() {
                continue;
            }
            let (Some(y_axis), Some(x_axis)) = (var.axis_of(&dims.y), var.axis_of(&dims.x)) else {
                continue;
            };
            apply_mask(&mut var.values, &shape, y_axis, x_axis, |y, x| mask.is_inside(y, x));
        }

        ds.select_along(&dims.y, &rows)?.select_along(&dims.x, &cols)
    }

    fn name(&self) -> &str {
        "clip_to_boundary"
    }
}

/// Sets every element whose (y, x) position is outside to NaN.
fn apply_mask(
    values: &mut [f64],
    shape: &[usize],
    y_axis: usize,
    x_axis: usize,
    inside: impl Fn(usize, usize) -> bool,
) {
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }

    for (flat, value) in values.iter_mut().enumerate() {
        let y = (flat / strides[y_axis]) % shape[y_axis];
        let x = (flat / strides[x_axis]) % shape[x_axis];
        if !inside(y, x) {
            *value = f64::NAN;
        }
    }
}

/// The clip-stage chain: normalize longitude, convert to Celsius, tag CRS, clip.
pub fn clip_pipeline<'a>(variable: &str, boundary: &'a Boundary) -> Result<TransformPipeline<'a>> {
    let mut pipeline = TransformPipeline::new();
    pipeline.add(Box::new(LongitudeNormalizer::default()));
    pipeline.add(Box::new(KelvinToCelsius::new(variable)));
    pipeline.add(Box::new(CrsAssigner::wgs84()?));
    pipeline.add(Box::new(BoundaryClip::new(boundary)));
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::fixtures::square;
    use crate::dataset::fixtures::cmip6_like;
    use crate::dataset::TIME;

    #[test]
    fn test_normalize_longitude_range() {
        let mut lon = 0.0;
        while lon < 360.0 {
            let n = normalize_longitude(lon);
            assert!((-180.0..180.0).contains(&n), "{} -> {}", lon, n);
            lon += 0.125;
        }
        assert_eq!(normalize_longitude(180.0), -180.0);
        assert_eq!(normalize_longitude(359.0), -1.0);
        assert_eq!(normalize_longitude(0.0), 0.0);
    }

    #[test]
    fn test_normalize_longitude_idempotent() {
        for i in 0..3600 {
            let lon = i as f64 * 0.1;
            let once = normalize_longitude(lon);
            let twice = normalize_longitude(once);
            assert!((once - twice).abs() < 1e-9, "{} -> {} -> {}", lon, once, twice);
        }
    }

    #[test]
    fn test_longitude_normalizer_sorts_grid() {
        let ds = cmip6_like(1, vec![70.0], vec![0.0, 90.0, 180.0, 270.0], |_, _, x| x as f64);
        let ds = LongitudeNormalizer::default().apply(ds).unwrap();

        assert_eq!(ds.coordinate(LON).unwrap(), &[-180.0, -90.0, 0.0, 90.0]);
        // data follows its longitude: old index 2 (180°) first, then 3, 0, 1
        assert_eq!(ds.variable("tas").unwrap().values, vec![2.0, 3.0, 0.0, 1.0]);
    }

    #[test]
    fn test_longitude_normalizer_noop_on_signed_grid() {
        let ds = cmip6_like(1, vec![70.0], vec![-10.0, 0.0, 10.0], |_, _, x| x as f64);
        let ds = LongitudeNormalizer::default().apply(ds).unwrap();
        assert_eq!(ds.coordinate(LON).unwrap(), &[-10.0, 0.0, 10.0]);
    }

    #[test]
    fn test_kelvin_to_celsius_values_and_attributes() {
        let ds = cmip6_like(2, vec![70.0], vec![10.0], |t, _, _| 273.15 + t as f64);
        let ds = KelvinToCelsius::new("tas").apply(ds).unwrap();
        let tas = ds.variable("tas").unwrap();

        assert!((tas.values[0] - 0.0).abs() < 1e-9);
        assert!((tas.values[1] - 1.0).abs() < 1e-9);
        assert_eq!(tas.attribute_str("units"), Some("degC"));
        assert_eq!(tas.attribute_str("standard_name"), Some("air_temperature"));
        assert_eq!(
            tas.attribute_str("comment"),
            Some("Converted from Kelvin to degrees Celsius")
        );
    }

    #[test]
    fn test_kelvin_roundtrip_within_tolerance() {
        for k in [0.0, 180.5, 233.15, 273.15, 301.7, 330.0] {
            let c = k - KELVIN_OFFSET;
            assert!((c + KELVIN_OFFSET - k).abs() < 1e-9);
        }
    }

    #[test]
    fn test_kelvin_to_celsius_skips_missing_and_converted() {
        let ds = cmip6_like(1, vec![70.0], vec![10.0], |_, _, _| 280.0);
        let ds = KelvinToCelsius::new("pr").apply(ds).unwrap();
        assert_eq!(ds.variable("tas").unwrap().values, vec![280.0]);

        let ds = KelvinToCelsius::new("tas").apply(ds).unwrap();
        let ds = KelvinToCelsius::new("tas").apply(ds).unwrap();
        assert!((ds.variable("tas").unwrap().values[0] - 6.85).abs() < 1e-9);
    }

    #[test]
    fn test_crs_assigner_adds_grid_mapping() {
        let ds = cmip6_like(1, vec![70.0], vec![10.0], |_, _, _| 0.0);
        let ds = CrsAssigner::wgs84().unwrap().apply(ds).unwrap();

        assert_eq!(ds.crs.as_ref().unwrap().epsg, 4326);
        assert_eq!(ds.spatial_dims.as_ref().unwrap().x, LON);
        let mapping = ds.variable(GRID_MAPPING_VARIABLE).unwrap();
        assert!(mapping.attribute_str("crs_wkt").unwrap().contains("WGS"));
        assert_eq!(
            ds.variable("tas").unwrap().attribute_str("grid_mapping"),
            Some(GRID_MAPPING_VARIABLE)
        );
        assert!(ds.variable(TIME).unwrap().attribute("grid_mapping").is_none());
    }

    #[test]
    fn test_clip_requires_crs() {
        let boundary = square(-160.0, 68.0, -150.0, 72.0);
        let ds = cmip6_like(1, vec![70.0], vec![-155.0], |_, _, _| 0.0);
        let result = BoundaryClip::new(&boundary).apply(ds);
        assert!(matches!(result, Err(PipelineError::MissingSpatialMetadata(_))));
    }

    #[test]
    fn test_clip_masks_and_crops() {
        let boundary = square(-158.0, 68.0, -152.0, 71.0);
        let lat: Vec<f64> = vec![66.0, 67.5, 69.0, 70.5, 72.0];
        let lon: Vec<f64> = vec![-160.0, -157.0, -155.0, -153.0, -150.0];
        let ds = cmip6_like(2, lat, lon, |t, y, x| (t * 100 + y * 10 + x) as f64);
        let ds = CrsAssigner::wgs84().unwrap().apply(ds).unwrap();
        let ds = BoundaryClip::new(&boundary).apply(ds).unwrap();

        assert_eq!(ds.coordinate(LAT).unwrap(), &[69.0, 70.5]);
        assert_eq!(ds.coordinate(LON).unwrap(), &[-157.0, -155.0, -153.0]);
        let tas = ds.variable("tas").unwrap();
        assert_eq!(tas.values.len(), 2 * 2 * 3);
        assert_eq!(tas.values[0], 21.0);
        assert_eq!(tas.values[6], 121.0);
        assert!(tas.values.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_clip_outside_boundary_is_an_error() {
        // 0-360 grid over the tropics, boundary in Alaska
        let boundary = square(-160.0, 68.0, -150.0, 72.0);
        let ds = cmip6_like(1, vec![-10.0, 0.0, 10.0], vec![0.0, 120.0, 240.0], |_, _, _| 290.0);
        let pipeline = clip_pipeline("tas", &boundary).unwrap();

        let result = pipeline.execute(ds);
        assert!(matches!(result, Err(PipelineError::NoDataInBounds(_))));
    }

    #[test]
    fn test_full_clip_pipeline_on_0_360_grid() {
        // 200° east is -160° after normalization
        let boundary = square(-162.0, 68.0, -148.0, 72.0);
        let lon: Vec<f64> = (0..36).map(|i| i as f64 * 10.0).collect();
        let lat = vec![60.0, 70.0, 80.0];
        let ds = cmip6_like(1, lat, lon, |_, _, x| 273.15 + x as f64);

        let pipeline = clip_pipeline("tas", &boundary).unwrap();
        assert_eq!(pipeline.len(), 4);
        let ds = pipeline.execute(ds).unwrap();

        assert_eq!(ds.coordinate(LAT).unwrap(), &[70.0]);
        assert_eq!(ds.coordinate(LON).unwrap(), &[-160.0, -150.0]);
        let tas = ds.variable("tas").unwrap();
        // original column 20 (200°E) and 21 (210°E), converted to Celsius
        assert!((tas.values[0] - 20.0).abs() < 1e-9);
        assert!((tas.values[1] - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_mask_generic_axes() {
        // shape (lat=2, time=1, lon=2): inside only (0, 1)
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        apply_mask(&mut values, &[2, 1, 2], 0, 2, |y, x| y == 0 && x == 1);
        assert!(values[0].is_nan());
        assert_eq!(values[1], 2.0);
        assert!(values[2].is_nan() && values[3].is_nan());
    }
}
