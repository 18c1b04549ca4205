//! # NetCDF File Information Module
//!
//! Read-only structural summary of climate NetCDF files: dimensions, coordinate
//! previews, data variables, attributes, spatial extent and CRS information.
//! Nothing is written to disk.

use crate::batch::{BatchOptions, BatchReport, FileOutcome, Stage, run_batch};
use crate::dataset::{LAT, LON, StorageType, format_attribute_value};
use crate::error::Result;
use crate::storage::list_files;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Number of leading values shown per coordinate
pub const PREVIEW_LEN: usize = 5;

/// Printed when a file has no grid-mapping variable
pub const NO_CRS_NOTICE: &str =
    "No explicit CRS variable found (CMIP6 data typically use lat/lon, WGS84).";

/// Grid-mapping variable names, in lookup order
const CRS_VARIABLES: [&str; 2] = ["crs", "spatial_ref"];

/// Information about a NetCDF dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub name: String,
    pub length: usize,
    pub is_unlimited: bool,
}

/// First values of a coordinate variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatePreview {
    pub name: String,
    pub length: usize,
    pub first_values: Vec<f64>,
}

/// A non-coordinate variable and its dimensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataVariableInfo {
    pub name: String,
    pub data_type: String,
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableAttributes {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

/// Latitude/longitude bounds of the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialExtent {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// Complete information about a NetCDF file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub file_size: Option<u64>,
    pub dimensions: Vec<DimensionInfo>,
    pub coordinates: Vec<CoordinatePreview>,
    pub data_variables: Vec<DataVariableInfo>,
    pub global_attributes: BTreeMap<String, String>,
    pub variable_of_interest: Option<VariableAttributes>,
    pub extent: Option<SpatialExtent>,
    /// Attributes of the grid-mapping variable, if the file has one
    pub crs: Option<VariableAttributes>,
}

fn attributes_of(var: &netcdf::Variable) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for attr in var.attributes() {
        out.insert(attr.name().to_string(), format_attribute_value(&attr.value()?));
    }
    Ok(out)
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Extracts the structural summary of one NetCDF file.
///
/// `variable` names the variable whose attributes are listed in full.
pub fn inspect_file(path: &Path, variable: &str) -> Result<FileInfo> {
    debug!("Inspecting NetCDF file: {}", path.display());
    let file = netcdf::open(path)?;
    let file_size = std::fs::metadata(path).ok().map(|m| m.len());

    let dimensions: Vec<DimensionInfo> = file
        .dimensions()
        .map(|d| DimensionInfo {
            name: d.name().to_string(),
            length: d.len(),
            is_unlimited: d.is_unlimited(),
        })
        .collect();

    // 1-D variables named after their dimension, plus auxiliary coordinates
    // listed in any `coordinates` attribute
    let mut coordinate_names: Vec<String> = Vec::new();
    for var in file.variables() {
        let dims = var.dimensions();
        if dims.len() == 1 && dims[0].name() == var.name() {
            coordinate_names.push(var.name().to_string());
        }
    }
    for var in file.variables() {
        if let Some(attr) = var.attribute("coordinates")
            && let Ok(netcdf::AttributeValue::Str(list)) = attr.value()
        {
            for name in list.split_whitespace() {
                if file.variable(name).is_some() && !coordinate_names.iter().any(|c| c == name) {
                    coordinate_names.push(name.to_string());
                }
            }
        }
    }

    let mut coordinates = Vec::new();
    let mut data_variables = Vec::new();
    for var in file.variables() {
        let name = var.name().to_string();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let length: usize = shape.iter().product();

        if coordinate_names.contains(&name) {
            let first_values = if StorageType::from_nc(&var.vartype()).is_some() && shape.len() <= 1 {
                if shape.is_empty() {
                    var.get_values::<f64, _>(..)?
                } else {
                    var.get_values::<f64, _>(0..length.min(PREVIEW_LEN))?
                }
            } else {
                Vec::new()
            };
            coordinates.push(CoordinatePreview {
                name,
                length,
                first_values,
            });
        } else if !CRS_VARIABLES.contains(&name.as_str()) {
            data_variables.push(DataVariableInfo {
                name,
                data_type: format!("{:?}", var.vartype()),
                dimensions: var.dimensions().iter().map(|d| d.name().to_string()).collect(),
                shape,
            });
        }
    }

    let mut global_attributes = BTreeMap::new();
    for attr in file.attributes() {
        global_attributes.insert(attr.name().to_string(), format_attribute_value(&attr.value()?));
    }

    let variable_of_interest = match file.variable(variable) {
        Some(var) => Some(VariableAttributes {
            name: variable.to_string(),
            attributes: attributes_of(&var)?,
        }),
        None => None,
    };

    let extent = match (file.variable(LAT), file.variable(LON)) {
        (Some(lat), Some(lon)) => {
            let lat: Vec<f64> = lat.get_values::<f64, _>(..)?;
            let lon: Vec<f64> = lon.get_values::<f64, _>(..)?;
            match (min_max(&lat), min_max(&lon)) {
                (Some((lat_min, lat_max)), Some((lon_min, lon_max))) => Some(SpatialExtent {
                    lat_min,
                    lat_max,
                    lon_min,
                    lon_max,
                }),
                _ => None,
            }
        }
        _ => None,
    };

    let mut crs = None;
    for name in CRS_VARIABLES {
        if let Some(var) = file.variable(name) {
            crs = Some(VariableAttributes {
                name: name.to_string(),
                attributes: attributes_of(&var)?,
            });
            break;
        }
    }

    file.close()?;

    Ok(FileInfo {
        path: path.to_path_buf(),
        file_size,
        dimensions,
        coordinates,
        data_variables,
        global_attributes,
        variable_of_interest,
        extent,
        crs,
    })
}

/// Inspects a single file, or every `*.nc` file of a directory in lexical order.
///
/// Malformed files are recorded as failures in the report and skipped.
pub fn inspect_path(path: &Path, variable: &str, options: &BatchOptions) -> Result<(Vec<FileInfo>, BatchReport)> {
    let files = if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        list_files(path, "nc")?
    };

    let mut infos = Vec::with_capacity(files.len());
    let report = run_batch(Stage::Inspect, &files, options, |file| {
        infos.push(inspect_file(file, variable)?);
        Ok(FileOutcome {
            input: file.to_path_buf(),
            output: None,
            note: None,
        })
    });
    Ok((infos, report))
}

fn format_preview(values: &[f64], total: usize) -> String {
    let shown: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    if total > values.len() {
        format!("[{}] ...", shown.join(", "))
    } else {
        format!("[{}]", shown.join(", "))
    }
}

/// Short overview of a file: dimension sizes, variable counts and the shape of
/// the variable of interest.
pub fn dataset_summary(info: &FileInfo) -> Vec<String> {
    let dims: Vec<String> = info
        .dimensions
        .iter()
        .map(|d| format!("{}={}", d.name, d.length))
        .collect();
    let mut lines = vec![
        format!("Dimensions: {} ({})", info.dimensions.len(), dims.join(", ")),
        format!(
            "Variables: {} ({} coordinates, {} data)",
            info.coordinates.len() + info.data_variables.len(),
            info.coordinates.len(),
            info.data_variables.len()
        ),
    ];

    let target = info
        .variable_of_interest
        .as_ref()
        .and_then(|v| info.data_variables.iter().find(|d| d.name == v.name));
    if let Some(var) = target {
        let shape: Vec<String> = var.shape.iter().map(|n| n.to_string()).collect();
        lines.push(format!(
            "{}: ({}) shape ({})",
            var.name,
            var.dimensions.join(", "),
            shape.join(", ")
        ));
    }
    lines
}

/// Print file info in human-readable format
pub fn print_file_info_human(info: &FileInfo) {
    println!("{}", "=".repeat(80));
    println!(
        "FILE: {}",
        info.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| info.path.display().to_string())
    );
    if let Some(size) = info.file_size {
        println!("Size: {:.2} MB", size as f64 / 1_048_576.0);
    }

    println!("\n--- DATASET SUMMARY ---");
    for line in dataset_summary(info) {
        println!("{}", line);
    }

    println!("\n--- DIMENSIONS ---");
    for dim in &info.dimensions {
        println!(
            "{}: {}{}",
            dim.name,
            dim.length,
            if dim.is_unlimited { " (unlimited)" } else { "" }
        );
    }

    println!("\n--- COORDINATES ---");
    for coord in &info.coordinates {
        println!("{}: {}", coord.name, format_preview(&coord.first_values, coord.length));
    }

    println!("\n--- VARIABLES ---");
    for var in &info.data_variables {
        println!("{}: ({})", var.name, var.dimensions.join(", "));
    }

    println!("\n--- GLOBAL ATTRIBUTES ---");
    for (name, value) in &info.global_attributes {
        println!("{}: {}", name, value);
    }

    if let Some(var) = &info.variable_of_interest {
        println!("\n--- '{}' VARIABLE ATTRIBUTES ---", var.name);
        for (name, value) in &var.attributes {
            println!("{}: {}", name, value);
        }
    }

    if let Some(extent) = &info.extent {
        println!("\n--- SPATIAL EXTENT ---");
        println!("Latitude range : {} to {}", extent.lat_min, extent.lat_max);
        println!("Longitude range: {} to {}", extent.lon_min, extent.lon_max);
    }

    println!("\n--- PROJECTION / CRS INFO ---");
    match &info.crs {
        Some(crs) => {
            println!("Variable: {}", crs.name);
            for (name, value) in &crs.attributes {
                println!("{}: {}", name, value);
            }
        }
        None => println!("{}", NO_CRS_NOTICE),
    }
}

/// Print file info in JSON format
pub fn print_file_info_json(infos: &[FileInfo]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(infos)?);
    Ok(())
}

/// Print file info in YAML format
pub fn print_file_info_yaml(infos: &[FileInfo]) -> Result<()> {
    println!("{}", serde_yaml::to_string(infos)?);
    Ok(())
}

/// CSV rows of the data variables of every file.
pub fn file_info_csv(infos: &[FileInfo]) -> String {
    let mut out = String::from("file,variable_name,data_type,dimensions,shape\n");
    for info in infos {
        for var in &info.data_variables {
            out.push_str(&format!(
                "{},{},{},\"{}\",\"{}\"\n",
                info.path.display(),
                var.name,
                var.data_type,
                var.dimensions.join(";"),
                var.shape
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(";")
            ));
        }
    }
    out
}

/// Print file info in CSV format (variables only)
pub fn print_file_info_csv(infos: &[FileInfo]) {
    print!("{}", file_info_csv(infos));
}
