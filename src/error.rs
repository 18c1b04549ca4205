//! # Error Types
//!
//! Every stage of the pipeline reports failures through [`PipelineError`]. The batch
//! runner captures these per file, so one malformed input never aborts the rest of
//! a directory.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while inspecting, clipping or aggregating climate files
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Variable '{0}' not found")]
    VariableNotFound(String),

    #[error("Coordinate '{0}' not found")]
    CoordinateNotFound(String),

    #[error("Variable '{variable}' has unsupported dimensions: {message}")]
    InvalidDimensions { variable: String, message: String },

    #[error("Irregular grid along '{axis}': {message}")]
    IrregularGrid { axis: String, message: String },

    #[error("No data found in bounds of boundary {0}")]
    NoDataInBounds(PathBuf),

    #[error("Invalid boundary: {0}")]
    InvalidBoundary(String),

    #[error("Dataset has no {0} assigned")]
    MissingSpatialMetadata(&'static str),

    #[error("Percentile must be within (0, 100), got {0}")]
    PercentileOutOfRange(f64),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
