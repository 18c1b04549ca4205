//! # tdd-hotspots
//!
//! A Rust library for turning daily CMIP6 near-surface air temperature NetCDF files
//! into annual thawing-degree-day (TDD) rasters and percentile hotspot masks.
//!
//! ## Features
//!
//! - **Inspection**: dimensions, coordinates, attributes, extent and CRS of NetCDF files
//! - **Clip and convert**: longitude normalization, Kelvin to Celsius, EPSG:4326
//!   tagging and clipping to a study-area polygon
//! - **Thawing degree days**: annual sums of positive daily temperatures as
//!   float32 GeoTIFFs
//! - **Hotspots**: binary uint8 GeoTIFFs of the pixels at or above a percentile
//! - **Batch reports**: one malformed file never aborts a directory
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tdd_hotspots::{batch::BatchOptions, input::PipelineConfig, run_pipeline};
//!
//! let config = PipelineConfig::from_file("pipeline.yaml")?;
//! config.validate()?;
//!
//! let reports = run_pipeline(&config, &BatchOptions::default())?;
//! for report in &reports {
//!     println!("{}: {} files written", report.stage, report.processed.len());
//! }
//! # Ok::<(), tdd_hotspots::error::PipelineError>(())
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! variable: tas
//! clip:
//!   input_dir: data/CMIP6/GFDL-ESM4/SSP585
//!   boundary: data/north_slope_borough.shp
//!   output_dir: output/clipped
//! degree_days:
//!   output_dir: output/TDD_GeoTIFFs
//! hotspots:
//!   output_dir: output/TDD_hotspots
//!   percentile: 85
//! ```

pub mod batch;
pub mod boundary;
pub mod cli;
pub mod dataset;
pub mod degree_days;
pub mod error;
pub mod hotspot;
pub mod info;
pub mod input;
pub mod log;
pub mod raster;
pub mod storage;
pub mod transform;



use crate::batch::{BatchOptions, BatchReport, FileOutcome, Stage, run_batch};
use crate::boundary::Boundary;
use crate::dataset::GridDataset;
use crate::degree_days::DegreeDayOptions;
use crate::error::{PipelineError, Result};
use crate::input::{ClipConfig, PipelineConfig};
use crate::storage::{clipped_output_path, ensure_output_dir, list_files, write_atomically};
use crate::transform::{TransformPipeline, clip_pipeline};
use ::log::{info, warn};
use std::path::Path;

/// Clips and converts one raw NetCDF file and writes `<stem>_CLIPPED_C.nc`.
///
/// # Errors
///
/// Fails when the file cannot be read, has no `lat`/`lon` coordinates, lies
/// entirely outside the boundary, or the output cannot be written.
pub fn clip_file(path: &Path, pipeline: &TransformPipeline, output_dir: &Path) -> Result<FileOutcome> {
    let ds = GridDataset::open(path)?;
    let clipped = pipeline.execute(ds)?;

    let output = clipped_output_path(output_dir, path);
    write_atomically(&output, |tmp| clipped.write(tmp))?;
    Ok(FileOutcome::written(path, output))
}

/// Runs the clip/convert stage over every `*.nc` file of `config.input_dir`.
///
/// The boundary is loaded and reprojected once; the output directory is created
/// if needed.
///
/// # Errors
///
/// Only setup failures are returned (missing input directory, unreadable
/// boundary). Per-file failures are recorded in the report.
pub fn run_clip(config: &ClipConfig, variable: &str, options: &BatchOptions) -> Result<BatchReport> {
    let files = list_files(&config.input_dir, "nc")?;
    let boundary = Boundary::load(&config.boundary)?;
    ensure_output_dir(&config.output_dir)?;
    info!(
        "Clipping {} NetCDF file(s) from {} to {}",
        files.len(),
        config.input_dir.display(),
        config.boundary.display()
    );

    let pipeline = clip_pipeline(variable, &boundary)?;
    Ok(run_batch(Stage::Clip, &files, options, |file| {
        clip_file(file, &pipeline, &config.output_dir)
    }))
}

/// Runs the degree-day stage over every `*.nc` file of `input_dir`.
pub fn run_degree_days(
    input_dir: &Path,
    output_dir: &Path,
    stage_options: &DegreeDayOptions,
    options: &BatchOptions,
) -> Result<BatchReport> {
    let files = list_files(input_dir, "nc")?;
    ensure_output_dir(output_dir)?;
    info!(
        "Calculating TDD for {} NetCDF file(s) from {}",
        files.len(),
        input_dir.display()
    );

    Ok(run_batch(Stage::DegreeDays, &files, options, |file| {
        degree_days::process_file(file, output_dir, stage_options)
    }))
}

/// Runs the hotspot stage over every `*.tif` file of `input_dir`.
///
/// # Errors
///
/// [`PipelineError::PercentileOutOfRange`] is returned before any file is read.
pub fn run_hotspots(input_dir: &Path, output_dir: &Path, percentile: f64, options: &BatchOptions) -> Result<BatchReport> {
    let percentile = hotspot::validate_percentile(percentile)?;
    let files = list_files(input_dir, "tif")?;
    ensure_output_dir(output_dir)?;
    info!(
        "Creating {}th percentile hotspots for {} GeoTIFF(s) from {}",
        percentile,
        files.len(),
        input_dir.display()
    );

    Ok(run_batch(Stage::Hotspots, &files, options, |file| {
        hotspot::process_file(file, output_dir, percentile)
    }))
}

/// Runs every configured stage in order: inspect, clip, degree days, hotspots.
///
/// The chain stops after a stage that produced no output, since the next stage
/// would have nothing to read.
pub fn run_pipeline(config: &PipelineConfig, options: &BatchOptions) -> Result<Vec<BatchReport>> {
    config.validate()?;
    let mut reports = Vec::new();

    if let Some(inspect) = &config.inspect {
        let (_, report) = info::inspect_path(&inspect.input, &config.variable, options)?;
        reports.push(report);
    }

    if let Some(clip) = &config.clip {
        let report = run_clip(clip, &config.variable, options)?;
        let produced = !report.processed.is_empty();
        reports.push(report);
        if !produced {
            warn!("Clip stage produced no output, stopping");
            return Ok(reports);
        }
    }

    if let Some(dd) = &config.degree_days {
        let input = config.degree_days_input().ok_or_else(|| {
            PipelineError::InvalidConfig("degree_days has no input directory".to_string())
        })?;
        let stage_options = DegreeDayOptions {
            variable: config.variable.clone(),
            spacing_tolerance: dd.spacing_tolerance,
        };
        let report = run_degree_days(&input, &dd.output_dir, &stage_options, options)?;
        let produced = !report.processed.is_empty();
        reports.push(report);
        if !produced {
            warn!("Degree-day stage produced no output, stopping");
            return Ok(reports);
        }
    }

    if let Some(hs) = &config.hotspots {
        let input = config.hotspots_input().ok_or_else(|| {
            PipelineError::InvalidConfig("hotspots has no input directory".to_string())
        })?;
        reports.push(run_hotspots(&input, &hs.output_dir, hs.percentile, options)?);
    }

    Ok(reports)
}
