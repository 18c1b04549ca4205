//! # CLI Module
//!
//! This module provides the command-line interface for tdd-hotspots, including:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the TDD_HOTSPOTS_ prefix
//! - Merging of CLI, environment and configuration-file values
//! - One subcommand per pipeline stage plus `run` for the whole chain

use crate::error::{PipelineError, Result};
use crate::hotspot::validate_percentile;
use crate::input::{ClipConfig, PipelineConfig};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Thawing degree days and hotspot rasters from CMIP6 temperature data
#[derive(Parser, Debug)]
#[command(name = "tdd-hotspots")]
#[command(about = "Compute thawing degree days and percentile hotspots from CMIP6 NetCDF files")]
#[command(version)]
#[command(long_about = "
tdd-hotspots turns daily CMIP6 near-surface air temperature (tas) NetCDF files into
annual thawing degree day (TDD) GeoTIFFs and percentile hotspot masks.

STAGES:
  1. inspect      Print the structure and metadata of NetCDF files
  2. clip         Normalize longitude, convert K to °C, tag EPSG:4326 and clip
                  to a study-area boundary
  3. degree-days  Sum positive daily temperatures per year into float32 GeoTIFFs
  4. hotspots     Mark pixels at or above a percentile as uint8 GeoTIFFs

EXAMPLES:
  # Inspect a directory of raw files
  tdd-hotspots inspect data/CMIP6/GFDL-ESM4/SSP585

  # Clip to the study area
  tdd-hotspots clip data/cmip6 -b north_slope.shp -o output/clipped

  # Annual TDD rasters
  tdd-hotspots degree-days output/clipped -o output/tdd

  # 90th percentile hotspots
  tdd-hotspots hotspots output/tdd -o output/hotspots -p 90

  # Whole chain from a configuration file
  tdd-hotspots run --config pipeline.yaml

  # Generate a configuration template
  tdd-hotspots template full --format yaml > pipeline.yaml
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for reports and inspection results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "TDD_HOTSPOTS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print structural metadata of NetCDF files
    #[command(long_about = "
Print dimensions, coordinate previews, data variables, global attributes, the
attributes of the temperature variable, the spatial extent and CRS information
of a NetCDF file or of every *.nc file in a directory. Nothing is written.

EXAMPLES:
  tdd-hotspots inspect data/cmip6
  tdd-hotspots inspect tas_day_GFDL-ESM4_ssp585_2045.nc --output-format json
")]
    Inspect {
        /// NetCDF file or directory
        #[arg(value_name = "PATH", env = "TDD_HOTSPOTS_INSPECT_INPUT")]
        path: Option<PathBuf>,

        /// Variable whose attributes are listed
        #[arg(short = 'n', long, env = "TDD_HOTSPOTS_VARIABLE")]
        variable: Option<String>,
    },

    /// Normalize, convert and clip NetCDF files to a boundary
    #[command(long_about = "
For every *.nc file of the input directory: remap 0–360° longitudes to −180–180°,
convert the temperature variable from Kelvin to degrees Celsius, tag EPSG:4326
and clip to the boundary polygons. Results are written as <stem>_CLIPPED_C.nc.

EXAMPLES:
  tdd-hotspots clip data/cmip6 -b north_slope.shp -o output/clipped
  tdd-hotspots clip --config pipeline.yaml --fail-fast
")]
    Clip {
        /// Directory of raw NetCDF files
        #[arg(value_name = "INPUT_DIR", env = "TDD_HOTSPOTS_CLIP_INPUT")]
        input_dir: Option<PathBuf>,

        /// Boundary polygon file (Shapefile, GeoPackage, GeoJSON)
        #[arg(short, long, env = "TDD_HOTSPOTS_BOUNDARY")]
        boundary: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, env = "TDD_HOTSPOTS_CLIP_OUTPUT")]
        output_dir: Option<PathBuf>,

        /// Temperature variable name
        #[arg(short = 'n', long, env = "TDD_HOTSPOTS_VARIABLE")]
        variable: Option<String>,

        /// Stop at the first failing file
        #[arg(long, env = "TDD_HOTSPOTS_FAIL_FAST")]
        fail_fast: bool,
    },

    /// Compute annual thawing degree days as GeoTIFFs
    #[command(long_about = "
For every clipped *.nc file: sum the positive daily temperatures of each cell and
write a float32, LZW-compressed, EPSG:4326 GeoTIFF named TDD_<year>.tif, where
<year> is the first 20xx in the file name.

EXAMPLES:
  tdd-hotspots degree-days output/clipped -o output/tdd
  tdd-hotspots degree-days output/clipped -o output/tdd --spacing-tolerance 0.001
")]
    DegreeDays {
        /// Directory of clipped NetCDF files
        #[arg(value_name = "INPUT_DIR", env = "TDD_HOTSPOTS_TDD_INPUT")]
        input_dir: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, env = "TDD_HOTSPOTS_TDD_OUTPUT")]
        output_dir: Option<PathBuf>,

        /// Temperature variable name
        #[arg(short = 'n', long, env = "TDD_HOTSPOTS_VARIABLE")]
        variable: Option<String>,

        /// Relative tolerance on coordinate spacing
        #[arg(long, value_parser = parse_tolerance, env = "TDD_HOTSPOTS_SPACING_TOLERANCE")]
        spacing_tolerance: Option<f64>,

        /// Stop at the first failing file
        #[arg(long, env = "TDD_HOTSPOTS_FAIL_FAST")]
        fail_fast: bool,
    },

    /// Binarize TDD rasters at a percentile threshold
    #[command(long_about = "
For every *.tif file: compute the percentile of the valid pixels (linear
interpolation) and write a uint8 GeoTIFF named TDD_hotspot_<year>.tif with 1 where
the value is at or above the threshold and 0 elsewhere.

EXAMPLES:
  tdd-hotspots hotspots output/tdd -o output/hotspots
  tdd-hotspots hotspots output/tdd -o output/hotspots -p 90
")]
    Hotspots {
        /// Directory of TDD GeoTIFFs
        #[arg(value_name = "INPUT_DIR", env = "TDD_HOTSPOTS_HOTSPOT_INPUT")]
        input_dir: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, env = "TDD_HOTSPOTS_HOTSPOT_OUTPUT")]
        output_dir: Option<PathBuf>,

        /// Percentile threshold, exclusive range (0, 100)
        #[arg(short, long, value_parser = parse_percentile, env = "TDD_HOTSPOTS_PERCENTILE")]
        percentile: Option<f64>,

        /// Stop at the first failing file
        #[arg(long, env = "TDD_HOTSPOTS_FAIL_FAST")]
        fail_fast: bool,
    },

    /// Run every configured stage from a configuration file
    #[command(long_about = "
Run the stages configured in the file given with --config: inspect (optional),
clip, degree-days and hotspots. The output directory of each stage is the default
input of the next one.

EXAMPLES:
  tdd-hotspots run --config pipeline.yaml
  TDD_HOTSPOTS_CONFIG=pipeline.json tdd-hotspots run --fail-fast
")]
    Run {
        /// Stop each stage at its first failing file
        #[arg(long, env = "TDD_HOTSPOTS_FAIL_FAST")]
        fail_fast: bool,
    },

    /// Validate a configuration file
    #[command(long_about = "
Validate a configuration file without processing anything: syntax, existence of
input directories and of the boundary file, percentile range and spacing
tolerance.

EXAMPLES:
  tdd-hotspots validate pipeline.yaml
  tdd-hotspots validate --config pipeline.json --detailed
")]
    Validate {
        /// Configuration file to validate
        config_file: Option<PathBuf>,

        /// Print the resolved configuration
        #[arg(long)]
        detailed: bool,
    },

    /// Generate configuration templates
    #[command(long_about = "
Generate configuration file templates.

Available templates:
• basic: clip, degree days and hotspots chained through their output directories
• full: every section and option, including inspect

EXAMPLES:
  tdd-hotspots template basic
  tdd-hotspots template full --format yaml -o pipeline.yaml
")]
    Template {
        /// Template type to generate
        #[arg(value_enum)]
        template_type: TemplateType,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration format
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for bash, zsh, fish, and PowerShell.

EXAMPLES:
  tdd-hotspots completions bash > ~/.bash_completion.d/tdd-hotspots
  tdd-hotspots completions zsh -o _tdd-hotspots
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
    /// CSV output (where applicable)
    Csv,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum TemplateType {
    /// Clip, degree days and hotspots
    Basic,
    /// Every section and option
    Full,
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON configuration format
    Json,
    /// YAML configuration format
    Yaml,
}

/// Parse a percentile in the open interval (0, 100)
fn parse_percentile(s: &str) -> std::result::Result<f64, String> {
    let p = s
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("Invalid percentile '{}'", s))?;
    validate_percentile(p).map_err(|e| e.to_string())
}

/// Parse a strictly positive tolerance
fn parse_tolerance(s: &str) -> std::result::Result<f64, String> {
    let t = s
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("Invalid tolerance '{}'", s))?;
    if t.is_finite() && t > 0.0 {
        Ok(t)
    } else {
        Err("Tolerance must be positive".to_string())
    }
}

/// Picks the command-line value (which already includes the environment), then
/// the configuration-file value.
fn pick<T>(cli: Option<T>, file: Option<T>, name: &str) -> Result<T> {
    cli.or(file).ok_or_else(|| {
        PipelineError::InvalidConfig(format!(
            "{} is required (argument, environment variable or configuration file)",
            name
        ))
    })
}

/// Loads the configuration file if one was given, otherwise the defaults.
pub fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_file(p),
        None => Ok(PipelineConfig::default()),
    }
}

/// Variable name: argument/environment, then configuration file.
pub fn resolve_variable(cli: Option<String>, config: &PipelineConfig) -> String {
    cli.unwrap_or_else(|| config.variable.clone())
}

pub fn resolve_inspect(path: Option<PathBuf>, config: &PipelineConfig) -> Result<PathBuf> {
    pick(path, config.inspect.as_ref().map(|i| i.input.clone()), "inspect path")
}

pub fn resolve_clip(
    input_dir: Option<PathBuf>,
    boundary: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    config: &PipelineConfig,
) -> Result<ClipConfig> {
    let base = config.clip.as_ref();
    Ok(ClipConfig {
        input_dir: pick(input_dir, base.map(|c| c.input_dir.clone()), "clip input directory")?,
        boundary: pick(boundary, base.map(|c| c.boundary.clone()), "boundary")?,
        output_dir: pick(output_dir, base.map(|c| c.output_dir.clone()), "clip output directory")?,
    })
}

/// Input and output directories of the degree-day stage
pub fn resolve_degree_days(
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    config: &PipelineConfig,
) -> Result<(PathBuf, PathBuf)> {
    Ok((
        pick(input_dir, config.degree_days_input(), "degree-days input directory")?,
        pick(
            output_dir,
            config.degree_days.as_ref().map(|d| d.output_dir.clone()),
            "degree-days output directory",
        )?,
    ))
}

/// Input and output directories of the hotspot stage
pub fn resolve_hotspots(
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    config: &PipelineConfig,
) -> Result<(PathBuf, PathBuf)> {
    Ok((
        pick(input_dir, config.hotspots_input(), "hotspots input directory")?,
        pick(
            output_dir,
            config.hotspots.as_ref().map(|h| h.output_dir.clone()),
            "hotspots output directory",
        )?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{DegreeDaysConfig, HotspotConfig};

    #[test]
    fn test_parse_percentile() {
        assert_eq!(parse_percentile("85").unwrap(), 85.0);
        assert_eq!(parse_percentile(" 97.5 ").unwrap(), 97.5);
        assert!(parse_percentile("0").is_err());
        assert!(parse_percentile("100").is_err());
        assert!(parse_percentile("abc").is_err());
    }

    #[test]
    fn test_parse_tolerance() {
        assert_eq!(parse_tolerance("0.001").unwrap(), 0.001);
        assert!(parse_tolerance("0").is_err());
        assert!(parse_tolerance("-1").is_err());
        assert!(parse_tolerance("inf").is_err());
    }

    #[test]
    fn test_cli_values_override_config() {
        let config = PipelineConfig::basic_template();
        let clip = resolve_clip(
            Some(PathBuf::from("/other/input")),
            None,
            None,
            &config,
        )
        .unwrap();
        assert_eq!(clip.input_dir, PathBuf::from("/other/input"));
        assert_eq!(clip.boundary, PathBuf::from("data/boundary.shp"));
        assert_eq!(clip.output_dir, PathBuf::from("output/clipped"));
    }

    #[test]
    fn test_missing_values_are_reported() {
        let config = PipelineConfig::default();
        let err = resolve_clip(Some(PathBuf::from("in")), None, Some(PathBuf::from("out")), &config)
            .unwrap_err();
        assert!(err.to_string().contains("boundary"));
        assert!(resolve_inspect(None, &config).is_err());
    }

    #[test]
    fn test_stage_inputs_chain_through_config() {
        let mut config = PipelineConfig::basic_template();
        let (input, output) = resolve_degree_days(None, None, &config).unwrap();
        assert_eq!(input, PathBuf::from("output/clipped"));
        assert_eq!(output, PathBuf::from("output/tdd"));

        let (input, _) = resolve_hotspots(None, None, &config).unwrap();
        assert_eq!(input, PathBuf::from("output/tdd"));

        config.degree_days = Some(DegreeDaysConfig {
            input_dir: Some(PathBuf::from("elsewhere")),
            output_dir: PathBuf::from("tdd2"),
            spacing_tolerance: 0.01,
        });
        config.hotspots = Some(HotspotConfig {
            input_dir: None,
            output_dir: PathBuf::from("hs"),
            percentile: 90.0,
        });
        let (input, _) = resolve_degree_days(None, None, &config).unwrap();
        assert_eq!(input, PathBuf::from("elsewhere"));
        let (input, output) = resolve_hotspots(None, None, &config).unwrap();
        assert_eq!(input, PathBuf::from("tdd2"));
        assert_eq!(output, PathBuf::from("hs"));
    }

    #[test]
    fn test_variable_resolution() {
        let mut config = PipelineConfig::default();
        assert_eq!(resolve_variable(None, &config), "tas");
        config.variable = "tasmax".to_string();
        assert_eq!(resolve_variable(None, &config), "tasmax");
        assert_eq!(resolve_variable(Some("tasmin".into()), &config), "tasmin");
    }
}
