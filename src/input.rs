//! # Input Configuration Module
//!
//! Configuration of the four pipeline stages. Every directory the scripts used to
//! hardcode is an explicit field here, and [`PipelineConfig::validate`] checks
//! them before any file is processed.
//!
//! ## Configuration Structure
//!
//! - **variable**: temperature variable name (default `tas`)
//! - **fail_fast**: stop a stage at its first failing file
//! - **inspect**: directory (or file) to summarize
//! - **clip**: raw NetCDF directory, boundary file and output directory
//! - **degree_days**: clipped NetCDF directory and GeoTIFF output directory
//! - **hotspots**: TDD GeoTIFF directory, output directory and percentile
//!
//! A stage's input directory may be omitted when the previous stage is
//! configured: degree days then read the clip output and hotspots read the
//! degree-day output.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tdd_hotspots::input::PipelineConfig;
//!
//! let config = PipelineConfig::from_file("pipeline.yaml")?;
//! config.validate()?;
//!
//! let yaml = r#"
//! clip:
//!   input_dir: data/CMIP6/GFDL-ESM4/SSP585
//!   boundary: data/north_slope.shp
//!   output_dir: out/clipped
//! degree_days:
//!   output_dir: out/tdd
//! hotspots:
//!   output_dir: out/hotspots
//!   percentile: 90
//! "#;
//! let config = PipelineConfig::from_yaml(yaml)?;
//! # Ok::<(), tdd_hotspots::error::PipelineError>(())
//! ```

use crate::degree_days::DEFAULT_SPACING_TOLERANCE;
use crate::error::{PipelineError, Result};
use crate::hotspot::{DEFAULT_PERCENTILE, validate_percentile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_variable() -> String {
    "tas".to_string()
}

fn default_percentile() -> f64 {
    DEFAULT_PERCENTILE
}

fn default_tolerance() -> f64 {
    DEFAULT_SPACING_TOLERANCE
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Temperature variable processed by the clip and degree-day stages
    #[serde(default = "default_variable")]
    pub variable: String,
    /// Abort a stage on its first failing file
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspect: Option<InspectConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<ClipConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree_days: Option<DegreeDaysConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotspots: Option<HotspotConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            variable: default_variable(),
            fail_fast: false,
            inspect: None,
            clip: None,
            degree_days: None,
            hotspots: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectConfig {
    /// NetCDF file or directory of `*.nc` files
    pub input: PathBuf,
}

/// Inputs of the clip/convert stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipConfig {
    /// Directory of raw CMIP6 NetCDF files
    pub input_dir: PathBuf,
    /// Study-area polygon file (Shapefile, GeoPackage, GeoJSON)
    pub boundary: PathBuf,
    /// Destination of `<stem>_CLIPPED_C.nc` files
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegreeDaysConfig {
    /// Directory of clipped NetCDF files (defaults to the clip output)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_dir: Option<PathBuf>,
    /// Destination of `TDD_<year>.tif` files
    pub output_dir: PathBuf,
    /// Relative tolerance on coordinate spacing
    #[serde(default = "default_tolerance")]
    pub spacing_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotConfig {
    /// Directory of TDD GeoTIFFs (defaults to the degree-day output)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_dir: Option<PathBuf>,
    /// Destination of `TDD_hotspot_<year>.tif` files
    pub output_dir: PathBuf,
    /// Percentile in (0, 100)
    #[serde(default = "default_percentile")]
    pub percentile: f64,
}

impl PipelineConfig {
    /// Loads a configuration from a JSON or YAML file, chosen by extension.
    ///
    /// `.yaml` and `.yml` files are parsed as YAML, anything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(json_str: &str) -> Result<Self> {
        Ok(serde_json::from_str(json_str)?)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml_str)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Input directory of the degree-day stage, falling back to the clip output.
    pub fn degree_days_input(&self) -> Option<PathBuf> {
        let dd = self.degree_days.as_ref()?;
        dd.input_dir
            .clone()
            .or_else(|| self.clip.as_ref().map(|c| c.output_dir.clone()))
    }

    /// Input directory of the hotspot stage, falling back to the degree-day output.
    pub fn hotspots_input(&self) -> Option<PathBuf> {
        let hs = self.hotspots.as_ref()?;
        hs.input_dir
            .clone()
            .or_else(|| self.degree_days.as_ref().map(|d| d.output_dir.clone()))
    }

    /// Checks every configured stage before processing starts.
    ///
    /// Directories produced by an earlier configured stage are not required to
    /// exist yet.
    pub fn validate(&self) -> Result<()> {
        if self.variable.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "variable name must not be empty".to_string(),
            ));
        }

        if let Some(inspect) = &self.inspect {
            require_exists(&inspect.input, "inspect input")?;
        }

        if let Some(clip) = &self.clip {
            require_dir(&clip.input_dir, "clip input_dir")?;
            if !clip.boundary.is_file() {
                return Err(PipelineError::InvalidConfig(format!(
                    "boundary file {} does not exist",
                    clip.boundary.display()
                )));
            }
        }

        if let Some(dd) = &self.degree_days {
            if !(dd.spacing_tolerance.is_finite() && dd.spacing_tolerance > 0.0) {
                return Err(PipelineError::InvalidConfig(format!(
                    "spacing_tolerance must be positive, got {}",
                    dd.spacing_tolerance
                )));
            }
            let input = self.degree_days_input().ok_or_else(|| {
                PipelineError::InvalidConfig(
                    "degree_days.input_dir is required when clip is not configured".to_string(),
                )
            })?;
            if self.clip.is_none() {
                require_dir(&input, "degree_days input_dir")?;
            }
        }

        if let Some(hs) = &self.hotspots {
            validate_percentile(hs.percentile)?;
            let input = self.hotspots_input().ok_or_else(|| {
                PipelineError::InvalidConfig(
                    "hotspots.input_dir is required when degree_days is not configured"
                        .to_string(),
                )
            })?;
            if self.degree_days.is_none() {
                require_dir(&input, "hotspots input_dir")?;
            }
        }

        Ok(())
    }

    /// Minimal configuration chaining clip, degree days and hotspots.
    pub fn basic_template() -> Self {
        PipelineConfig {
            clip: Some(ClipConfig {
                input_dir: PathBuf::from("data/cmip6"),
                boundary: PathBuf::from("data/boundary.shp"),
                output_dir: PathBuf::from("output/clipped"),
            }),
            degree_days: Some(DegreeDaysConfig {
                input_dir: None,
                output_dir: PathBuf::from("output/tdd"),
                spacing_tolerance: DEFAULT_SPACING_TOLERANCE,
            }),
            hotspots: Some(HotspotConfig {
                input_dir: None,
                output_dir: PathBuf::from("output/hotspots"),
                percentile: DEFAULT_PERCENTILE,
            }),
            ..Default::default()
        }
    }

    /// Every section with every option spelled out.
    pub fn full_template() -> Self {
        PipelineConfig {
            variable: default_variable(),
            fail_fast: false,
            inspect: Some(InspectConfig {
                input: PathBuf::from("data/CMIP6/GFDL-ESM4/SSP585"),
            }),
            clip: Some(ClipConfig {
                input_dir: PathBuf::from("data/CMIP6/GFDL-ESM4/SSP585"),
                boundary: PathBuf::from("data/north_slope_borough.shp"),
                output_dir: PathBuf::from("output/clipped"),
            }),
            degree_days: Some(DegreeDaysConfig {
                input_dir: Some(PathBuf::from("output/clipped")),
                output_dir: PathBuf::from("output/TDD_GeoTIFFs"),
                spacing_tolerance: DEFAULT_SPACING_TOLERANCE,
            }),
            hotspots: Some(HotspotConfig {
                input_dir: Some(PathBuf::from("output/TDD_GeoTIFFs")),
                output_dir: PathBuf::from("output/TDD_hotspots"),
                percentile: DEFAULT_PERCENTILE,
            }),
        }
    }
}

fn require_exists(path: &Path, what: &str) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "{} {} does not exist",
            what,
            path.display()
        )))
    }
}

fn require_dir(path: &Path, what: &str) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "{} {} is not a directory",
            what,
            path.display()
        )))
    }
}
