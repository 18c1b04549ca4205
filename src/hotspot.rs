//! # Hotspot Thresholding
//!
//! Marks the pixels of a TDD raster at or above a percentile of its valid
//! (non-NaN) pixels. The percentile uses linear interpolation between the two
//! closest ranks, `rank = p / 100 * (n - 1)`.

use crate::batch::FileOutcome;
use crate::error::{PipelineError, Result};
use crate::raster::{read_single_band, write_single_band};
use crate::storage::{derive_year_label, hotspot_output_path, write_atomically};
use log::debug;
use std::path::Path;

pub const DEFAULT_PERCENTILE: f64 = 85.0;

/// Note attached to outcomes whose raster had no valid pixel
pub const ALL_NAN_NOTE: &str = "raster has no valid pixels, hotspot mask is all zeros";

/// Checks that `p` lies in the open interval (0, 100).
pub fn validate_percentile(p: f64) -> Result<f64> {
    if p > 0.0 && p < 100.0 {
        Ok(p)
    } else {
        Err(PipelineError::PercentileOutOfRange(p))
    }
}

/// Percentile `p` (0–100) of the non-NaN values, or `None` if there are none.
///
/// `p` outside 0–100 is clamped to the minimum or maximum.
pub fn nan_percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(f64::total_cmp);

    let last = valid.len() - 1;
    let rank = (p / 100.0 * last as f64).clamp(0.0, last as f64);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(valid[lo] + (valid[hi] - valid[lo]) * frac)
}

/// 1 where `value >= threshold`, else 0; NaN pixels are 0.
pub fn binarize(values: &[f64], threshold: f64) -> Vec<u8> {
    values.iter().map(|&v| u8::from(v >= threshold)).collect()
}

/// Thresholds one TDD raster and writes `TDD_hotspot_<year>.tif`.
pub fn process_file(path: &Path, output_dir: &Path, percentile: f64) -> Result<FileOutcome> {
    let year = derive_year_label(path);
    let (mut profile, values) = read_single_band(path)?;

    let threshold = nan_percentile(&values, percentile);
    let mask = match threshold {
        Some(t) => {
            debug!("{}: p{} threshold = {}", path.display(), percentile, t);
            binarize(&values, t)
        }
        None => vec![0u8; values.len()],
    };

    profile.no_data = None;
    let output = hotspot_output_path(output_dir, &year);
    write_atomically(&output, |tmp| write_single_band(tmp, &profile, mask))?;

    let outcome = FileOutcome::written(path, output);
    Ok(match threshold {
        Some(_) => outcome,
        None => outcome.with_note(ALL_NAN_NOTE),
    })
}
