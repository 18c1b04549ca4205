//! # Local Storage Helpers
//!
//! Directory conventions shared by every stage: lexical file discovery, output
//! naming, year labels derived from file names, and atomic output writes.
//!
//! Outputs are written to a temporary path inside the destination directory and
//! only renamed to their final name once the writer succeeded, so a failed file
//! never leaves a truncated NetCDF or GeoTIFF behind.

use crate::error::{PipelineError, Result};
use log::debug;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempPath;

/// Suffix appended to clipped and converted NetCDF outputs
pub const CLIPPED_SUFFIX: &str = "_CLIPPED_C";

fn year_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"20\d{2}").expect("year pattern is a valid regex"))
}

/// Lists files in `dir` with the given extension (case-insensitive), sorted lexically.
///
/// Hidden files are skipped, including `.partial-*` leftovers of an interrupted
/// [`write_atomically`].
///
/// # Errors
///
/// Returns [`PipelineError::PathNotFound`] if `dir` is not a directory.
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::PathNotFound(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.'))
        })
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();

    debug!("Found {} *.{} files in {}", files.len(), extension, dir.display());
    Ok(files)
}

/// Creates the output directory (and parents) if it does not exist yet.
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        debug!("Creating output directory {}", dir.display());
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Derives the year label of a file: the first `20xx` substring of its name,
/// or the file stem when the name carries no such year.
///
/// ```
/// use std::path::Path;
/// use tdd_hotspots::storage::derive_year_label;
///
/// assert_eq!(derive_year_label(Path::new("tas_2045_v2.nc")), "2045");
/// assert_eq!(derive_year_label(Path::new("tas_historical.nc")), "tas_historical");
/// ```
pub fn derive_year_label(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match year_pattern().find(&name) {
        Some(m) => m.as_str().to_string(),
        None => file_stem(path),
    }
}

/// File stem as an owned string (empty if the path has none).
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<output_dir>/<stem>_CLIPPED_C.nc`
pub fn clipped_output_path(output_dir: &Path, input: &Path) -> PathBuf {
    output_dir.join(format!("{}{}.nc", file_stem(input), CLIPPED_SUFFIX))
}

/// `<output_dir>/TDD_<year>.tif`
pub fn degree_day_output_path(output_dir: &Path, year: &str) -> PathBuf {
    output_dir.join(format!("TDD_{}.tif", year))
}

/// `<output_dir>/TDD_hotspot_<year>.tif`
pub fn hotspot_output_path(output_dir: &Path, year: &str) -> PathBuf {
    output_dir.join(format!("TDD_hotspot_{}.tif", year))
}

/// Writes an output through a temporary file placed next to `target`.
///
/// The closure receives the temporary path and must create the file there. On
/// success the temporary file replaces `target`; on failure it is removed.
pub fn write_atomically<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let suffix = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let temp: TempPath = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(&suffix)
        .tempfile_in(parent)?
        .into_temp_path();

    write(&temp)?;

    temp.persist(target).map_err(|e| PipelineError::Io(e.error))?;
    debug!("Wrote {}", target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_year_label_from_name() {
        assert_eq!(derive_year_label(Path::new("tas_2045_v2.nc")), "2045");
        assert_eq!(
            derive_year_label(Path::new("/data/tas_day_GFDL_ssp585_2099.nc")),
            "2099"
        );
        // first match wins
        assert_eq!(derive_year_label(Path::new("TDD_2031_2032.tif")), "2031");
    }

    #[test]
    fn test_year_label_fallback_to_stem() {
        assert_eq!(
            derive_year_label(Path::new("tas_historical_v2.nc")),
            "tas_historical_v2"
        );
        // 19xx years are outside the 2000-2099 range
        assert_eq!(derive_year_label(Path::new("tas_1995.nc")), "tas_1995");
    }

    #[test]
    fn test_output_names() {
        let out = Path::new("/out");
        assert_eq!(
            clipped_output_path(out, Path::new("/in/tas_2045.nc")),
            PathBuf::from("/out/tas_2045_CLIPPED_C.nc")
        );
        assert_eq!(
            degree_day_output_path(out, "2045"),
            PathBuf::from("/out/TDD_2045.tif")
        );
        assert_eq!(
            hotspot_output_path(out, "2045"),
            PathBuf::from("/out/TDD_hotspot_2045.tif")
        );
    }

    #[test]
    fn test_list_files_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        for name in ["b_2031.nc", "a_2030.nc", "notes.txt", "c_2032.NC"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.nc")).unwrap();

        let files = list_files(dir.path(), "nc").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_2030.nc", "b_2031.nc", "c_2032.NC"]);
    }

    #[test]
    fn test_list_files_skips_interrupted_writes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("TDD_2045.tif"), b"x").unwrap();
        fs::write(dir.path().join(".partial-a1b2c3.tif"), b"x").unwrap();
        fs::write(dir.path().join(".hidden.tif"), b"x").unwrap();

        let files = list_files(dir.path(), "tif").unwrap();
        assert_eq!(files, vec![dir.path().join("TDD_2045.tif")]);
    }

    #[test]
    fn test_list_files_missing_dir() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            list_files(&missing, "nc"),
            Err(PipelineError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_write_atomically_success_and_failure() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.tif");

        write_atomically(&target, |tmp| {
            fs::write(tmp, b"raster")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"raster");

        let failed = dir.path().join("failed.tif");
        let result = write_atomically(&failed, |_| {
            Err(PipelineError::InvalidConfig("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(!failed.exists());
        // no leftover partial files
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".partial-")
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
