//! # Thawing Degree Days
//!
//! Annual thawing degree days (TDD) are the sum over a year of the daily mean
//! temperatures above 0 °C:
//!
//! ```text
//! TDD(cell) = Σ_t max(tas(t, cell), 0)
//! ```
//!
//! Each clipped NetCDF file holds one year; its TDD grid is written north-up as a
//! float32 GeoTIFF in EPSG:4326. The raster geometry is derived from the
//! coordinate arrays, which must be regularly spaced.

use crate::batch::FileOutcome;
use crate::boundary::WGS84_EPSG;
use crate::dataset::{GridDataset, LAT, LON, TIME};
use crate::error::{PipelineError, Result};
use crate::raster::{RasterProfile, write_single_band};
use crate::storage::{degree_day_output_path, derive_year_label, write_atomically};
use log::debug;
use ndarray::{Array2, Array3, ArrayD, ArrayView3, Axis, Ix3, IxDyn};
use std::path::Path;

/// Default relative tolerance on coordinate spacing
pub const DEFAULT_SPACING_TOLERANCE: f64 = 1e-2;

/// Settings of the degree-day stage
#[derive(Debug, Clone)]
pub struct DegreeDayOptions {
    pub variable: String,
    pub spacing_tolerance: f64,
}

impl Default for DegreeDayOptions {
    fn default() -> Self {
        DegreeDayOptions {
            variable: "tas".to_string(),
            spacing_tolerance: DEFAULT_SPACING_TOLERANCE,
        }
    }
}

/// Sums positive values along the time axis of a (time, lat, lon) cube.
///
/// NaN steps contribute 0, so a cell masked by the clip (NaN at every step)
/// accumulates to 0 and still counts towards the hotspot percentile.
pub fn accumulate_positive(tas: ArrayView3<f64>) -> Array2<f64> {
    tas.fold_axis(Axis(0), 0.0f64, |&sum, &v| if v > 0.0 { sum + v } else { sum })
}

/// Extracts the temperature variable as a (time, lat, lon) cube.
///
/// Dimensions are permuted into that order; any other dimension must have
/// length 1 and is dropped.
pub fn temperature_cube(ds: &GridDataset, variable: &str) -> Result<Array3<f64>> {
    let var = ds
        .variable(variable)
        .ok_or_else(|| PipelineError::VariableNotFound(variable.to_string()))?;
    let shape = ds.shape_of(var)?;

    let mut array = ArrayD::from_shape_vec(IxDyn(&shape), var.values.clone())?;
    let mut names = var.dimensions.clone();
    for axis in (0..names.len()).rev() {
        if [TIME, LAT, LON].contains(&names[axis].as_str()) {
            continue;
        }
        if shape[axis] != 1 {
            return Err(PipelineError::InvalidDimensions {
                variable: variable.to_string(),
                message: format!(
                    "extra dimension '{}' has length {}, expected 1",
                    names[axis], shape[axis]
                ),
            });
        }
        array = array.index_axis_move(Axis(axis), 0);
        names.remove(axis);
    }

    let position = |dim: &str| {
        names
            .iter()
            .position(|n| n == dim)
            .ok_or_else(|| PipelineError::InvalidDimensions {
                variable: variable.to_string(),
                message: format!("missing '{}' dimension (has {:?})", dim, var.dimensions),
            })
    };
    let order = [position(TIME)?, position(LAT)?, position(LON)?];

    Ok(array.permuted_axes(IxDyn(&order)).into_dimensionality::<Ix3>()?)
}

/// Raster placement of a regular lat/lon grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    pub width: usize,
    pub height: usize,
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    /// Latitude ascends, so rows must be reversed for a north-up raster
    pub flip_rows: bool,
    /// Longitude descends, so columns must be reversed
    pub flip_cols: bool,
}

impl GridGeometry {
    /// Derives the geometry from 1-D coordinate arrays.
    ///
    /// The origin is the top-left corner at (min lon, max lat).
    ///
    /// # Errors
    ///
    /// [`PipelineError::IrregularGrid`] when an axis has fewer than two points, a
    /// zero step, or a step deviating from the first one by more than
    /// `tolerance` (relative).
    pub fn from_coordinates(lon: &[f64], lat: &[f64], tolerance: f64) -> Result<Self> {
        let dx = regular_step(LON, lon, tolerance)?;
        let dy = regular_step(LAT, lat, tolerance)?;

        let origin_x = lon.iter().copied().fold(f64::INFINITY, f64::min);
        let origin_y = lat.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(GridGeometry {
            width: lon.len(),
            height: lat.len(),
            origin_x,
            origin_y,
            pixel_width: dx.abs(),
            pixel_height: dy.abs(),
            flip_rows: dy > 0.0,
            flip_cols: dx < 0.0,
        })
    }

    pub fn geo_transform(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            -self.pixel_height,
        ]
    }

    /// Reorders a (lat, lon) grid into north-up, west-left raster order.
    pub fn orient(&self, mut grid: Array2<f64>) -> Array2<f64> {
        if self.flip_rows {
            grid.invert_axis(Axis(0));
        }
        if self.flip_cols {
            grid.invert_axis(Axis(1));
        }
        grid
    }
}

/// Signed spacing of a regularly spaced axis.
fn regular_step(axis: &str, values: &[f64], tolerance: f64) -> Result<f64> {
    let irregular = |message: String| PipelineError::IrregularGrid {
        axis: axis.to_string(),
        message,
    };

    if values.len() < 2 {
        return Err(irregular(format!(
            "{} point(s), at least 2 are needed to derive a pixel size",
            values.len()
        )));
    }

    let step = values[1] - values[0];
    if step == 0.0 || !step.is_finite() {
        return Err(irregular(format!("invalid step {}", step)));
    }

    for (i, pair) in values.windows(2).enumerate() {
        let d = pair[1] - pair[0];
        if (d - step).abs() > tolerance * step.abs() {
            return Err(irregular(format!(
                "step {} between indices {} and {} differs from {}",
                d,
                i,
                i + 1,
                step
            )));
        }
    }
    Ok(step)
}

/// Computes the TDD grid of one clipped file and writes `TDD_<year>.tif`.
pub fn process_file(path: &Path, output_dir: &Path, options: &DegreeDayOptions) -> Result<FileOutcome> {
    let year = derive_year_label(path);
    let ds = GridDataset::open(path)?;

    let cube = temperature_cube(&ds, &options.variable)?;
    let geometry =
        GridGeometry::from_coordinates(ds.coordinate(LON)?, ds.coordinate(LAT)?, options.spacing_tolerance)?;
    debug!(
        "{}: {} days on a {}x{} grid, transform {:?}",
        path.display(),
        cube.len_of(Axis(0)),
        geometry.width,
        geometry.height,
        geometry.geo_transform()
    );

    let tdd = geometry.orient(accumulate_positive(cube.view()));
    let data: Vec<f32> = tdd.iter().map(|&v| v as f32).collect();

    let profile = RasterProfile::with_epsg(geometry.width, geometry.height, geometry.geo_transform(), WGS84_EPSG)?;
    let output = degree_day_output_path(output_dir, &year);
    write_atomically(&output, |tmp| write_single_band(tmp, &profile, data))?;

    Ok(FileOutcome::written(path, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::cmip6_like;
    use crate::dataset::StorageType;
    use crate::raster::read_single_band;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn test_known_series() {
        let series = [-5.0, 2.0, 0.0, 3.5, -1.0, 10.0];
        let cube = Array3::from_shape_vec((6, 1, 1), series.to_vec()).unwrap();
        let tdd = accumulate_positive(cube.view());
        let expected: f64 = series.iter().map(|v: &f64| v.max(0.0)).sum();
        assert_eq!(tdd[[0, 0]], expected);
        assert_eq!(tdd[[0, 0]], 15.5);
    }

    #[test]
    fn test_nan_handling() {
        // cell 0: partly NaN, cell 1: all NaN, cell 2: never positive
        let cube = Array3::from_shape_vec(
            (2, 1, 3),
            vec![f64::NAN, f64::NAN, -3.0, 4.0, f64::NAN, -1.0],
        )
        .unwrap();
        let tdd = accumulate_positive(cube.view());
        assert_eq!(tdd[[0, 0]], 4.0);
        assert_eq!(tdd[[0, 1]], 0.0);
        assert_eq!(tdd[[0, 2]], 0.0);
        assert!(tdd.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_geometry_from_regular_grid() {
        let lon = [-160.0, -158.75, -157.5];
        let lat = [68.0, 69.0];
        let g = GridGeometry::from_coordinates(&lon, &lat, DEFAULT_SPACING_TOLERANCE).unwrap();
        assert_eq!(g.geo_transform(), [-160.0, 1.25, 0.0, 69.0, 0.0, -1.0]);
        assert!(g.flip_rows);
        assert!(!g.flip_cols);
    }

    #[test]
    fn test_irregular_grid_rejected() {
        let lon = [0.0, 1.0, 2.0, 4.0];
        let result = GridGeometry::from_coordinates(&lon, &[0.0, 1.0], DEFAULT_SPACING_TOLERANCE);
        assert!(matches!(result, Err(PipelineError::IrregularGrid { ref axis, .. }) if axis == "lon"));
    }

    #[test]
    fn test_single_point_axis_rejected() {
        let result = GridGeometry::from_coordinates(&[10.0, 11.0], &[70.0], DEFAULT_SPACING_TOLERANCE);
        assert!(matches!(result, Err(PipelineError::IrregularGrid { ref axis, .. }) if axis == "lat"));
    }

    #[test]
    fn test_orient_north_up() {
        let g = GridGeometry::from_coordinates(&[2.0, 1.0], &[10.0, 11.0], 1e-6).unwrap();
        let grid = array![[1.0, 2.0], [3.0, 4.0]];
        // lat ascending and lon descending: both axes reversed
        assert_eq!(g.orient(grid), array![[4.0, 3.0], [2.0, 1.0]]);
        assert_eq!(g.origin_x, 1.0);
        assert_eq!(g.origin_y, 11.0);
    }

    #[test]
    fn test_temperature_cube_permutes_and_squeezes() {
        let mut ds = cmip6_like(2, vec![60.0, 70.0], vec![0.0, 10.0, 20.0], |t, y, x| {
            (t * 100 + y * 10 + x) as f64
        });
        // reorder tas to (lat, lon, height=1, time)
        ds.dimensions.push(crate::dataset::GridDimension {
            name: "height".to_string(),
            len: 1,
        });
        let original = temperature_cube(&ds, "tas").unwrap();
        let permuted = original.view().permuted_axes([1, 2, 0]);
        let tas = ds.variable_mut("tas").unwrap();
        tas.dimensions = vec![LAT.into(), LON.into(), "height".into(), TIME.into()];
        tas.values = permuted.iter().copied().collect();

        let cube = temperature_cube(&ds, "tas").unwrap();
        assert_eq!(cube.shape(), &[2, 2, 3]);
        assert_eq!(cube, original);
        assert_eq!(cube[[1, 1, 2]], 112.0);
    }

    #[test]
    fn test_missing_variable_and_dimension() {
        let mut ds = cmip6_like(1, vec![60.0, 70.0], vec![0.0, 10.0], |_, _, _| 1.0);
        assert!(matches!(
            temperature_cube(&ds, "pr"),
            Err(PipelineError::VariableNotFound(_))
        ));

        let tas = ds.variable_mut("tas").unwrap();
        tas.dimensions = vec![TIME.into(), LAT.into()];
        tas.values.truncate(2);
        assert!(matches!(
            temperature_cube(&ds, "tas"),
            Err(PipelineError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_process_file_writes_north_up_geotiff() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("tas_2045_CLIPPED_C.nc");
        // 3 days, lat ascending; temperatures already in Celsius
        let mut ds = cmip6_like(3, vec![68.0, 69.0], vec![-160.0, -159.0, -158.0], |t, y, x| {
            (y * 10 + x) as f64 - t as f64
        });
        ds.variable_mut("tas").unwrap().storage = StorageType::F64;
        ds.write(&input).unwrap();

        let out_dir = dir.path().join("tdd");
        std::fs::create_dir(&out_dir).unwrap();
        let outcome = process_file(&input, &out_dir, &DegreeDayOptions::default()).unwrap();
        let output = outcome.output.unwrap();
        assert_eq!(output, out_dir.join("TDD_2045.tif"));

        let (profile, values) = read_single_band(&output).unwrap();
        assert_eq!((profile.width, profile.height), (3, 2));
        assert_eq!(profile.geo_transform, [-160.0, 1.0, 0.0, 69.0, 0.0, -1.0]);
        // first raster row is the northern latitude (69°, y = 1)
        // cell (y=1, x=0): 10 + 9 + 8 = 27
        assert_eq!(values[0], 27.0);
        // cell (y=0, x=0): 0 + 0 + 0 = 0 (negatives clamped)
        assert_eq!(values[3], 0.0);
        // cell (y=0, x=2): 2 + 1 + 0 = 3
        assert_eq!(values[5], 3.0);
    }
}
