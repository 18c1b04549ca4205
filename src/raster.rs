//! # GeoTIFF Output Module
//!
//! Single-band GeoTIFF reading and writing through GDAL. The degree-day stage
//! writes float32 rasters and the hotspot stage reads them back and writes uint8
//! rasters with the same geometry.
//!
//! ## Features
//!
//! - **LZW compression** on every output
//! - **Profile reuse**: [`RasterProfile`] carries size, geo-transform, CRS and
//!   nodata from a source raster to a derived one

use crate::error::{PipelineError, Result};
use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use log::debug;
use std::path::Path;

/// Size, placement and CRS of a single-band raster
#[derive(Debug, Clone, PartialEq)]
pub struct RasterProfile {
    pub width: usize,
    pub height: usize,
    /// GDAL affine transform `[origin_x, pixel_w, 0, origin_y, 0, -pixel_h]`
    pub geo_transform: [f64; 6],
    pub crs_wkt: String,
    pub no_data: Option<f64>,
}

impl RasterProfile {
    /// Profile of a geographic (EPSG code) raster.
    pub fn with_epsg(width: usize, height: usize, geo_transform: [f64; 6], epsg: u32) -> Result<Self> {
        let srs = SpatialRef::from_epsg(epsg)?;
        Ok(RasterProfile {
            width,
            height,
            geo_transform,
            crs_wkt: srs.to_wkt()?,
            no_data: None,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Writes one band of row-major `data` to a GeoTIFF at `path`.
///
/// # Arguments
///
/// * `path` - Destination file, overwritten if present
/// * `profile` - Size, transform and CRS of the output
/// * `data` - `profile.height` rows of `profile.width` pixels, north-up
///
/// # Errors
///
/// Fails when `data` does not match the profile size or GDAL cannot create the file.
pub fn write_single_band<T: GdalType + Copy>(path: &Path, profile: &RasterProfile, data: Vec<T>) -> Result<()> {
    if data.len() != profile.pixel_count() {
        return Err(PipelineError::InvalidDimensions {
            variable: path.display().to_string(),
            message: format!(
                "{} values for a {}x{} raster",
                data.len(),
                profile.width,
                profile.height
            ),
        });
    }

    debug!(
        "Writing {}x{} GeoTIFF to {}",
        profile.width,
        profile.height,
        path.display()
    );

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut options = CslStringList::new();
    options.set_name_value("COMPRESS", "LZW")?;

    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        path,
        profile.width,
        profile.height,
        1,
        &options,
    )?;
    dataset.set_geo_transform(&profile.geo_transform)?;
    if !profile.crs_wkt.is_empty() {
        dataset.set_projection(&profile.crs_wkt)?;
    }

    let mut band = dataset.rasterband(1)?;
    if let Some(no_data) = profile.no_data {
        band.set_no_data_value(Some(no_data))?;
    }
    let mut buffer = Buffer::new((profile.width, profile.height), data);
    band.write((0, 0), (profile.width, profile.height), &mut buffer)?;

    Ok(())
}

/// Reads band 1 of a raster as `f64`, with nodata pixels mapped to NaN.
pub fn read_single_band(path: &Path) -> Result<(RasterProfile, Vec<f64>)> {
    debug!("Reading raster {}", path.display());
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let geo_transform = dataset.geo_transform()?;
    let crs_wkt = dataset.projection();

    let band = dataset.rasterband(1)?;
    let no_data = band.no_data_value();
    let buffer: Buffer<f64> = band.read_as((0, 0), (width, height), (width, height), None)?;

    let mut values = buffer.data().to_vec();
    if let Some(nd) = no_data.filter(|v| !v.is_nan()) {
        for v in values.iter_mut() {
            if *v == nd {
                *v = f64::NAN;
            }
        }
    }

    Ok((
        RasterProfile {
            width,
            height,
            geo_transform,
            crs_wkt,
            no_data,
        },
        values,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdal::Metadata;
    use tempfile::tempdir;

    #[test]
    fn test_float_raster_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("TDD_2045.tif");
        let profile =
            RasterProfile::with_epsg(3, 2, [-160.0, 1.25, 0.0, 72.0, 0.0, -1.0], 4326).unwrap();
        let data = vec![0.0f32, 1.5, f32::NAN, 3.0, 4.0, 5.0];
        write_single_band(&path, &profile, data).unwrap();

        let (back, values) = read_single_band(&path).unwrap();
        assert_eq!(back.width, 3);
        assert_eq!(back.height, 2);
        assert_eq!(back.geo_transform, profile.geo_transform);
        assert!(back.crs_wkt.contains("WGS"));
        assert_eq!(values[1], 1.5);
        assert!(values[2].is_nan());
        assert_eq!(values[5], 5.0);
    }

    #[test]
    fn test_lzw_compression_is_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.tif");
        let profile = RasterProfile::with_epsg(2, 2, [0.0, 1.0, 0.0, 2.0, 0.0, -1.0], 4326).unwrap();
        write_single_band(&path, &profile, vec![0u8, 1, 1, 0]).unwrap();

        let ds = Dataset::open(&path).unwrap();
        let compression = ds.metadata_item("COMPRESSION", "IMAGE_STRUCTURE");
        assert_eq!(compression.as_deref(), Some("LZW"));
        let band = ds.rasterband(1).unwrap();
        assert_eq!(band.band_type(), gdal::raster::GdalDataType::UInt8);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.tif");
        let profile = RasterProfile::with_epsg(2, 2, [0.0, 1.0, 0.0, 2.0, 0.0, -1.0], 4326).unwrap();
        let result = write_single_band(&path, &profile, vec![0u8; 3]);
        assert!(matches!(result, Err(PipelineError::InvalidDimensions { .. })));
        assert!(!path.exists());
    }
}
