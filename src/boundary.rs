//! # Study-Area Boundary
//!
//! Loads the clip polygon(s) from an OGR vector file and computes which grid
//! cells fall inside them.
//!
//! The boundary is reprojected once to the raster CRS (EPSG:4326, longitude/latitude
//! axis order) and kept as a [`MultiPolygon`]. A cell is inside when its centre lies
//! within the polygons, the same rule GDAL applies when rasterizing without
//! `ALL_TOUCHED`.

use crate::error::{PipelineError, Result};
use gdal::Dataset;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::vector::LayerAccess;
use geo::{BoundingRect, Contains, Coord, MultiPolygon, Point, Polygon, Rect};
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// EPSG code of geographic WGS84
pub const WGS84_EPSG: u32 = 4326;

/// Clip geometry in geographic WGS84 coordinates
#[derive(Debug, Clone)]
pub struct Boundary {
    pub source: PathBuf,
    pub epsg: u32,
    pub geometry: MultiPolygon<f64>,
    pub bounds: Rect<f64>,
}

impl Boundary {
    /// Reads every polygon of the first layer of `path` and reprojects it to
    /// EPSG:4326.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened, has no layer, or holds no polygons.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::PathNotFound(path.to_path_buf()));
        }

        debug!("Loading boundary from {}", path.display());
        let dataset = Dataset::open(path)?;
        if dataset.layer_count() == 0 {
            return Err(PipelineError::InvalidBoundary(format!(
                "{} contains no vector layer",
                path.display()
            )));
        }
        let mut layer = dataset.layer(0)?;

        let mut target = SpatialRef::from_epsg(WGS84_EPSG)?;
        target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

        let transform = match layer.spatial_ref() {
            Some(mut source) => {
                source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
                Some(CoordTransform::new(&source, &target)?)
            }
            None => {
                warn!(
                    "Boundary {} has no CRS, assuming EPSG:{}",
                    path.display(),
                    WGS84_EPSG
                );
                None
            }
        };

        let mut polygons = Vec::new();
        for feature in layer.features() {
            let Some(geometry) = feature.geometry() else {
                continue;
            };
            let geometry = match &transform {
                Some(t) => geometry.transform(t)?,
                None => geometry.clone(),
            };
            collect_polygons(geometry.to_geo()?, &mut polygons);
        }

        let boundary = Self::from_polygons(path, polygons)?;
        debug!(
            "Boundary has {} polygon(s), bounds {:?}",
            boundary.geometry.0.len(),
            boundary.bounds
        );
        Ok(boundary)
    }

    /// Builds a boundary from polygons already expressed in EPSG:4326.
    pub fn from_polygons(source: &Path, polygons: Vec<Polygon<f64>>) -> Result<Self> {
        let geometry = MultiPolygon::new(polygons);
        let bounds = geometry.bounding_rect().ok_or_else(|| {
            PipelineError::InvalidBoundary(format!("{} contains no polygons", source.display()))
        })?;
        Ok(Boundary {
            source: source.to_path_buf(),
            epsg: WGS84_EPSG,
            geometry,
            bounds,
        })
    }

    /// Whether the point (lon, lat) lies inside the boundary.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let min: Coord<f64> = self.bounds.min();
        let max: Coord<f64> = self.bounds.max();
        if lon < min.x || lon > max.x || lat < min.y || lat > max.y {
            return false;
        }
        self.geometry.contains(&Point::new(lon, lat))
    }

    /// Computes the inside mask of a lat/lon grid.
    pub fn mask(&self, lat: &[f64], lon: &[f64]) -> ClipMask {
        let mut inside = Vec::with_capacity(lat.len() * lon.len());
        for &y in lat {
            for &x in lon {
                inside.push(self.contains(x, y));
            }
        }
        ClipMask {
            rows: lat.len(),
            cols: lon.len(),
            inside,
        }
    }
}

fn collect_polygons(geometry: geo::Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        geo::Geometry::Polygon(p) => out.push(p),
        geo::Geometry::MultiPolygon(mp) => out.extend(mp.0),
        geo::Geometry::GeometryCollection(gc) => {
            for g in gc.0 {
                collect_polygons(g, out);
            }
        }
        other => debug!("Ignoring non-polygon boundary geometry: {:?}", other),
    }
}

/// Inside/outside flags of a (lat, lon) grid, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct ClipMask {
    pub rows: usize,
    pub cols: usize,
    pub inside: Vec<bool>,
}

impl ClipMask {
    pub fn is_inside(&self, row: usize, col: usize) -> bool {
        self.inside[row * self.cols + col]
    }

    pub fn inside_count(&self) -> usize {
        self.inside.iter().filter(|&&b| b).count()
    }

    /// Contiguous row and column index ranges covering every inside cell, or
    /// `None` when no cell is inside.
    pub fn bounding_window(&self) -> Option<(Vec<usize>, Vec<usize>)> {
        let mut row_range: Option<(usize, usize)> = None;
        let mut col_range: Option<(usize, usize)> = None;

        for row in 0..self.rows {
            for col in 0..self.cols {
                if self.is_inside(row, col) {
                    row_range = Some(match row_range {
                        Some((lo, hi)) => (lo.min(row), hi.max(row)),
                        None => (row, row),
                    });
                    col_range = Some(match col_range {
                        Some((lo, hi)) => (lo.min(col), hi.max(col)),
                        None => (col, col),
                    });
                }
            }
        }

        match (row_range, col_range) {
            (Some((r0, r1)), Some((c0, c1))) => {
                Some(((r0..=r1).collect(), (c0..=c1).collect()))
            }
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{square, triangle};
    use super::*;
    use gdal::DriverManager;
    use gdal::vector::{FieldValue, Geometry, LayerOptions, OGRwkbGeometryType};
    use tempfile::tempdir;

    #[test]
    fn test_contains_uses_cell_centres() {
        let b = square(-160.0, 68.0, -150.0, 72.0);
        assert!(b.contains(-155.0, 70.0));
        assert!(!b.contains(-149.0, 70.0));
        assert!(!b.contains(-155.0, 73.0));
    }

    #[test]
    fn test_mask_and_window() {
        let b = triangle(0.0, 0.0, 10.0);
        let lat = [1.0, 5.0, 9.0, 20.0];
        let lon = [1.0, 5.0, 9.0, 20.0];
        let mask = b.mask(&lat, &lon);

        assert!(mask.is_inside(0, 0));
        assert!(mask.is_inside(0, 2));
        assert!(!mask.is_inside(2, 2));
        assert!(!mask.is_inside(3, 3));

        let (rows, cols) = mask.bounding_window().unwrap();
        assert_eq!(rows, vec![0, 1, 2]);
        assert_eq!(cols, vec![0, 1, 2]);
    }

    #[test]
    fn test_window_empty_when_outside() {
        let b = square(-160.0, 68.0, -150.0, 72.0);
        let mask = b.mask(&[10.0, 20.0], &[10.0, 20.0]);
        assert_eq!(mask.inside_count(), 0);
        assert!(mask.bounding_window().is_none());
    }

    #[test]
    fn test_empty_polygon_list_is_invalid() {
        let result = Boundary::from_polygons(Path::new("empty.shp"), vec![]);
        assert!(matches!(result, Err(PipelineError::InvalidBoundary(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Boundary::load(Path::new("/definitely/not/here.shp"));
        assert!(matches!(result, Err(PipelineError::PathNotFound(_))));
    }

    /// Writes one polygon to a single-layer Shapefile, optionally with a CRS.
    fn write_shapefile(path: &Path, srs: Option<&SpatialRef>, geometry: Geometry) {
        let driver = DriverManager::get_driver_by_name("ESRI Shapefile").unwrap();
        let mut ds = driver.create_vector_only(path).unwrap();
        let mut layer = ds
            .create_layer(LayerOptions {
                name: "boundary",
                srs,
                ty: OGRwkbGeometryType::wkbPolygon,
                options: None,
            })
            .unwrap();
        layer
            .create_feature_fields(geometry, &[], &[] as &[FieldValue])
            .unwrap();
    }

    #[test]
    fn test_load_reprojects_alaska_albers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("north_slope_3338.shp");

        let mut wgs84 = SpatialRef::from_epsg(WGS84_EPSG).unwrap();
        wgs84.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        let mut albers = SpatialRef::from_epsg(3338).unwrap();
        albers.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        let to_albers = CoordTransform::new(&wgs84, &albers).unwrap();

        let geographic =
            Geometry::from_wkt("POLYGON ((-160 68, -150 68, -150 72, -160 72, -160 68))").unwrap();
        let projected = geographic.transform(&to_albers).unwrap();
        // metres, far outside any lon/lat range
        let (x, _, _) = projected.get_geometry(0).get_point(0);
        assert!(x.abs() > 1000.0);
        write_shapefile(&path, Some(&albers), projected);

        let boundary = Boundary::load(&path).unwrap();
        assert_eq!(boundary.epsg, WGS84_EPSG);
        assert!((boundary.bounds.min().x - -160.0).abs() < 1e-6);
        assert!((boundary.bounds.max().x - -150.0).abs() < 1e-6);
        assert!((boundary.bounds.min().y - 68.0).abs() < 1e-6);
        assert!((boundary.bounds.max().y - 72.0).abs() < 1e-6);
        assert!(boundary.contains(-155.0, 70.0));
        assert!(!boundary.contains(-145.0, 70.0));
        assert!(!boundary.contains(70.0, -155.0));
    }

    #[test]
    fn test_load_without_crs_assumes_wgs84() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_prj.shp");
        let geometry =
            Geometry::from_wkt("POLYGON ((-160 68, -150 68, -150 72, -160 72, -160 68))").unwrap();
        write_shapefile(&path, None, geometry);
        assert!(!path.with_extension("prj").exists());

        let boundary = Boundary::load(&path).unwrap();
        assert_eq!(boundary.epsg, WGS84_EPSG);
        assert!(boundary.contains(-155.0, 70.0));
        assert!(!boundary.contains(-145.0, 70.0));
    }

    #[test]
    fn test_load_geojson_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("north_slope.geojson");
        {
            let driver = DriverManager::get_driver_by_name("GeoJSON").unwrap();
            let mut ds = driver.create_vector_only(&path).unwrap();
            let srs = SpatialRef::from_epsg(WGS84_EPSG).unwrap();
            let mut layer = ds
                .create_layer(LayerOptions {
                    name: "boundary",
                    srs: Some(&srs),
                    ty: OGRwkbGeometryType::wkbPolygon,
                    options: None,
                })
                .unwrap();
            let geometry =
                Geometry::from_wkt("POLYGON ((-160 68, -150 68, -150 72, -160 72, -160 68))")
                    .unwrap();
            layer
                .create_feature_fields(geometry, &[], &[] as &[FieldValue])
                .unwrap();
        }

        let boundary = Boundary::load(&path).unwrap();
        assert_eq!(boundary.epsg, WGS84_EPSG);
        assert!(boundary.contains(-155.0, 70.0));
        assert!(!boundary.contains(70.0, -155.0));
    }
}
