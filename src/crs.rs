use crate::error::{RasterH3Error, Result};
use crate::grid::GeoExtent;
use crate::io::RasterMetadata;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use geo_types::Coord;
use log::{debug, info, warn};

/// Approximate length of one degree of latitude, in metres.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Linear unit of the raster's pixel spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelUnits {
    Degrees,
    /// Projected CRS; the value is metres per CRS unit.
    Linear(f64),
    Unknown,
}

/// Detect whether the CRS is geographic or projected, and its linear unit
pub fn detect_pixel_units(projection_wkt: &str) -> PixelUnits {
    if projection_wkt.trim().is_empty() {
        warn!("Raster has no CRS, pixel size units are unknown");
        return PixelUnits::Unknown;
    }

    let spatial_ref = match SpatialRef::from_wkt(projection_wkt) {
        Ok(sr) => sr,
        Err(e) => {
            warn!("Failed to parse projection WKT, pixel units unknown: {}", e);
            return PixelUnits::Unknown;
        }
    };

    if spatial_ref.is_geographic() {
        debug!("Geographic CRS detected (lat/lon), pixel size in degrees");
        return PixelUnits::Degrees;
    }

    if spatial_ref.is_projected() {
        let linear_units = spatial_ref.linear_units();
        debug!("Projected CRS detected (units={:.6} m)", linear_units);
        return PixelUnits::Linear(linear_units);
    }

    warn!("Unknown CRS type, pixel size units are unknown");
    PixelUnits::Unknown
}

/// Convert a pixel spacing to approximate metres
pub fn pixel_size_meters(pixel_size: f64, units: PixelUnits, center_lat: f64) -> f64 {
    match units {
        PixelUnits::Degrees => {
            // mean of the north-south and east-west degree lengths
            let ew = METERS_PER_DEGREE * center_lat.to_radians().cos().abs();
            pixel_size * (METERS_PER_DEGREE + ew) / 2.0
        }
        PixelUnits::Linear(factor) => pixel_size * factor,
        PixelUnits::Unknown => pixel_size,
    }
}

/// How raster coordinates reach the grid's geographic (WGS84 lon/lat) system.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Raster is already in EPSG:4326.
    Wgs84,
    /// Raster needs a transform from this CRS (stored as WKT).
    Transformed { wkt: String },
}

impl Projection {
    /// Resolve the raster CRS. `override_definition` takes precedence over the
    /// embedded WKT and accepts any GDAL user input (e.g. `EPSG:32750`).
    pub fn resolve(projection_wkt: &str, override_definition: Option<&str>) -> Result<Self> {
        let spatial_ref = match override_definition {
            Some(definition) => {
                info!("Using source CRS override: {}", definition);
                SpatialRef::from_definition(definition).map_err(|e| {
                    RasterH3Error::ReprojectionFailure(format!(
                        "cannot parse CRS '{}': {}",
                        definition, e
                    ))
                })?
            }
            None if projection_wkt.trim().is_empty() => {
                return Err(RasterH3Error::ReprojectionFailure(
                    "raster has no coordinate reference system; supply a source CRS".to_string(),
                ));
            }
            None => SpatialRef::from_wkt(projection_wkt).map_err(|e| {
                RasterH3Error::ReprojectionFailure(format!("cannot parse raster CRS: {}", e))
            })?,
        };

        if is_wgs84(&spatial_ref) {
            info!("Raster CRS is EPSG:4326, no reprojection needed");
            return Ok(Projection::Wgs84);
        }

        let wkt = spatial_ref
            .to_wkt()
            .map_err(|e| RasterH3Error::ReprojectionFailure(e.to_string()))?;
        let projection = Projection::Transformed { wkt };

        // Fail before the scan if no transform exists
        projection.transformer()?;
        info!(
            "Raster CRS {} will be reprojected to EPSG:4326",
            spatial_ref
                .authority()
                .unwrap_or_else(|_| "(custom)".to_string())
        );

        Ok(projection)
    }

    /// Create a transformer. GDAL transforms are not thread-safe, so each
    /// worker creates its own.
    pub fn transformer(&self) -> Result<Transformer> {
        match self {
            Projection::Wgs84 => Ok(Transformer::Identity),
            Projection::Transformed { wkt } => {
                let mut source = SpatialRef::from_wkt(wkt)
                    .map_err(|e| RasterH3Error::ReprojectionFailure(e.to_string()))?;
                source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

                let mut target = SpatialRef::from_epsg(4326)
                    .map_err(|e| RasterH3Error::ReprojectionFailure(e.to_string()))?;
                target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

                let transform = CoordTransform::new(&source, &target).map_err(|e| {
                    RasterH3Error::ReprojectionFailure(format!(
                        "no transform from raster CRS to EPSG:4326: {}",
                        e
                    ))
                })?;
                Ok(Transformer::Gdal(transform))
            }
        }
    }
}

fn is_wgs84(spatial_ref: &SpatialRef) -> bool {
    spatial_ref.is_geographic()
        && matches!(spatial_ref.auth_name().as_deref(), Some("EPSG"))
        && matches!(spatial_ref.auth_code(), Ok(4326))
}

/// Per-worker coordinate transformer into WGS84 lon/lat.
pub enum Transformer {
    Identity,
    Gdal(CoordTransform),
}

impl Transformer {
    /// Transform coordinates in place. Points that cannot be transformed are
    /// set to NaN; this never fails the whole batch.
    pub fn to_geographic(&self, xs: &mut [f64], ys: &mut [f64]) {
        let Transformer::Gdal(transform) = self else {
            return;
        };

        let (orig_x, orig_y) = (xs.to_vec(), ys.to_vec());
        let mut zs = vec![0.0; xs.len()];
        if transform.transform_coords(xs, ys, &mut zs).is_ok() {
            return;
        }

        // Batch failed: retry point by point so one bad point does not
        // discard the rest
        for i in 0..xs.len() {
            let mut x = [orig_x[i]];
            let mut y = [orig_y[i]];
            let mut z = [0.0];
            if transform.transform_coords(&mut x, &mut y, &mut z).is_ok() {
                xs[i] = x[0];
                ys[i] = y[0];
            } else {
                xs[i] = f64::NAN;
                ys[i] = f64::NAN;
            }
        }
    }
}

/// Geographic extent of the raster, from its densified border
pub fn geographic_extent(metadata: &RasterMetadata, transformer: &Transformer) -> Option<GeoExtent> {
    let border = metadata.border_points(21);
    let mut xs: Vec<f64> = border.iter().map(|c| c.x).collect();
    let mut ys: Vec<f64> = border.iter().map(|c| c.y).collect();
    transformer.to_geographic(&mut xs, &mut ys);

    let extent = GeoExtent::from_points(xs.into_iter().zip(ys).map(|(x, y)| Coord { x, y }));
    match &extent {
        Some(e) => debug!(
            "Geographic extent: lon [{:.6}, {:.6}], lat [{:.6}, {:.6}]",
            e.min_lon, e.max_lon, e.min_lat, e.max_lat
        ),
        None => warn!("Raster extent could not be projected to geographic coordinates"),
    }
    extent
}
