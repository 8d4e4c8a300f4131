use crate::error::{RasterH3Error, Result};
use geo_types::{Coord, LineString, Point, Polygon};
use h3o::{CellIndex, LatLng, Resolution};
use log::debug;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Fixed-length cell identifier. Displays as lowercase hex, which is the
/// canonical H3 string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u64);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for CellId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        u64::from_str_radix(s.trim(), 16).map(CellId)
    }
}

impl From<CellIndex> for CellId {
    fn from(cell: CellIndex) -> Self {
        CellId(u64::from(cell))
    }
}

/// Geographic bounding box in degrees (lon/lat).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoExtent {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl GeoExtent {
    /// Smallest extent enclosing all finite points; `None` if there are none.
    pub fn from_points(points: impl IntoIterator<Item = Coord<f64>>) -> Option<Self> {
        let mut extent: Option<GeoExtent> = None;
        for p in points {
            if !p.x.is_finite() || !p.y.is_finite() {
                continue;
            }
            let lat = p.y.clamp(-90.0, 90.0);
            extent = Some(match extent {
                None => GeoExtent {
                    min_lon: p.x,
                    min_lat: lat,
                    max_lon: p.x,
                    max_lat: lat,
                },
                Some(e) => GeoExtent {
                    min_lon: e.min_lon.min(p.x),
                    min_lat: e.min_lat.min(lat),
                    max_lon: e.max_lon.max(p.x),
                    max_lat: e.max_lat.max(lat),
                },
            });
        }
        extent
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center_lat(&self) -> f64 {
        (self.min_lat + self.max_lat) / 2.0
    }
}

/// Returns true when a lon/lat coordinate can be indexed by a global grid.
pub fn in_geographic_domain(coord: Coord<f64>) -> bool {
    coord.x.is_finite() && coord.y.is_finite() && coord.y.abs() <= 90.0
}

pub trait HexGrid: Sync {
    /// Supported resolution levels, coarsest first.
    fn level_range(&self) -> RangeInclusive<u8>;

    fn validate_level(&self, level: u8) -> Result<()> {
        let range = self.level_range();
        if range.contains(&level) {
            Ok(())
        } else {
            Err(RasterH3Error::InvalidResolution {
                level,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }

    /// Cell containing a lon/lat coordinate, or `None` outside the grid domain.
    fn cell_at(&self, coord: Coord<f64>, level: u8) -> Option<CellId>;

    fn centroid(&self, cell: CellId) -> Option<Point<f64>>;

    /// Closed boundary ring of the cell in lon/lat order.
    fn boundary(&self, cell: CellId) -> Option<Polygon<f64>>;

    /// Over-cover of `extent`: every cell intersecting it, possibly with extras.
    /// Returns `None` when more than `limit` lookups would be needed.
    fn cover(&self, extent: &GeoExtent, level: u8, limit: usize) -> Option<Vec<CellId>>;

    /// Mean edge length of a cell at `level`, in metres.
    fn edge_length_m(&self, level: u8) -> f64;

    /// Mean cell area at `level`, in square kilometres.
    fn cell_area_km2(&self, level: u8) -> f64;
}

/// Uber H3 backed by `h3o`.
#[derive(Debug, Clone, Copy, Default)]
pub struct H3Grid;

impl H3Grid {
    pub fn new() -> Self {
        H3Grid
    }

    fn resolution(&self, level: u8) -> Result<Resolution> {
        Resolution::try_from(level).map_err(|_| RasterH3Error::InvalidResolution {
            level,
            min: 0,
            max: 15,
        })
    }

    fn cell_index(cell: CellId) -> Option<CellIndex> {
        CellIndex::try_from(cell.0).ok()
    }
}

impl HexGrid for H3Grid {
    fn level_range(&self) -> RangeInclusive<u8> {
        0..=15
    }

    fn cell_at(&self, coord: Coord<f64>, level: u8) -> Option<CellId> {
        if !in_geographic_domain(coord) {
            return None;
        }
        let resolution = self.resolution(level).ok()?;
        let latlng = LatLng::new(coord.y, coord.x).ok()?;
        Some(latlng.to_cell(resolution).into())
    }

    fn centroid(&self, cell: CellId) -> Option<Point<f64>> {
        let center = LatLng::from(Self::cell_index(cell)?);
        Some(Point::new(center.lng(), center.lat()))
    }

    fn boundary(&self, cell: CellId) -> Option<Polygon<f64>> {
        let boundary = Self::cell_index(cell)?.boundary();
        let ring: Vec<Coord<f64>> = boundary
            .iter()
            .map(|vertex| Coord {
                x: vertex.lng(),
                y: vertex.lat(),
            })
            .collect();
        // Polygon::new closes the ring
        Some(Polygon::new(LineString::from(ring), vec![]))
    }

    fn cover(&self, extent: &GeoExtent, level: u8, limit: usize) -> Option<Vec<CellId>> {
        let resolution = self.resolution(level).ok()?;

        let step_lat = resolution.edge_length_rads().to_degrees();
        let max_abs_lat = extent.min_lat.abs().max(extent.max_lat.abs());
        let cos_lat = max_abs_lat.to_radians().cos().max(0.01);
        let step_lon = step_lat / cos_lat;

        let nx = (extent.width() / step_lon).ceil() as usize + 1;
        let ny = (extent.height() / step_lat).ceil() as usize + 1;
        if nx.saturating_mul(ny) > limit {
            debug!(
                "Coverage lattice {}x{} exceeds limit {} at level {}",
                nx, ny, limit, level
            );
            return None;
        }

        let mut sampled: HashSet<CellIndex> = HashSet::new();
        for j in 0..=ny {
            let lat = (extent.min_lat + j as f64 * step_lat).min(extent.max_lat);
            for i in 0..=nx {
                let lon = (extent.min_lon + i as f64 * step_lon).min(extent.max_lon);
                if let Ok(latlng) = LatLng::new(lat, lon) {
                    sampled.insert(latlng.to_cell(resolution));
                }
            }
        }

        // 1-ring neighbours pick up cells that only clip the extent edge
        let mut cells: BTreeSet<CellId> = BTreeSet::new();
        for cell in sampled {
            let disk: Vec<CellIndex> = cell.grid_disk(1);
            cells.extend(disk.into_iter().map(CellId::from));
        }

        Some(cells.into_iter().collect())
    }

    fn edge_length_m(&self, level: u8) -> f64 {
        self.resolution(level)
            .map(|r| r.edge_length_m())
            .unwrap_or(f64::NAN)
    }

    fn cell_area_km2(&self, level: u8) -> f64 {
        self.resolution(level)
            .map(|r| r.area_km2())
            .unwrap_or(f64::NAN)
    }
}
