use crate::chunking::RowBands;
use crate::crs::{geographic_extent, Projection, Transformer};
use crate::error::{RasterH3Error, Result};
use crate::grid::{CellId, HexGrid};
use crate::io::{RasterMetadata, RasterSource};
use crate::progress::{ProgressEvent, ProgressObserver};
use geo_types::{Coord, Point, Polygon};
use log::{debug, info, warn};
use ndarray::ArrayView1;
use rayon::prelude::*;
use std::collections::HashMap;

/// CRS of every emitted geometry.
pub const OUTPUT_CRS: &str = "EPSG:4326";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Full hexagon boundary polygon
    #[default]
    Geometry,
    /// Centroid point only
    Centroid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOptions {
    pub level: u8,
    pub mode: OutputMode,
    /// Supersedes the raster's embedded nodata value.
    pub nodata_override: Option<f64>,
    /// Source CRS definition, for unreferenced rasters or to override the
    /// embedded one.
    pub source_crs: Option<String>,
    pub batch_rows: usize,
    /// Maximum lattice lookups spent enumerating candidate cells.
    pub coverage_limit: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            level: 9,
            mode: OutputMode::Geometry,
            nodata_override: None,
            source_crs: None,
            batch_rows: 256,
            coverage_limit: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub cell: CellId,
    pub mean: f64,
    /// Number of contributing pixels, always >= 1.
    pub count: u64,
    pub centroid: Point<f64>,
    /// Present in [`OutputMode::Geometry`].
    pub boundary: Option<Polygon<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputCollection {
    pub crs: &'static str,
    pub level: u8,
    pub mode: OutputMode,
    /// Sorted by cell identifier, identifiers unique.
    pub records: Vec<AggregateRecord>,
}

impl OutputCollection {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStats {
    pub total_pixels: u64,
    /// Nodata-equal or non-finite pixels.
    pub nodata_pixels: u64,
    /// Valid pixels whose coordinate falls outside the grid domain.
    pub outside_domain: u64,
    /// Pixels assigned to a cell; equals the sum of record counts.
    pub sampled_pixels: u64,
}

#[derive(Debug, Clone)]
pub struct AggregationReport {
    pub collection: OutputCollection,
    pub stats: ScanStats,
    /// Size of the extent over-cover, when it was enumerated.
    pub candidate_cells: Option<usize>,
}

impl AggregationReport {
    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    /// The collection, or `EmptyResult` if no cell received a sample.
    pub fn into_non_empty(self) -> Result<OutputCollection> {
        if self.collection.is_empty() {
            return Err(RasterH3Error::EmptyResult {
                total_pixels: self.stats.total_pixels,
                nodata_pixels: self.stats.nodata_pixels,
                outside_domain: self.stats.outside_domain,
            });
        }
        Ok(self.collection)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CellSum {
    sum: f64,
    count: u64,
}

#[derive(Debug, Default)]
struct CellAccumulator {
    cells: HashMap<CellId, CellSum>,
    nodata_pixels: u64,
    outside_domain: u64,
}

impl CellAccumulator {
    fn add(&mut self, cell: CellId, value: f64) {
        let entry = self.cells.entry(cell).or_default();
        entry.sum += value;
        entry.count += 1;
    }

    fn merge(&mut self, other: CellAccumulator) {
        for (cell, partial) in other.cells {
            let entry = self.cells.entry(cell).or_default();
            entry.sum += partial.sum;
            entry.count += partial.count;
        }
        self.nodata_pixels += other.nodata_pixels;
        self.outside_domain += other.outside_domain;
    }
}

fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    !value.is_finite() || nodata.is_some_and(|nd| value == nd)
}

/// Scan one raster row into a fresh accumulator
fn scan_row<G: HexGrid>(
    values: ArrayView1<f64>,
    row: usize,
    metadata: &RasterMetadata,
    nodata: Option<f64>,
    transformer: &Transformer,
    grid: &G,
    level: u8,
) -> CellAccumulator {
    let mut acc = CellAccumulator::default();
    let mut xs = Vec::with_capacity(values.len());
    let mut ys = Vec::with_capacity(values.len());
    let mut samples = Vec::with_capacity(values.len());

    for (col, &value) in values.iter().enumerate() {
        if is_nodata(value, nodata) {
            acc.nodata_pixels += 1;
            continue;
        }
        let center = metadata.pixel_center(row, col);
        xs.push(center.x);
        ys.push(center.y);
        samples.push(value);
    }

    transformer.to_geographic(&mut xs, &mut ys);

    for ((x, y), value) in xs.into_iter().zip(ys).zip(samples) {
        match grid.cell_at(Coord { x, y }, level) {
            Some(cell) => acc.add(cell, value),
            None => acc.outside_domain += 1,
        }
    }

    acc
}

/// Aggregate the pixels of `source` into cells of `grid` at `options.level`.
///
/// Configuration, CRS and transform errors are reported before any pixel is
/// read. An all-nodata raster yields an empty report, not an error; use
/// [`AggregationReport::into_non_empty`] to treat that as a failure.
pub fn aggregate<S, G>(
    source: &S,
    grid: &G,
    options: &AggregateOptions,
    observer: &dyn ProgressObserver,
) -> Result<AggregationReport>
where
    S: RasterSource + ?Sized,
    G: HexGrid,
{
    let metadata = source.metadata();
    let level = options.level;

    grid.validate_level(level)?;
    let bands = RowBands::new(metadata.height, options.batch_rows)?;
    let projection = Projection::resolve(&metadata.projection, options.source_crs.as_deref())?;

    let nodata = options.nodata_override.or(metadata.nodata);
    match nodata {
        Some(nd) => info!("Using nodata value: {}", nd),
        None => info!("No nodata value specified"),
    }

    observer.on_event(&ProgressEvent::Started {
        width: metadata.width,
        height: metadata.height,
        level,
    });

    // Coverage lookups never exceed the pixel count
    let pixel_bound = usize::try_from(metadata.total_pixels()).unwrap_or(usize::MAX);
    let transformer = projection.transformer()?;
    let candidate_cells = geographic_extent(metadata, &transformer)
        .and_then(|extent| grid.cover(&extent, level, options.coverage_limit.min(pixel_bound)))
        .map(|cells| cells.len());
    observer.on_event(&ProgressEvent::Coverage { candidate_cells });

    let mut total = CellAccumulator::default();
    if let Some(n) = candidate_cells {
        total.cells.reserve(n.min(pixel_bound));
    }

    for (band_idx, band) in bands.iter() {
        if observer.is_cancelled() {
            observer.on_event(&ProgressEvent::Cancelled {
                rows_done: band.first_row,
            });
            return Err(RasterH3Error::Cancelled {
                rows_done: band.first_row,
                total_rows: metadata.height,
            });
        }

        let data = source.read_rows(band.first_row, band.rows)?;
        debug!(
            "Scanning band {} (rows {}..{})",
            band_idx,
            band.first_row,
            band.end_row()
        );

        let partials: Vec<CellAccumulator> = (0..band.rows)
            .into_par_iter()
            .map_init(
                || projection.transformer(),
                |transformer, i| -> Result<CellAccumulator> {
                    let transformer = transformer
                        .as_ref()
                        .map_err(|e| RasterH3Error::ReprojectionFailure(e.to_string()))?;
                    Ok(scan_row(
                        data.row(i),
                        band.first_row + i,
                        metadata,
                        nodata,
                        transformer,
                        grid,
                        level,
                    ))
                },
            )
            .collect::<Result<Vec<_>>>()?;

        for partial in partials {
            total.merge(partial);
        }

        observer.on_event(&ProgressEvent::RowsProcessed {
            rows_done: band.end_row(),
            total_rows: metadata.height,
        });
    }

    let mut cells: Vec<(CellId, CellSum)> = total.cells.into_iter().collect();
    cells.sort_unstable_by_key(|(cell, _)| *cell);

    let records: Vec<AggregateRecord> = cells
        .into_iter()
        .filter_map(|(cell, cell_sum)| {
            let Some(centroid) = grid.centroid(cell) else {
                warn!("Grid has no centroid for cell {}, dropping it", cell);
                return None;
            };
            let boundary = match options.mode {
                OutputMode::Geometry => grid.boundary(cell),
                OutputMode::Centroid => None,
            };
            Some(AggregateRecord {
                cell,
                mean: cell_sum.sum / cell_sum.count as f64,
                count: cell_sum.count,
                centroid,
                boundary,
            })
        })
        .collect();

    let stats = ScanStats {
        total_pixels: metadata.total_pixels(),
        nodata_pixels: total.nodata_pixels,
        outside_domain: total.outside_domain,
        sampled_pixels: records.iter().map(|r| r.count).sum(),
    };

    if records.is_empty() {
        warn!(
            "Empty result: {} pixels, {} nodata, {} outside the grid domain",
            stats.total_pixels, stats.nodata_pixels, stats.outside_domain
        );
        observer.on_event(&ProgressEvent::Empty);
    } else {
        observer.on_event(&ProgressEvent::Finished {
            cells: records.len(),
            sampled_pixels: stats.sampled_pixels,
        });
    }

    Ok(AggregationReport {
        collection: OutputCollection {
            crs: OUTPUT_CRS,
            level,
            mode: options.mode,
            records,
        },
        stats,
        candidate_cells,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grid::{in_geographic_domain, GeoExtent, H3Grid};
    use crate::io::tests::write_georeferenced_geotiff;
    use crate::io::{GdalRaster, InMemoryRaster};
    use crate::progress::{CancelFlag, LogObserver, NullObserver};
    use approx::assert_relative_eq;
    use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
    use geo_types::LineString;
    use ndarray::{arr2, Array2};
    use std::collections::BTreeMap;
    use std::ops::RangeInclusive;
    use std::sync::Mutex;

    pub(crate) const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;

    /// Square lon/lat grid; cell size halves with each level.
    struct SquareGrid {
        size: f64,
    }

    impl SquareGrid {
        fn cell_size(&self, level: u8) -> f64 {
            self.size / f64::from(1u32 << level)
        }

        fn decode(&self, cell: CellId) -> (u8, f64, f64, f64) {
            let level = (cell.0 >> 56) as u8;
            let j = (cell.0 >> 28) & 0x0fff_ffff;
            let i = cell.0 & 0x0fff_ffff;
            let size = self.cell_size(level);
            (level, size, i as f64 * size - 180.0, j as f64 * size - 90.0)
        }
    }

    impl HexGrid for SquareGrid {
        fn level_range(&self) -> RangeInclusive<u8> {
            0..=4
        }

        fn cell_at(&self, coord: Coord<f64>, level: u8) -> Option<CellId> {
            if !in_geographic_domain(coord) {
                return None;
            }
            let size = self.cell_size(level);
            let i = ((coord.x + 180.0) / size).floor() as u64;
            let j = ((coord.y + 90.0) / size).floor() as u64;
            Some(CellId(u64::from(level) << 56 | j << 28 | i))
        }

        fn centroid(&self, cell: CellId) -> Option<Point<f64>> {
            let (_, size, x0, y0) = self.decode(cell);
            Some(Point::new(x0 + size / 2.0, y0 + size / 2.0))
        }

        fn boundary(&self, cell: CellId) -> Option<Polygon<f64>> {
            let (_, size, x0, y0) = self.decode(cell);
            let ring = LineString::from(vec![
                (x0, y0),
                (x0 + size, y0),
                (x0 + size, y0 + size),
                (x0, y0 + size),
            ]);
            Some(Polygon::new(ring, vec![]))
        }

        fn cover(&self, _extent: &GeoExtent, _level: u8, _limit: usize) -> Option<Vec<CellId>> {
            None
        }

        fn edge_length_m(&self, level: u8) -> f64 {
            self.cell_size(level) * 111_320.0
        }

        fn cell_area_km2(&self, level: u8) -> f64 {
            (self.edge_length_m(level) / 1000.0).powi(2)
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_event(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn wgs84_raster(data: Array2<f64>, gt: [f64; 6], nodata: Option<f64>) -> InMemoryRaster {
        InMemoryRaster::new(data, gt, WGS84_WKT, nodata).unwrap()
    }

    fn options(level: u8) -> AggregateOptions {
        AggregateOptions {
            level,
            ..AggregateOptions::default()
        }
    }

    fn triples(collection: &OutputCollection) -> Vec<(CellId, f64, u64)> {
        collection
            .records
            .iter()
            .map(|r| (r.cell, r.mean, r.count))
            .collect()
    }

    /// 40x60 raster at 0.002 degree spacing near Denpasar with a few nodata holes.
    fn bali_raster() -> InMemoryRaster {
        let data = Array2::from_shape_fn((40, 60), |(r, c)| {
            if (r * 60 + c) % 17 == 0 {
                -9999.0
            } else {
                ((r * 31 + c * 7) % 101) as f64 * 0.25
            }
        });
        wgs84_raster(data, [115.15, 0.002, 0.0, -8.60, 0.0, -0.002], Some(-9999.0))
    }

    #[test]
    fn test_single_cell_mean_and_count() {
        let data = arr2(&[[1.0, 2.0, 3.0], [4.0, -1.0, 6.0], [7.0, 8.0, 9.0]]);
        let raster = wgs84_raster(data, [1.0, 0.1, 0.0, 2.0, 0.0, -0.1], Some(-1.0));
        let grid = SquareGrid { size: 10.0 };

        let report = aggregate(&raster, &grid, &options(0), &NullObserver).unwrap();
        let records = &report.collection.records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].count, 8);
        assert_relative_eq!(records[0].mean, 40.0 / 8.0);
        assert_eq!(report.stats.nodata_pixels, 1);
    }

    #[test]
    fn test_counts_sum_to_valid_pixels_in_domain() {
        // First row centres sit at latitude 90.5, outside the domain
        let data = Array2::from_elem((4, 5), 1.0);
        let raster = wgs84_raster(data, [0.0, 1.0, 0.0, 91.0, 0.0, -1.0], None);
        let grid = SquareGrid { size: 2.0 };

        let report = aggregate(&raster, &grid, &options(0), &NullObserver).unwrap();
        let sum: u64 = report.collection.records.iter().map(|r| r.count).sum();
        assert_eq!(report.stats.outside_domain, 5);
        assert_eq!(sum, 15);
        assert_eq!(report.stats.sampled_pixels, 15);
        assert!(report.collection.records.iter().all(|r| r.count >= 1));
    }

    #[test]
    fn test_non_finite_pixels_skipped() {
        let data = arr2(&[[f64::NAN, 2.0], [f64::INFINITY, 4.0]]);
        let raster = wgs84_raster(data, [1.0, 0.1, 0.0, 2.0, 0.0, -0.1], None);
        let grid = SquareGrid { size: 10.0 };

        let report = aggregate(&raster, &grid, &options(0), &NullObserver).unwrap();
        assert_eq!(triples(&report.collection)[0].2, 2);
        assert_relative_eq!(report.collection.records[0].mean, 3.0);
        assert_eq!(report.stats.nodata_pixels, 2);
    }

    #[test]
    fn test_nodata_override_supersedes_embedded() {
        let data = arr2(&[[0.0, 5.0], [-9999.0, 5.0]]);
        let raster = wgs84_raster(data, [1.0, 0.1, 0.0, 2.0, 0.0, -0.1], Some(-9999.0));
        let grid = SquareGrid { size: 10.0 };
        let opts = AggregateOptions {
            nodata_override: Some(0.0),
            ..options(0)
        };

        let report = aggregate(&raster, &grid, &opts, &NullObserver).unwrap();
        // -9999 is now a valid sample, 0 is skipped
        assert_eq!(report.collection.records[0].count, 3);
        assert_relative_eq!(report.collection.records[0].mean, (5.0 + 5.0 - 9999.0) / 3.0);
    }

    #[test]
    fn test_all_nodata_is_empty_result() {
        let data = Array2::from_elem((3, 3), -9999.0);
        let raster = wgs84_raster(data, [1.0, 0.1, 0.0, 2.0, 0.0, -0.1], Some(-9999.0));
        let grid = SquareGrid { size: 10.0 };
        let observer = RecordingObserver::default();

        let report = aggregate(&raster, &grid, &options(0), &observer).unwrap();
        assert!(report.is_empty());
        assert!(observer
            .events
            .lock()
            .unwrap()
            .contains(&ProgressEvent::Empty));
        assert!(matches!(
            report.into_non_empty(),
            Err(RasterH3Error::EmptyResult {
                total_pixels: 9,
                nodata_pixels: 9,
                outside_domain: 0
            })
        ));
    }

    #[test]
    fn test_invalid_level_fails_before_scan() {
        let raster = bali_raster();
        let observer = RecordingObserver::default();

        let result = aggregate(&raster, &H3Grid::new(), &options(16), &observer);
        assert!(matches!(
            result,
            Err(RasterH3Error::InvalidResolution { level: 16, .. })
        ));
        assert!(observer.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_crs_fails_before_scan() {
        let raster = InMemoryRaster::new(
            Array2::from_elem((2, 2), 1.0),
            [1.0, 0.1, 0.0, 2.0, 0.0, -0.1],
            "",
            None,
        )
        .unwrap();
        let result = aggregate(&raster, &H3Grid::new(), &options(5), &NullObserver);
        assert!(matches!(result, Err(RasterH3Error::ReprojectionFailure(_))));
    }

    #[test]
    fn test_raster_without_geotransform_is_reprojection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.tif");
        write_georeferenced_geotiff(&path, &Array2::from_elem((3, 3), 1.0), None, None, None);

        let result = GdalRaster::open(path.to_str().unwrap(), 1);
        assert!(matches!(result, Err(RasterH3Error::ReprojectionFailure(_))));
    }

    fn lon_lat_order(epsg: u32) -> SpatialRef {
        let mut srs = SpatialRef::from_epsg(epsg).unwrap();
        srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        srs
    }

    #[test]
    fn test_utm_geotiff_matches_per_pixel_reprojection() {
        let wgs84 = lon_lat_order(4326);
        let utm = lon_lat_order(32750);

        // Upper-left corner near Denpasar, 100 m pixels in UTM zone 50S
        let to_utm = CoordTransform::new(&wgs84, &utm).unwrap();
        let (mut x, mut y, mut z) = ([115.20], [-8.62], [0.0]);
        to_utm.transform_coords(&mut x, &mut y, &mut z).unwrap();
        let gt = [x[0].round(), 100.0, 0.0, y[0].round(), 0.0, -100.0];

        let data = Array2::from_shape_fn((30, 40), |(r, c)| {
            if (r * 40 + c) % 13 == 0 {
                -9999.0
            } else {
                ((r * 17 + c * 5) % 53) as f64 * 0.5
            }
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utm.tif");
        write_georeferenced_geotiff(&path, &data, Some(gt), Some(32750), Some(-9999.0));

        let raster = GdalRaster::open(path.to_str().unwrap(), 1).unwrap();
        let grid = H3Grid::new();
        let report = aggregate(&raster, &grid, &options(8), &NullObserver).unwrap();

        let stats = report.stats;
        assert_eq!(stats.total_pixels, 1200);
        assert_eq!(stats.outside_domain, 0);
        assert_eq!(stats.sampled_pixels + stats.nodata_pixels, stats.total_pixels);

        let to_geo = CoordTransform::new(&utm, &wgs84).unwrap();
        let mut expected: BTreeMap<CellId, (f64, u64)> = BTreeMap::new();
        for ((row, col), &value) in data.indexed_iter() {
            if value == -9999.0 {
                continue;
            }
            let center = raster.metadata().pixel_center(row, col);
            let (mut x, mut y, mut z) = ([center.x], [center.y], [0.0]);
            to_geo.transform_coords(&mut x, &mut y, &mut z).unwrap();
            let cell = grid.cell_at(Coord { x: x[0], y: y[0] }, 8).unwrap();
            let entry = expected.entry(cell).or_default();
            entry.0 += value;
            entry.1 += 1;
        }

        let records = &report.collection.records;
        assert!(records.len() > 1);
        assert_eq!(records.len(), expected.len());
        for (record, (cell, (sum, count))) in records.iter().zip(&expected) {
            assert_eq!(record.cell, *cell);
            assert_eq!(record.count, *count);
            assert_relative_eq!(record.mean, sum / *count as f64, epsilon = 1e-9);
            // lon/lat, not swapped
            assert!(record.centroid.x() > 115.0 && record.centroid.x() < 115.4);
            assert!(record.centroid.y() > -8.8 && record.centroid.y() < -8.5);
        }

        let banded = aggregate(
            &raster,
            &grid,
            &AggregateOptions {
                batch_rows: 7,
                ..options(8)
            },
            &NullObserver,
        )
        .unwrap();
        assert_eq!(triples(&report.collection), triples(&banded.collection));
    }

    #[test]
    fn test_coverage_skipped_when_denser_than_pixels() {
        // Level 12 cells are far smaller than the 0.002 degree pixels
        let report = aggregate(&bali_raster(), &H3Grid::new(), &options(12), &NullObserver).unwrap();
        assert_eq!(report.candidate_cells, None);
        assert!(!report.is_empty());
    }

    #[test]
    fn test_deterministic_across_batch_sizes() {
        let raster = bali_raster();
        let grid = H3Grid::new();

        let a = aggregate(&raster, &grid, &options(8), &NullObserver).unwrap();
        let b = aggregate(&raster, &grid, &options(8), &NullObserver).unwrap();
        let c = aggregate(
            &raster,
            &grid,
            &AggregateOptions {
                batch_rows: 7,
                ..options(8)
            },
            &NullObserver,
        )
        .unwrap();

        assert_eq!(triples(&a.collection), triples(&b.collection));
        assert_eq!(triples(&a.collection), triples(&c.collection));
    }

    #[test]
    fn test_unique_sorted_cells() {
        let report = aggregate(&bali_raster(), &H3Grid::new(), &options(9), &NullObserver).unwrap();
        let cells: Vec<CellId> = report.collection.records.iter().map(|r| r.cell).collect();
        let mut sorted = cells.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(cells, sorted);
    }

    #[test]
    fn test_resolution_monotonicity() {
        let raster = bali_raster();
        let grid = H3Grid::new();
        let counts: Vec<usize> = [6u8, 8, 10]
            .iter()
            .map(|&level| {
                aggregate(&raster, &grid, &options(level), &NullObserver)
                    .unwrap()
                    .collection
                    .len()
            })
            .collect();
        assert!(counts[0] <= counts[1] && counts[1] <= counts[2], "{:?}", counts);
        assert!(counts[2] > counts[0]);
    }

    #[test]
    fn test_h3_single_cell_mean() {
        let grid = H3Grid::new();
        let cell = grid.cell_at(Coord { x: 115.2, y: -8.65 }, 5).unwrap();
        let center = grid.centroid(cell).unwrap();

        // 4x4 pixels of 1e-4 degrees around the cell centre, far inside an ~8 km cell
        let data = arr2(&[
            [1.0, 2.0, 3.0, 4.0],
            [5.0, 6.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 15.0, f64::NAN],
        ]);
        let gt = [center.x() - 2e-4, 1e-4, 0.0, center.y() + 2e-4, 0.0, -1e-4];
        let raster = wgs84_raster(data, gt, None);

        let report = aggregate(&raster, &grid, &options(5), &NullObserver).unwrap();
        assert_eq!(report.collection.len(), 1);
        let record = &report.collection.records[0];
        assert_eq!(record.cell, cell);
        assert_eq!(record.count, 15);
        assert_relative_eq!(record.mean, 8.0);
    }

    #[test]
    fn test_cover_contains_emitted_cells() {
        let report = aggregate(&bali_raster(), &H3Grid::new(), &options(8), &NullObserver).unwrap();
        let extent = GeoExtent {
            min_lon: 115.15,
            min_lat: -8.68,
            max_lon: 115.27,
            max_lat: -8.60,
        };
        let cover = H3Grid::new().cover(&extent, 8, 1_000_000).unwrap();
        assert!(report.candidate_cells.is_some());
        for record in &report.collection.records {
            assert!(cover.contains(&record.cell));
        }
    }

    #[test]
    fn test_output_mode_controls_boundary() {
        let raster = bali_raster();
        let grid = H3Grid::new();

        let with_geometry = aggregate(&raster, &grid, &options(7), &NullObserver).unwrap();
        assert!(with_geometry
            .collection
            .records
            .iter()
            .all(|r| r.boundary.is_some()));

        let centroid_only = aggregate(
            &raster,
            &grid,
            &AggregateOptions {
                mode: OutputMode::Centroid,
                ..options(7)
            },
            &NullObserver,
        )
        .unwrap();
        assert!(centroid_only
            .collection
            .records
            .iter()
            .all(|r| r.boundary.is_none()));
        assert_eq!(
            triples(&with_geometry.collection),
            triples(&centroid_only.collection)
        );
    }

    #[test]
    fn test_cancellation_between_bands() {
        let flag = CancelFlag::new();
        flag.cancel();
        let observer = LogObserver::with_cancel_flag(flag);

        let result = aggregate(&bali_raster(), &H3Grid::new(), &options(7), &observer);
        assert!(matches!(
            result,
            Err(RasterH3Error::Cancelled {
                rows_done: 0,
                total_rows: 40
            })
        ));
    }

    #[test]
    fn test_progress_events_reported_per_band() {
        let observer = RecordingObserver::default();
        let opts = AggregateOptions {
            batch_rows: 10,
            ..options(7)
        };
        aggregate(&bali_raster(), &H3Grid::new(), &opts, &observer).unwrap();

        let events = observer.events.lock().unwrap();
        let rows: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::RowsProcessed { rows_done, .. } => Some(*rows_done),
                _ => None,
            })
            .collect();
        assert_eq!(rows, vec![10, 20, 30, 40]);
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
    }
}
