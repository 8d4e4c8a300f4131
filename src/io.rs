use crate::error::{RasterH3Error, Result};
use gdal::raster::RasterBand;
use gdal::Dataset;
use geo_types::Coord;
use log::{debug, info};
use ndarray::{s, Array2};

#[derive(Debug, Clone)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub geotransform: [f64; 6],
    pub projection: String,
    pub nodata: Option<f64>,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl RasterMetadata {
    /// Build metadata from a geotransform, validating size and pixel spacing.
    pub fn new(
        path: &str,
        width: usize,
        height: usize,
        geotransform: [f64; 6],
        projection: String,
        nodata: Option<f64>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RasterH3Error::unreadable(
                path,
                format!("raster has invalid dimensions {}x{}", width, height),
            ));
        }

        let pixel_width = geotransform[1].hypot(geotransform[4]);
        let pixel_height = geotransform[2].hypot(geotransform[5]);

        if pixel_width <= 0.0 || !pixel_width.is_finite() {
            return Err(RasterH3Error::InvalidPixelSize(pixel_width));
        }
        if pixel_height <= 0.0 || !pixel_height.is_finite() {
            return Err(RasterH3Error::InvalidPixelSize(pixel_height));
        }

        Ok(Self {
            width,
            height,
            geotransform,
            projection,
            nodata,
            pixel_width,
            pixel_height,
        })
    }

    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Map a fractional pixel position (column, row) to CRS coordinates.
    pub fn pixel_to_crs(&self, col: f64, row: f64) -> Coord<f64> {
        let gt = &self.geotransform;
        Coord {
            x: gt[0] + col * gt[1] + row * gt[2],
            y: gt[3] + col * gt[4] + row * gt[5],
        }
    }

    /// CRS coordinates of the centre of pixel (row, col).
    pub fn pixel_center(&self, row: usize, col: usize) -> Coord<f64> {
        self.pixel_to_crs(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Points along the raster border, `per_edge` per side, in CRS coordinates.
    pub fn border_points(&self, per_edge: usize) -> Vec<Coord<f64>> {
        let n = per_edge.max(2);
        let (w, h) = (self.width as f64, self.height as f64);
        let mut points = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            points.push(self.pixel_to_crs(t * w, 0.0));
            points.push(self.pixel_to_crs(t * w, h));
            points.push(self.pixel_to_crs(0.0, t * h));
            points.push(self.pixel_to_crs(w, t * h));
        }
        points
    }
}

/// Read access to a single-band gridded dataset.
pub trait RasterSource {
    fn metadata(&self) -> &RasterMetadata;

    /// Read `rows` full rows starting at `first_row` as a (rows, width) array.
    fn read_rows(&self, first_row: usize, rows: usize) -> Result<Array2<f64>>;
}

/// Raster backed by an open GDAL dataset. The dataset is closed on drop.
pub struct GdalRaster {
    dataset: Dataset,
    band: usize,
    metadata: RasterMetadata,
}

impl GdalRaster {
    /// Open `path` and read the metadata of band `band` (1-based).
    pub fn open(path: &str, band: usize) -> Result<Self> {
        info!("Opening input raster: {}", path);
        let dataset =
            Dataset::open(path).map_err(|e| RasterH3Error::unreadable(path, e))?;

        let band_count = dataset.raster_count() as usize;
        if band == 0 || band > band_count {
            return Err(RasterH3Error::unreadable(
                path,
                format!("band {} requested but raster has {} band(s)", band, band_count),
            ));
        }

        let metadata = extract_metadata_from_dataset(path, &dataset, band)?;

        debug!("Raster dimensions: {}x{}", metadata.width, metadata.height);
        debug!(
            "Pixel size: {:.6} x {:.6}",
            metadata.pixel_width, metadata.pixel_height
        );

        Ok(Self {
            dataset,
            band,
            metadata,
        })
    }
}

impl RasterSource for GdalRaster {
    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_rows(&self, first_row: usize, rows: usize) -> Result<Array2<f64>> {
        let rasterband: RasterBand = self.dataset.rasterband(self.band)?;
        let width = self.metadata.width;

        debug!("Reading rows {}..{}", first_row, first_row + rows);

        let buffer = rasterband.read_as::<f64>(
            (0, first_row as isize),
            (width, rows),
            (width, rows),
            None,
        )?;

        let data_vec: Vec<f64> = buffer.into_iter().collect();
        let data = Array2::from_shape_vec((rows, width), data_vec)?;

        Ok(data)
    }
}

/// Extract metadata for one band of a dataset without reading pixel data
pub fn extract_metadata_from_dataset(
    path: &str,
    dataset: &Dataset,
    band: usize,
) -> Result<RasterMetadata> {
    let rasterband: RasterBand = dataset
        .rasterband(band)
        .map_err(|e| RasterH3Error::unreadable(path, e))?;

    let width = rasterband.x_size() as usize;
    let height = rasterband.y_size() as usize;
    let nodata = rasterband.no_data_value();
    // Without a geotransform pixels have no coordinates to reproject
    let geotransform = dataset.geo_transform().map_err(|e| {
        RasterH3Error::ReprojectionFailure(format!(
            "raster '{}' has no geotransform: {}",
            path, e
        ))
    })?;

    RasterMetadata::new(
        path,
        width,
        height,
        geotransform,
        dataset.projection(),
        nodata,
    )
}

/// Raster held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryRaster {
    data: Array2<f64>,
    metadata: RasterMetadata,
}

impl InMemoryRaster {
    pub fn new(
        data: Array2<f64>,
        geotransform: [f64; 6],
        projection: impl Into<String>,
        nodata: Option<f64>,
    ) -> Result<Self> {
        let (height, width) = data.dim();
        let metadata = RasterMetadata::new(
            "<memory>",
            width,
            height,
            geotransform,
            projection.into(),
            nodata,
        )?;
        Ok(Self { data, metadata })
    }
}

impl RasterSource for InMemoryRaster {
    fn metadata(&self) -> &RasterMetadata {
        &self.metadata
    }

    fn read_rows(&self, first_row: usize, rows: usize) -> Result<Array2<f64>> {
        Ok(self
            .data
            .slice(s![first_row..first_row + rows, ..])
            .to_owned())
    }
}
