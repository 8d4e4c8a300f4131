use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterH3Error {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unreadable raster '{path}': {reason}")]
    UnreadableRaster { path: String, reason: String },

    #[error("Invalid resolution level {level} (supported range {min}..={max})")]
    InvalidResolution { level: u8, min: u8, max: u8 },

    #[error("Reprojection failure: {0}")]
    ReprojectionFailure(String),

    #[error(
        "No H3 cell received a sample ({total_pixels} pixels, {nodata_pixels} nodata, \
         {outside_domain} outside the grid domain)"
    )]
    EmptyResult {
        total_pixels: u64,
        nodata_pixels: u64,
        outside_domain: u64,
    },

    #[error("Processing cancelled after {rows_done}/{total_rows} rows")]
    Cancelled { rows_done: usize, total_rows: usize },

    #[error("Pixel size is non-positive: {0}")]
    InvalidPixelSize(f64),

    #[error("Invalid batch size: {0} rows (must be positive)")]
    InvalidBatchSize(usize),

    #[error("Malformed table at line {line}: {reason}")]
    MalformedTable { line: usize, reason: String },

    #[error("No output path given (use --output, or --summary-only to skip conversion)")]
    MissingOutput,

    #[error("Startup failed: {0}")]
    Setup(String),
}

impl RasterH3Error {
    pub(crate) fn unreadable(path: &str, reason: impl ToString) -> Self {
        RasterH3Error::UnreadableRaster {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RasterH3Error>;
