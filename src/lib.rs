// Library exports for testing and reuse

pub mod aggregate;
pub mod chunking;
pub mod cli;
pub mod crs;
pub mod error;
pub mod grid;
pub mod io;
pub mod output;
pub mod progress;
pub mod setup;
pub mod summary;

// Re-export commonly used types
pub use aggregate::{
    aggregate, AggregateOptions, AggregateRecord, AggregationReport, OutputCollection, OutputMode,
    ScanStats,
};
pub use error::{RasterH3Error, Result};
pub use grid::{CellId, H3Grid, HexGrid};
pub use io::{GdalRaster, InMemoryRaster, RasterMetadata, RasterSource};
pub use output::{write_output, OutputFormat};
pub use progress::{CancelFlag, LogObserver, ProgressEvent, ProgressObserver};
