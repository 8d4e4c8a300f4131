use crate::aggregate::{AggregateOptions, OutputMode};
use crate::error::{RasterH3Error, Result};
use crate::output::OutputFormat;
use clap::Parser;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "raster-to-h3")]
#[command(about = "Aggregate raster pixel values into Uber H3 hexagons (GeoJSON or CSV)")]
#[command(version)]
#[command(author = "Huimori Project")]
pub struct Args {
    /// Input raster path (any GDAL-readable format)
    #[arg(short, long, value_name = "FILE")]
    pub input: String,

    /// Output path (.geojson or .csv)
    #[arg(short, long, value_name = "FILE", required_unless_present = "summary_only")]
    pub output: Option<String>,

    /// H3 resolution level (0 = coarsest, 15 = finest)
    #[arg(short, long, value_name = "LEVEL", default_value_t = 9)]
    pub resolution: u8,

    /// Emit centroid points instead of hexagon polygons
    #[arg(long)]
    pub centroid: bool,

    /// Output format (default: inferred from the output extension)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Override nodata value (default: read from input)
    #[arg(long, value_name = "VALUE", allow_negative_numbers = true)]
    pub nodata: Option<f64>,

    /// Raster band to aggregate (1-based)
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub band: usize,

    /// Source CRS for rasters without one, or to override it (e.g. EPSG:32750)
    #[arg(long, value_name = "CRS")]
    pub source_crs: Option<String>,

    /// Rows read and scanned per batch
    #[arg(long, value_name = "ROWS", default_value_t = 256)]
    pub batch_rows: usize,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Exit with an error when no pixel lands in any cell
    #[arg(long)]
    pub fail_on_empty: bool,

    /// Print the raster summary and recommended levels, then exit
    #[arg(long)]
    pub summary_only: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            level: self.resolution,
            mode: if self.centroid {
                OutputMode::Centroid
            } else {
                OutputMode::Geometry
            },
            nodata_override: self.nodata,
            source_crs: self.source_crs.clone(),
            batch_rows: self.batch_rows,
            ..AggregateOptions::default()
        }
    }

    /// Output path and resolved format.
    pub fn output_target(&self) -> Result<(&Path, OutputFormat)> {
        let output = self.output.as_deref().ok_or(RasterH3Error::MissingOutput)?;
        let path = Path::new(output);
        Ok((path, self.format.unwrap_or_else(|| OutputFormat::from_path(path))))
    }
}
