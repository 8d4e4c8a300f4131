use clap::Parser;
use log::{info, warn};
use raster_to_h3::cli::Args;
use raster_to_h3::summary::RasterSummary;
use raster_to_h3::{
    aggregate, setup, write_output, GdalRaster, H3Grid, HexGrid, LogObserver, RasterSource,
    Result,
};

fn main() -> Result<()> {
    let args = Args::parse();

    setup::init_logging(args.verbose)?;

    info!("=== Raster to H3 Converter ===");

    let env = setup::check_environment()?;
    info!("GDAL {} ({} drivers)", env.gdal_version, env.driver_count);

    setup::configure_threads(args.threads)?;

    let grid = H3Grid::new();
    // Fail on a bad level before touching the input
    grid.validate_level(args.resolution)?;

    // Read input raster
    info!("Reading input raster: {}", args.input);
    let raster = GdalRaster::open(&args.input, args.band)?;
    let metadata = raster.metadata();

    info!("Raster size: {}x{}", metadata.width, metadata.height);

    // Warn if pixels are not square
    if (metadata.pixel_width - metadata.pixel_height).abs() > 1e-9 {
        warn!(
            "Non-square pixels detected ({:.6} x {:.6})",
            metadata.pixel_width, metadata.pixel_height
        );
    }

    let file_size = std::fs::metadata(&args.input).ok().map(|m| m.len());
    let summary = RasterSummary::from_metadata(metadata, file_size, &grid, args.resolution);
    for line in summary.to_string().lines() {
        info!("{}", line);
    }

    if args.summary_only {
        return Ok(());
    }

    let (output, format) = args.output_target()?;

    let options = args.aggregate_options();
    let report = aggregate(&raster, &grid, &options, &LogObserver::new())?;

    // Release the input dataset before writing
    drop(raster);

    let stats = report.stats;
    let collection = if args.fail_on_empty {
        report.into_non_empty()?
    } else {
        report.collection
    };

    write_output(&collection, output, format)?;

    info!("=== Raster to H3 Extraction Summary ===");
    info!("Raster file     : {}", args.input);
    info!("H3 resolution   : {}", args.resolution);
    info!("Total H3 cells  : {}", collection.len());
    info!(
        "Pixels sampled  : {} ({} nodata, {} outside grid)",
        stats.sampled_pixels, stats.nodata_pixels, stats.outside_domain
    );
    info!("=== Done! ===");
    Ok(())
}
