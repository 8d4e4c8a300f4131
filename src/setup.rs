use crate::error::{RasterH3Error, Result};
use env_logger::Env;
use gdal::DriverManager;
use log::{debug, info};

/// Initialise the global logger. `RUST_LOG` overrides the default filter.
pub fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .try_init()
        .map_err(|e| RasterH3Error::Setup(format!("logger already initialised: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentReport {
    pub gdal_version: String,
    pub driver_count: usize,
}

/// Check that GDAL is usable and can read GeoTIFF.
pub fn check_environment() -> Result<EnvironmentReport> {
    DriverManager::register_all();
    let gdal_version = gdal::version::version_info("RELEASE_NAME");
    let driver_count = DriverManager::count() as usize;

    DriverManager::get_driver_by_name("GTiff").map_err(|e| {
        RasterH3Error::Setup(format!("GDAL {} has no GTiff driver: {}", gdal_version, e))
    })?;

    debug!("GDAL {} with {} drivers", gdal_version, driver_count);
    Ok(EnvironmentReport {
        gdal_version,
        driver_count,
    })
}

/// Size the global rayon pool; `None` keeps one thread per core.
pub fn configure_threads(threads: Option<usize>) -> Result<()> {
    match threads {
        Some(0) => Err(RasterH3Error::Setup(
            "thread count must be positive".to_string(),
        )),
        Some(n_threads) => {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .build_global()
                .map_err(|e| RasterH3Error::Setup(format!("failed to build thread pool: {}", e)))?;
            info!("Using {} threads", n_threads);
            Ok(())
        }
        None => {
            info!("Using all available threads");
            Ok(())
        }
    }
}
