use crate::crs::{detect_pixel_units, pixel_size_meters, PixelUnits};
use crate::grid::HexGrid;
use crate::io::RasterMetadata;
use std::fmt;

/// Processing throughput assumed by the duration estimate.
const SECONDS_PER_MEGAPIXEL: f64 = 10.0;
/// Cost growth per level above the optimal one.
const LEVEL_COST_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRecommendation {
    /// Coarsest useful level: cells about ten pixels across.
    pub min: u8,
    /// Cells about one pixel across.
    pub optimal: u8,
    pub max: u8,
}

/// First level whose cell edge is no longer than `size_m`, else the finest.
fn first_level_within<G: HexGrid>(grid: &G, size_m: f64) -> u8 {
    let range = grid.level_range();
    range
        .clone()
        .find(|&level| grid.edge_length_m(level) <= size_m)
        .unwrap_or(*range.end())
}

pub fn recommend_levels<G: HexGrid>(grid: &G, pixel_size_m: f64) -> LevelRecommendation {
    LevelRecommendation {
        min: first_level_within(grid, pixel_size_m * 10.0),
        optimal: first_level_within(grid, pixel_size_m),
        max: *grid.level_range().end(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterSummary {
    pub width: usize,
    pub height: usize,
    pub total_pixels: u64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub units: PixelUnits,
    /// Mean of pixel width and height, in approximate metres.
    pub pixel_size_m: f64,
    pub file_size_bytes: Option<u64>,
    pub recommendation: LevelRecommendation,
    /// Level used for the per-level estimates.
    pub level: u8,
    pub estimated_seconds: f64,
    pub cell_area_km2: f64,
}

impl RasterSummary {
    pub fn from_metadata<G: HexGrid>(
        metadata: &RasterMetadata,
        file_size_bytes: Option<u64>,
        grid: &G,
        level: u8,
    ) -> Self {
        let units = detect_pixel_units(&metadata.projection);
        let center = metadata.pixel_to_crs(metadata.width as f64 / 2.0, metadata.height as f64 / 2.0);
        let avg_pixel = (metadata.pixel_width + metadata.pixel_height) / 2.0;
        let pixel_size_m = pixel_size_meters(avg_pixel, units, center.y);
        let recommendation = recommend_levels(grid, pixel_size_m);

        Self {
            width: metadata.width,
            height: metadata.height,
            total_pixels: metadata.total_pixels(),
            pixel_width: metadata.pixel_width,
            pixel_height: metadata.pixel_height,
            units,
            pixel_size_m,
            file_size_bytes,
            recommendation,
            level,
            estimated_seconds: estimate_seconds(metadata.total_pixels(), level, recommendation.optimal),
            cell_area_km2: grid.cell_area_km2(level),
        }
    }
}

/// Rough run-time estimate: ten seconds per megapixel at the optimal level,
/// growing by 1.5x for each finer level.
pub fn estimate_seconds(total_pixels: u64, level: u8, optimal: u8) -> f64 {
    let exponent = i32::from(level) - i32::from(optimal);
    total_pixels as f64 / 1_000_000.0 * SECONDS_PER_MEGAPIXEL * LEVEL_COST_FACTOR.powi(exponent)
}

fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1} sec", seconds)
    } else {
        format!("{:.1} min", seconds / 60.0)
    }
}

fn format_size(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    if kb < 1024.0 {
        format!("{:.2} KB", kb)
    } else {
        format!("{:.2} MB", kb / 1024.0)
    }
}

impl fmt::Display for RasterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.units {
            PixelUnits::Degrees => "deg",
            PixelUnits::Linear(_) => "units",
            PixelUnits::Unknown => "?",
        };
        writeln!(f, "=== Raster Metadata Summary ===")?;
        writeln!(
            f,
            "Pixel size       : {:.6} x {:.6} {} (~{:.2} m)",
            self.pixel_width, self.pixel_height, unit, self.pixel_size_m
        )?;
        writeln!(
            f,
            "Pixel area       : ~{:.2} m²",
            self.pixel_size_m * self.pixel_size_m
        )?;
        writeln!(f, "Raster dimension : {} cols x {} rows", self.width, self.height)?;
        writeln!(f, "Total pixels     : {}", self.total_pixels)?;
        if let Some(bytes) = self.file_size_bytes {
            writeln!(f, "File size        : {}", format_size(bytes))?;
        }
        writeln!(
            f,
            "H3 recommendation: Min {}, Max {}, Optimal {}",
            self.recommendation.min, self.recommendation.max, self.recommendation.optimal
        )?;
        writeln!(
            f,
            "Est. duration    : {} (level {})",
            format_duration(self.estimated_seconds),
            self.level
        )?;
        write!(
            f,
            "Est. cell area   : ~{:.4} km² / {:.0} m² (level {})",
            self.cell_area_km2,
            self.cell_area_km2 * 1_000_000.0,
            self.level
        )
    }
}
