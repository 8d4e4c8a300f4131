use crate::error::{RasterH3Error, Result};
use log::debug;

/// A contiguous block of raster rows scanned as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBand {
    pub first_row: usize,
    pub rows: usize,
}

impl RowBand {
    pub fn end_row(&self) -> usize {
        self.first_row + self.rows
    }
}

/// Partition of a raster's rows into bands of at most `batch_rows` rows.
pub struct RowBands {
    raster_height: usize,
    batch_rows: usize,
    pub total_bands: usize,
}

impl RowBands {
    pub fn new(raster_height: usize, batch_rows: usize) -> Result<Self> {
        if batch_rows == 0 {
            return Err(RasterH3Error::InvalidBatchSize(batch_rows));
        }

        let total_bands = raster_height.div_ceil(batch_rows);

        debug!(
            "RowBands: {} rows, batch_rows={} → {} bands",
            raster_height, batch_rows, total_bands
        );

        Ok(Self {
            raster_height,
            batch_rows,
            total_bands,
        })
    }

    pub fn iter(&self) -> RowBandIterator<'_> {
        RowBandIterator {
            bands: self,
            current_idx: 0,
        }
    }

    pub fn get_band(&self, band_idx: usize) -> RowBand {
        let first_row = band_idx * self.batch_rows;
        let end_row = ((band_idx + 1) * self.batch_rows).min(self.raster_height);
        RowBand {
            first_row,
            rows: end_row - first_row,
        }
    }
}

pub struct RowBandIterator<'a> {
    bands: &'a RowBands,
    current_idx: usize,
}

impl Iterator for RowBandIterator<'_> {
    type Item = (usize, RowBand);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx < self.bands.total_bands {
            let band = self.bands.get_band(self.current_idx);
            let idx = self.current_idx;
            self.current_idx += 1;
            Some((idx, band))
        } else {
            None
        }
    }
}
