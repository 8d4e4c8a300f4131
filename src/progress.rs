use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started {
        width: usize,
        height: usize,
        level: u8,
    },
    Coverage {
        candidate_cells: Option<usize>,
    },
    RowsProcessed {
        rows_done: usize,
        total_rows: usize,
    },
    Finished {
        cells: usize,
        sampled_pixels: u64,
    },
    Empty,
    Cancelled {
        rows_done: usize,
    },
}

impl ProgressEvent {
    /// Completion in percent, for events that carry it.
    pub fn percent(&self) -> Option<u8> {
        match self {
            ProgressEvent::RowsProcessed {
                rows_done,
                total_rows,
            } if *total_rows > 0 => Some((rows_done * 100 / total_rows) as u8),
            ProgressEvent::Finished { .. } | ProgressEvent::Empty => Some(100),
            _ => None,
        }
    }
}

pub trait ProgressObserver: Sync {
    fn on_event(&self, event: &ProgressEvent);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Discards all events.
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Shared cancellation switch, cheap to clone into another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Writes events through the `log` facade.
#[derive(Debug, Clone, Default)]
pub struct LogObserver {
    cancel: CancelFlag,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_flag(cancel: CancelFlag) -> Self {
        Self { cancel }
    }
}

impl ProgressObserver for LogObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started {
                width,
                height,
                level,
            } => info!(
                "Converting {}x{} raster to H3 level {}",
                width, height, level
            ),
            ProgressEvent::Coverage {
                candidate_cells: Some(n),
            } => info!("{} candidate H3 cells cover the raster extent", n),
            ProgressEvent::Coverage {
                candidate_cells: None,
            } => info!("Raster extent too large to enumerate candidate cells up front"),
            ProgressEvent::RowsProcessed {
                rows_done,
                total_rows,
            } => info!(
                "Processing row {}/{} ({}%)",
                rows_done,
                total_rows,
                event.percent().unwrap_or(0)
            ),
            ProgressEvent::Finished {
                cells,
                sampled_pixels,
            } => info!(
                "Aggregated {} pixels into {} H3 cells",
                sampled_pixels, cells
            ),
            ProgressEvent::Empty => warn!("No pixels were assigned to any H3 cell"),
            ProgressEvent::Cancelled { rows_done } => {
                warn!("Process cancelled after {} rows", rows_done)
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_set()
    }
}
