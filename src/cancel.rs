//! Cooperative cancellation for long merges

use crate::error::{SortError, SortResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that another thread can trip to abort a sort.
///
/// The sorter polls it once per merged or emitted record, so cancellation
/// surfaces at the next record boundary rather than immediately.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Checkpoint: `Err(Cancelled)` once the token has been tripped
    #[inline]
    pub fn check(&self) -> SortResult<()> {
        if self.is_cancelled() {
            Err(SortError::Cancelled)
        } else {
            Ok(())
        }
    }
}
