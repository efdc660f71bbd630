//! Cooperative cancellation.
//!
//! Cancellation is only observed between chunks and between phases, never
//! in the middle of a register write or control transfer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hostflash_errors::{Result, UpdateError};

/// A clonable cancellation flag shared between the caller and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Return `Cancelled` if cancellation has been requested.
    ///
    /// # Errors
    ///
    /// `Cancelled` naming `point` when the token is set.
    pub fn check(&self, point: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(UpdateError::cancelled(point.to_string()));
        }
        Ok(())
    }
}
