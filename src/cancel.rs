//! Cooperative cancellation shared by every receive loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Write-once cancellation flag.
///
/// Clones share the same flag. Once cancelled it stays cancelled; a
/// cancelled app cannot be restarted in place.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that flipped it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
