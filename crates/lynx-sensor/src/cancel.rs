//! Cooperative cancellation for blocking capture loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation handle shared between the caller and a capture loop
///
/// A fresh token is issued for every scan or enrollment. Cancelling is
/// one-way; to "clear" cancellation the caller issues a new token. The loop
/// only observes the flag between failed capture attempts, so latency is
/// bounded by one capture poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
