//! Cooperative cancellation.
//!
//! A `CancelToken` is cloned into every long-running call and checked at
//! scan entry boundaries, task dispatch, before each copy and between copy
//! chunks. It never interrupts an in-flight syscall.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a call to `CancelToken::cancel` meant for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// First request: drain gracefully
    First,
    /// Any later request: the caller should terminate immediately
    Repeated,
}

/// Shared, set-once cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requests: Arc<AtomicUsize>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) -> SignalOutcome {
        if self.requests.fetch_add(1, Ordering::SeqCst) == 0 {
            SignalOutcome::First
        } else {
            SignalOutcome::Repeated
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.requests.load(Ordering::Relaxed) > 0
    }
}
