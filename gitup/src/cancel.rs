//! Cooperative cancellation shared across the workflow.
//!
//! Ctrl-C trips a [`CancelToken`]; every blocking point (the supervisor's
//! output loop, prompts, phase boundaries in the sync engine) polls the
//! token and propagates [`Cancelled`] through `Result` instead of relying
//! on asynchronous interruption of another thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error value propagated when the user interrupts the run.
///
/// Recognized with `err.is::<Cancelled>()` so callers can distinguish
/// "user cancelled" from "operation failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cancelled by user")]
pub struct Cancelled;

/// Shared flag set by the Ctrl-C handler and polled at every blocking point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been tripped.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
