use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::Cancelled;

/// How often blocked waits re-check the run context.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancellation flag threaded into every blocking wait of the relay.
///
/// Clones observe the same flag. Once cancelled a context stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancelled: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
