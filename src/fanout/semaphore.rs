use parking_lot::{Condvar, Mutex};

use crate::context::{POLL_INTERVAL, RunContext};
use crate::error::Cancelled;

/// Counting semaphore whose waits can be interrupted through a [`RunContext`]
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Take one permit, blocking while none are left. A cancelled context never
    /// takes a permit, even if one is available.
    pub fn wait(&self, ctx: &RunContext) -> Result<(), Cancelled> {
        ctx.check()?;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            ctx.check()?;
            self.available.wait_for(&mut permits, POLL_INTERVAL);
        }
        *permits -= 1;
        Ok(())
    }

    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    pub fn post(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}
