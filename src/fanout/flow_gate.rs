use crate::context::RunContext;
use crate::error::Cancelled;

use super::Semaphore;

/// Producer/consumer handoff for the slot ring: `fillable` counts slots the
/// listener may write, `consumable` hands out admission tokens to relay workers.
///
/// The gate only waits and signals. Turning one `consumable` token into a whole
/// consumer group is the rendezvous' job, through [`admit_one_more`](Self::admit_one_more).
#[derive(Debug)]
pub struct FlowGate {
    fillable: Semaphore,
    consumable: Semaphore,
}

impl FlowGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            fillable: Semaphore::new(capacity),
            consumable: Semaphore::new(0),
        }
    }

    /// Listener side: block until a slot may be written
    pub fn wait_fillable(&self, ctx: &RunContext) -> Result<(), Cancelled> {
        self.fillable.wait(ctx)
    }

    /// Hand a drained slot back to the listener
    pub fn signal_fillable(&self) {
        self.fillable.post();
    }

    /// Worker side: block until admitted to a populated slot
    pub fn wait_consumable(&self, ctx: &RunContext) -> Result<(), Cancelled> {
        self.consumable.wait(ctx)
    }

    /// Announce one freshly written slot
    pub fn signal_consumable(&self) {
        self.consumable.post();
    }

    /// Pass the current admission token on to one more waiting worker
    pub fn admit_one_more(&self) {
        self.consumable.post();
    }

    pub fn fillable(&self) -> usize {
        self.fillable.available()
    }

    pub fn consumable(&self) -> usize {
        self.consumable.available()
    }
}
