use parking_lot::{Condvar, Mutex};

use crate::context::{POLL_INTERVAL, RunContext};
use crate::error::Cancelled;

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// Reusable barrier for a fixed number of parties.
///
/// All parties are released together once the last one arrives, after which the
/// barrier is ready for the next round. A party that never arrives keeps the others
/// blocked until the run context is cancelled.
#[derive(Debug)]
pub struct Barrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl Barrier {
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Block until all parties have arrived. Returns `true` for the party that
    /// completed the round. A cancelled context never arrives.
    pub fn wait(&self, ctx: &RunContext) -> Result<bool, Cancelled> {
        ctx.check()?;
        let mut state = self.state.lock();
        let round = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(true);
        }

        while state.generation == round {
            ctx.check()?;
            self.released.wait_for(&mut state, POLL_INTERVAL);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_party_never_blocks() {
        let ctx = RunContext::new();
        let barrier = Barrier::new(1);
        assert_eq!(barrier.wait(&ctx), Ok(true));
        assert_eq!(barrier.wait(&ctx), Ok(true));
    }

    #[test]
    fn test_releases_all_parties_per_round() {
        let ctx = RunContext::new();
        let barrier = Arc::new(Barrier::new(3));
        let leaders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = barrier.clone();
                let leaders = leaders.clone();
                let ctx = ctx.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        if barrier.wait(&ctx).unwrap() {
                            leaders.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_cancelled_party_does_not_complete_round() {
        let ctx = RunContext::new();
        let barrier = Barrier::new(1);
        ctx.cancel();

        assert_eq!(barrier.wait(&ctx), Err(Cancelled));
        assert_eq!(barrier.wait(&RunContext::new()), Ok(true));
    }

    #[test]
    fn test_missing_party_blocks_until_cancel() {
        let ctx = RunContext::new();
        let barrier = Arc::new(Barrier::new(2));

        let waiter = {
            let barrier = barrier.clone();
            let ctx = ctx.clone();
            thread::spawn(move || barrier.wait(&ctx))
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());

        ctx.cancel();
        assert_eq!(waiter.join().unwrap(), Err(Cancelled));
    }
}
