use parking_lot::Mutex;

use crate::context::RunContext;
use crate::error::Cancelled;

use super::{Barrier, FlowGate, SlotRing};

/// Two-phase barrier protocol that admits exactly `group_size` consumers to the
/// slot under the read cursor and lets the last one out advance it.
///
/// One `consumable` token admits the whole group: every consumer that enters,
/// except the last, passes the token on with [`FlowGate::admit_one_more`]. The entry
/// barrier then releases the group together, and the exit barrier keeps anyone from
/// starting the next cycle before every peer has finished this one.
///
/// The counters are each guarded by their own mutex, held only for the
/// check-and-increment and never across a barrier wait.
#[derive(Debug)]
pub struct ConsumerRendezvous {
    group_size: usize,
    enter_count: Mutex<usize>,
    leave_count: Mutex<usize>,
    enter_barrier: Barrier,
    exit_barrier: Barrier,
}

impl ConsumerRendezvous {
    /// # Panics
    /// If `group_size` is zero.
    pub fn new(group_size: usize) -> Self {
        assert!(group_size > 0, "consumer group needs at least one member");
        Self {
            group_size,
            enter_count: Mutex::new(0),
            leave_count: Mutex::new(0),
            enter_barrier: Barrier::new(group_size),
            exit_barrier: Barrier::new(group_size),
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Entry phase, called after taking a `consumable` token. Returns once the
    /// whole group has entered.
    pub fn enter(&self, gate: &FlowGate, ctx: &RunContext) -> Result<(), Cancelled> {
        let mut entered = self.enter_count.lock();
        if *entered < self.group_size {
            *entered += 1;
            let admitted = *entered;
            drop(entered);

            if admitted != self.group_size {
                gate.admit_one_more();
            }
        } else {
            drop(entered);
        }

        self.enter_barrier.wait(ctx)?;
        *self.enter_count.lock() = 0;
        Ok(())
    }

    /// Exit phase, called after relaying the slot. The last consumer to arrive
    /// advances the read cursor and hands the slot back to the producer; it alone
    /// gets `true`. Returns once the whole group has left.
    pub fn leave(
        &self,
        ring: &SlotRing,
        gate: &FlowGate,
        ctx: &RunContext,
    ) -> Result<bool, Cancelled> {
        let last = {
            let mut left = self.leave_count.lock();
            *left += 1;
            if *left == self.group_size {
                ring.advance_read();
                gate.signal_fillable();
                true
            } else {
                false
            }
        };

        self.exit_barrier.wait(ctx)?;
        *self.leave_count.lock() = 0;
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Payload;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Group {
        ring: SlotRing,
        gate: FlowGate,
        rendezvous: ConsumerRendezvous,
    }

    fn group(capacity: usize, size: usize) -> Arc<Group> {
        Arc::new(Group {
            ring: SlotRing::new(capacity),
            gate: FlowGate::new(capacity),
            rendezvous: ConsumerRendezvous::new(size),
        })
    }

    fn fill_one(group: &Group, ctx: &RunContext, bytes: &[u8]) {
        group.gate.wait_fillable(ctx).unwrap();
        unsafe { group.ring.write_slot(&Payload::from_slice(bytes).unwrap()) };
        group.gate.signal_consumable();
    }

    #[test]
    fn test_single_member_group() {
        let ctx = RunContext::new();
        let g = group(2, 1);
        fill_one(&g, &ctx, b"solo");

        g.gate.wait_consumable(&ctx).unwrap();
        g.rendezvous.enter(&g.gate, &ctx).unwrap();
        assert_eq!(g.gate.consumable(), 0);

        assert_eq!(g.rendezvous.leave(&g.ring, &g.gate, &ctx), Ok(true));
        assert_eq!(g.ring.read_index(), 1);
        assert_eq!(g.gate.fillable(), 2);
    }

    #[test]
    fn test_one_token_admits_whole_group() {
        let ctx = RunContext::new();
        let g = group(4, 3);
        let lasts = Arc::new(AtomicUsize::new(0));
        fill_one(&g, &ctx, b"x");

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let g = g.clone();
                let ctx = ctx.clone();
                let lasts = lasts.clone();
                thread::spawn(move || {
                    g.gate.wait_consumable(&ctx).unwrap();
                    g.rendezvous.enter(&g.gate, &ctx).unwrap();
                    let seen = unsafe { g.ring.read_slot() };
                    if g.rendezvous.leave(&g.ring, &g.gate, &ctx).unwrap() {
                        lasts.fetch_add(1, Ordering::Relaxed);
                    }
                    seen
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().as_bytes(), b"x");
        }
        assert_eq!(lasts.load(Ordering::Relaxed), 1);
        assert_eq!(g.ring.read_index(), 1);
        assert_eq!(g.gate.consumable(), 0);
        assert_eq!(g.gate.fillable(), 4);
    }

    #[test]
    fn test_cursor_stays_put_until_all_leave() {
        let ctx = RunContext::new();
        let g = group(2, 2);
        fill_one(&g, &ctx, b"x");

        let slow = {
            let g = g.clone();
            let ctx = ctx.clone();
            thread::spawn(move || {
                g.gate.wait_consumable(&ctx).unwrap();
                g.rendezvous.enter(&g.gate, &ctx).unwrap();
                thread::sleep(Duration::from_millis(100));
                g.rendezvous.leave(&g.ring, &g.gate, &ctx).unwrap()
            })
        };

        g.gate.wait_consumable(&ctx).unwrap();
        g.rendezvous.enter(&g.gate, &ctx).unwrap();
        // The fast member has finished relaying but its peer has not
        let fast = {
            let g = g.clone();
            let ctx = ctx.clone();
            thread::spawn(move || g.rendezvous.leave(&g.ring, &g.gate, &ctx).unwrap())
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(g.ring.read_index(), 0);
        assert_eq!(g.gate.fillable(), 1);

        let last_flags = [fast.join().unwrap(), slow.join().unwrap()];
        assert_eq!(last_flags, [false, true]);
        assert_eq!(g.ring.read_index(), 1);
    }

    #[test]
    fn test_missing_member_deadlocks_until_cancel() {
        let ctx = RunContext::new();
        let g = group(2, 3);
        fill_one(&g, &ctx, b"x");

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let g = g.clone();
                let ctx = ctx.clone();
                thread::spawn(move || {
                    g.gate.wait_consumable(&ctx)?;
                    g.rendezvous.enter(&g.gate, &ctx)
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(150));
        assert!(handles.iter().all(|h| !h.is_finished()));
        // Third admission token is waiting for a member that never comes
        assert_eq!(g.gate.consumable(), 1);

        ctx.cancel();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Err(Cancelled));
        }
        assert_eq!(g.ring.read_index(), 0);
    }
}
