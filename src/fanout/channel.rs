use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::RunContext;
use crate::error::Cancelled;
use crate::packet::Payload;

use super::{ConsumerRendezvous, FlowGate, SlotRing};

/// Shared state of one fan-out relay: the slot ring, its flow gate and the
/// consumer rendezvous sized to the destination count.
///
/// A cancelled wait leaves the rendezvous counters mid-round, so the first
/// `Cancelled` seen by any publisher or subscriber closes the channel for good.
#[derive(Debug)]
pub struct FanoutChannel {
    ring: SlotRing,
    gate: FlowGate,
    rendezvous: ConsumerRendezvous,
    closed: AtomicBool,
}

impl FanoutChannel {
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn group_size(&self) -> usize {
        self.rendezvous.group_size()
    }

    pub fn read_index(&self) -> usize {
        self.ring.read_index()
    }

    pub fn write_index(&self) -> usize {
        self.ring.write_index()
    }

    pub fn fillable(&self) -> usize {
        self.gate.fillable()
    }

    pub fn consumable(&self) -> usize {
        self.gate.consumable()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), Cancelled> {
        if self.is_closed() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    fn close_on_cancel<T>(&self, result: Result<T, Cancelled>) -> Result<T, Cancelled> {
        if result.is_err() {
            self.closed.store(true, Ordering::Release);
        }
        result
    }
}

/// Creates a channel with `capacity` slots and exactly `group_size` subscribers.
///
/// The single [`Publisher`] and the subscribers are the only way to touch slot
/// contents, which is what makes the unsynchronized ring safe to share. Every
/// subscriber must keep consuming: one that stops leaves its peers blocked in the
/// rendezvous until the run context is cancelled, which also closes the channel.
///
/// # Panics
/// If `capacity` or `group_size` is zero.
pub fn fanout_channel(capacity: usize, group_size: usize) -> (Publisher, Vec<Subscriber>) {
    let channel = Arc::new(FanoutChannel {
        ring: SlotRing::new(capacity),
        gate: FlowGate::new(capacity),
        rendezvous: ConsumerRendezvous::new(group_size),
        closed: AtomicBool::new(false),
    });

    let subscribers = (0..group_size)
        .map(|member| Subscriber {
            channel: channel.clone(),
            member,
        })
        .collect();

    (Publisher { channel }, subscribers)
}

/// Producer end, owned by the listener
#[derive(Debug)]
pub struct Publisher {
    channel: Arc<FanoutChannel>,
}

impl Publisher {
    /// Wait for a free slot, store `payload` in it and announce it to the group.
    /// Returns the slot index written.
    pub fn publish(&mut self, payload: &Payload, ctx: &RunContext) -> Result<usize, Cancelled> {
        let result = self.try_publish(payload, ctx);
        self.channel.close_on_cancel(result)
    }

    fn try_publish(&mut self, payload: &Payload, ctx: &RunContext) -> Result<usize, Cancelled> {
        let channel = &*self.channel;
        channel.check_open()?;
        channel.gate.wait_fillable(ctx)?;
        channel.check_open()?;

        // SAFETY: `&mut self` on the only publisher serializes writers. Fillable
        // permits are only handed back by the last of a full group to leave a slot,
        // after every member finished relaying it.
        let index = unsafe { channel.ring.write_slot(payload) };

        channel.gate.signal_consumable();
        Ok(index)
    }

    pub fn channel(&self) -> &Arc<FanoutChannel> {
        &self.channel
    }
}

/// What a subscriber saw during one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed<R> {
    /// Slot the payload was read from
    pub slot: usize,
    /// Value returned by the relay closure
    pub output: R,
    /// Whether this subscriber was the last to leave and advanced the read cursor
    pub advanced: bool,
}

/// Consumer end, one per destination
#[derive(Debug)]
pub struct Subscriber {
    channel: Arc<FanoutChannel>,
    member: usize,
}

impl Subscriber {
    pub fn member(&self) -> usize {
        self.member
    }

    /// Run one cycle: wait for admission, enter the rendezvous, hand the current
    /// slot's payload to `relay`, then leave. Every group member sees the same
    /// payload in a cycle.
    ///
    /// Fails with `Cancelled` once the channel is closed, whatever `ctx` says.
    pub fn consume<R>(
        &mut self,
        ctx: &RunContext,
        relay: impl FnOnce(&Payload) -> R,
    ) -> Result<Consumed<R>, Cancelled> {
        let result = self.try_consume(ctx, relay);
        self.channel.close_on_cancel(result)
    }

    fn try_consume<R>(
        &mut self,
        ctx: &RunContext,
        relay: impl FnOnce(&Payload) -> R,
    ) -> Result<Consumed<R>, Cancelled> {
        let channel = &*self.channel;
        channel.check_open()?;
        channel.gate.wait_consumable(ctx)?;
        channel.rendezvous.enter(&channel.gate, ctx)?;
        // A peer cancelled at the entry barrier may have let this group through short
        channel.check_open()?;

        let slot = channel.ring.read_index();
        // SAFETY: between enter and leave the slot's fillable permit is still
        // outstanding, so the publisher cannot be writing it.
        let payload = unsafe { channel.ring.read_slot() };
        let output = relay(&payload);
        channel.check_open()?;

        let advanced = channel
            .rendezvous
            .leave(&channel.ring, &channel.gate, ctx)?;
        Ok(Consumed {
            slot,
            output,
            advanced,
        })
    }
}
