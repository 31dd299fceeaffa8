use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::packet::Payload;

/// Fixed-capacity circular array of payload slots with a write and a read cursor.
///
/// The ring does no locking and never compares the two cursors: fullness and
/// readiness are tracked entirely by the [`FlowGate`](super::FlowGate) counts above
/// it. A caller that writes without holding a `fillable` permit can lap the read
/// cursor and overwrite a slot that consumers have not finished with.
pub struct SlotRing {
    slots: Box<[UnsafeCell<Payload>]>,

    // Writer side and reader side live on separate cache lines
    write_index: CachePadded<AtomicUsize>,
    read_index: CachePadded<AtomicUsize>,

    // Suppresses the first write-cursor advance so slot 0 is filled first
    has_written: AtomicBool,
}

// Slot contents are only touched under the FlowGate/rendezvous protocol, see the
// safety contracts on `write_slot` and `read_slot`.
unsafe impl Sync for SlotRing {}

impl SlotRing {
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "slot ring needs at least one slot");

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(Payload::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            write_index: CachePadded::new(AtomicUsize::new(0)),
            read_index: CachePadded::new(AtomicUsize::new(0)),
            has_written: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn write_index(&self) -> usize {
        self.write_index.load(Ordering::Acquire)
    }

    pub fn read_index(&self) -> usize {
        self.read_index.load(Ordering::Acquire)
    }

    /// Store `payload` in the next slot and return that slot's index.
    ///
    /// Every write but the first advances the write cursor before storing.
    ///
    /// # Safety
    /// Only one thread may write at a time, and no thread may be reading the target
    /// slot. The relay guarantees both by writing from the single listener thread
    /// while holding a `fillable` permit.
    pub unsafe fn write_slot(&self, payload: &Payload) -> usize {
        let mut index = self.write_index.load(Ordering::Relaxed);
        if self.has_written.swap(true, Ordering::Relaxed) {
            index = self.next(index);
            self.write_index.store(index, Ordering::Release);
        }

        // SAFETY: exclusive access to this slot is the caller's contract
        unsafe { *self.slots[index].get() = payload.clone() };
        index
    }

    /// Copy of the slot under the read cursor. Does not move any cursor.
    ///
    /// # Safety
    /// The slot under the read cursor must not be written concurrently. The relay
    /// guarantees this by reading only between rendezvous `enter` and `leave`, while
    /// the slot's `fillable` permit is still outstanding.
    pub unsafe fn read_slot(&self) -> Payload {
        let index = self.read_index.load(Ordering::Acquire);
        // SAFETY: no concurrent writer for this slot is the caller's contract
        unsafe { (*self.slots[index].get()).clone() }
    }

    /// Move the read cursor to the next slot, wrapping past the last one.
    /// Returns the new read index.
    ///
    /// Called once per fully consumed slot, by the last consumer to leave it.
    pub fn advance_read(&self) -> usize {
        let next = self.next(self.read_index.load(Ordering::Relaxed));
        self.read_index.store(next, Ordering::Release);
        next
    }

    fn next(&self, index: usize) -> usize {
        if index + 1 == self.slots.len() { 0 } else { index + 1 }
    }
}

impl std::fmt::Debug for SlotRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRing")
            .field("capacity", &self.capacity())
            .field("write_index", &self.write_index())
            .field("read_index", &self.read_index())
            .finish()
    }
}
