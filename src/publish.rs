//! Cross-core frame publisher
//!
//! A triple buffer: the producer owns a back slot, the consumer owns a front
//! slot, and a third "middle" slot is exchanged through one atomic word.
//! Publishing writes the back slot and swaps it into the middle with a fresh
//! bit set; reading swaps the middle out only when that bit is set. Neither
//! side ever waits on the other, and a slot is only ever touched by the side
//! that currently owns it, so a frame can never be observed half-written.
//!
//! # Safety Contract
//!
//! - Exactly one [`Publisher`] and one [`Subscriber`] exist per channel; the
//!   handles are `Send` but not `Clone`.
//! - The index word always holds the one slot index not owned by either
//!   handle, so the three indices form a permutation of `0..3`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::analysis::FeatureFrame;

const INDEX_MASK: u8 = 0b011;
const FRESH_BIT: u8 = 0b100;

/// Consumer-side view of whether a read returned anything new
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Sequence advanced since the previous read
    Fresh,
    /// Same sequence as the previous read; the producer has not published
    Stale,
}

#[derive(Clone, Copy, Default)]
struct Slot<T> {
    value: T,
    sequence: u64,
}

struct Shared<T> {
    slots: [UnsafeCell<Slot<T>>; 3],
    middle: AtomicU8,
}

// SAFETY: each slot is accessed by at most one handle at a time. Ownership of
// a slot only changes hands through the AcqRel swap on `middle`, which orders
// the previous owner's accesses before the next owner's.
unsafe impl<T: Send> Sync for Shared<T> {}

/// Producer handle
pub struct Publisher<T = FeatureFrame> {
    shared: Arc<Shared<T>>,
    back: u8,
    sequence: u64,
}

/// Consumer handle
pub struct Subscriber<T = FeatureFrame> {
    shared: Arc<Shared<T>>,
    front: u8,
    last_sequence: u64,
}

/// Create a connected publisher/subscriber pair
///
/// Until the first publish the subscriber reads `T::default()` at sequence 0.
pub fn channel<T: Copy + Default + Send>() -> (Publisher<T>, Subscriber<T>) {
    let shared = Arc::new(Shared {
        slots: [
            UnsafeCell::new(Slot::default()),
            UnsafeCell::new(Slot::default()),
            UnsafeCell::new(Slot::default()),
        ],
        middle: AtomicU8::new(1),
    });
    (
        Publisher {
            shared: Arc::clone(&shared),
            back: 0,
            sequence: 0,
        },
        Subscriber {
            shared,
            front: 2,
            last_sequence: 0,
        },
    )
}

impl<T: Copy> Publisher<T> {
    /// Publish a value, returning its sequence number
    ///
    /// O(1), wait-free and allocation-free.
    pub fn publish(&mut self, value: &T) -> u64 {
        self.sequence += 1;
        // SAFETY: `back` is owned exclusively by this handle until the swap.
        unsafe {
            let slot = &mut *self.shared.slots[self.back as usize].get();
            slot.value = *value;
            slot.sequence = self.sequence;
        }
        // Release publishes the slot write; Acquire takes ownership of the
        // slot the subscriber last released.
        let previous = self
            .shared
            .middle
            .swap(self.back | FRESH_BIT, Ordering::AcqRel);
        self.back = previous & INDEX_MASK;
        self.sequence
    }

    /// Sequence number of the most recent publish (0 before the first)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl<T: Copy> Subscriber<T> {
    /// Copy of the most recently published value and its sequence number
    ///
    /// O(1) and wait-free. Reading twice without an intervening publish
    /// returns the same sequence.
    pub fn read_latest(&mut self) -> (T, u64) {
        if self.shared.middle.load(Ordering::Relaxed) & FRESH_BIT != 0 {
            let previous = self.shared.middle.swap(self.front, Ordering::AcqRel);
            self.front = previous & INDEX_MASK;
        }
        // SAFETY: `front` is owned exclusively by this handle until the next swap.
        let slot = unsafe { *self.shared.slots[self.front as usize].get() };
        self.last_sequence = slot.sequence;
        (slot.value, slot.sequence)
    }

    /// Like [`read_latest`](Self::read_latest), classifying the result against the previous read
    pub fn read_with_freshness(&mut self) -> (T, u64, Freshness) {
        let previous = self.last_sequence;
        let (value, sequence) = self.read_latest();
        let freshness = if sequence > previous {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };
        (value, sequence, freshness)
    }

    /// True when a publish has happened since the last read
    pub fn has_update(&self) -> bool {
        self.shared.middle.load(Ordering::Acquire) & FRESH_BIT != 0
    }

    /// Sequence returned by the most recent read
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}
