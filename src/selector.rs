//! Round-robin slot selection.

use std::sync::atomic::{AtomicI32, Ordering};

/// Maps incoming events onto slot indices.
///
/// Each call takes the next value of a 32-bit counter and reduces it modulo
/// the pool capacity. The counter wraps on overflow; the index is always
/// taken with `rem_euclid` so it stays in `[0, capacity)` once the counter
/// goes negative. Distribution is advisory, not a scheduling guarantee.
#[derive(Debug)]
pub struct SlotSelector {
    counter: AtomicI32,
    capacity: i32,
}

impl SlotSelector {
    /// `capacity` must be in `1..=i32::MAX` (checked by `PoolConfig::validate`).
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, 0)
    }

    pub(crate) fn starting_at(capacity: usize, start: i32) -> Self {
        debug_assert!((1..=i32::MAX as usize).contains(&capacity));

        Self {
            counter: AtomicI32::new(start),
            capacity: capacity as i32,
        }
    }

    pub fn next_slot(&self) -> usize {
        // fetch_add wraps on overflow
        let value = self.counter.fetch_add(1, Ordering::Relaxed);
        value.rem_euclid(self.capacity) as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }
}
