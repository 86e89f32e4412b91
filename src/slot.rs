//! A pool slot: one interpreter behind one lock.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::engine::Interpreter;

/// Counters private to one slot's interpreter
#[derive(Debug, Clone)]
pub struct SlotGlobals {
    pub created_at: Instant,
    pub last_used: Option<Instant>,
    pub total_requests: u64,
    pub script_faults: u64,
}

impl SlotGlobals {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            last_used: None,
            total_requests: 0,
            script_faults: 0,
        }
    }
}

/// Data protected by the slot lock
pub(crate) struct SlotState<I> {
    pub(crate) interpreter: I,
    pub(crate) globals: SlotGlobals,
}

/// One interpreter instance plus its exclusive lock.
///
/// At most one dispatch executes against the interpreter at a time; every
/// access goes through [`Slot::with_lock`] except module loading, which
/// borrows the slot mutably and therefore cannot overlap a dispatch.
pub struct Slot<I> {
    index: usize,
    state: Mutex<SlotState<I>>,
}

impl<I: Interpreter> Slot<I> {
    pub(crate) fn new(index: usize, interpreter: I) -> Self {
        Self {
            index,
            state: Mutex::new(SlotState {
                interpreter,
                globals: SlotGlobals::new(),
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Run `f` with the slot locked (blocking).
    ///
    /// The lock is released when `f` returns. A lock poisoned by a panic in
    /// an engine is recovered: the interpreter's stack is restored by the
    /// next dispatch's guard.
    pub(crate) fn with_lock<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut SlotState<I>) -> R,
    {
        log::trace!("Acquiring lock for slot {}", self.index);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        log::trace!("Slot {} locked", self.index);

        let result = f(&mut state);

        log::trace!("Slot {} unlocked", self.index);
        result
    }

    /// Access the slot without locking; exclusive borrow rules out dispatch.
    pub(crate) fn get_mut(&mut self) -> &mut SlotState<I> {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the slot-local counters
    pub fn globals(&self) -> SlotGlobals {
        self.with_lock(|state| state.globals.clone())
    }

    /// Inspect the interpreter with the slot locked.
    pub fn inspect<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&I) -> R,
    {
        self.with_lock(|state| f(&state.interpreter))
    }
}

impl<I> Drop for Slot<I> {
    fn drop(&mut self) {
        tracing::trace!("Tearing down interpreter for slot {}", self.index);
    }
}
