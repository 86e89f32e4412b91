//! Fixed-size interpreter pool.
//!
//! A pool is built once with all of its slots, never resized, and torn down
//! as a whole. Transactions are spread over the slots round-robin by the
//! pool's own [`SlotSelector`]; when two land on the same slot the second
//! waits for the slot lock. There is no eviction and no per-request
//! interpreter creation: the bound on live interpreters is the point.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::config::{InstanceConfig, PoolConfig};
use crate::engine::{Interpreter, ScriptEngine};
use crate::error::HookError;
use crate::selector::SlotSelector;
use crate::slot::Slot;

/// Pool-wide counters, shared with the execution contexts the pool creates
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) dispatched: AtomicU64,
    pub(crate) contexts_created: AtomicU64,
    pub(crate) live_contexts: AtomicUsize,
    pub(crate) script_faults: AtomicU64,
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of slots
    pub capacity: usize,
    /// Dispatches that reached a slot
    pub dispatched: u64,
    /// Execution contexts created so far
    pub contexts_created: u64,
    /// Execution contexts waiting for their transaction to close
    pub live_contexts: usize,
    /// Entry point invocations that faulted
    pub script_faults: u64,
}

/// Fixed-capacity set of interpreter slots serving one hook path
pub struct ContextPool<I: Interpreter> {
    name: &'static str,
    slots: Box<[Slot<I>]>,
    selector: SlotSelector,
    counters: Arc<PoolCounters>,
}

impl<I: Interpreter> ContextPool<I> {
    /// Create a pool and one interpreter per slot.
    ///
    /// If any interpreter fails to initialize, the ones already built are
    /// torn down before the error is returned.
    pub fn create<E>(name: &'static str, engine: &E, config: &PoolConfig) -> Result<Self, HookError>
    where
        E: ScriptEngine<Interpreter = I>,
    {
        config.validate()?;

        tracing::info!(
            "Initializing {} pool with {} slots (engine: {})",
            name,
            config.capacity,
            engine.name()
        );

        let start = Instant::now();
        let mut slots = Vec::with_capacity(config.capacity);

        for index in 0..config.capacity {
            match engine.create_interpreter(index) {
                Ok(interpreter) => slots.push(Slot::new(index, interpreter)),
                Err(reason) => {
                    tracing::error!(
                        "Interpreter creation failed for {} pool slot {}: {}, tearing down {} slots",
                        name,
                        index,
                        reason,
                        slots.len()
                    );
                    drop(slots);

                    return Err(HookError::Initialization {
                        pool: name,
                        slot: index,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            "{} pool ready: {} interpreters created in {:?}",
            name,
            config.capacity,
            start.elapsed()
        );

        Ok(Self {
            name,
            slots: slots.into_boxed_slice(),
            selector: SlotSelector::new(config.capacity),
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Load a script into every slot, in index order.
    ///
    /// Takes `&mut self`: no dispatch can run while modules are loading, so
    /// slots are not locked. Stops at the first failing slot.
    pub fn add_module(&mut self, conf: &InstanceConfig) -> Result<(), HookError> {
        let start = Instant::now();
        let name = self.name;

        for slot in self.slots.iter_mut() {
            let index = slot.index();
            let state = slot.get_mut();

            if let Err(reason) = state
                .interpreter
                .load_module(conf, conf.loader_args())
            {
                tracing::error!(
                    "Failed to load {} into {} pool slot {}: {}",
                    conf.script(),
                    name,
                    index,
                    reason
                );

                return Err(HookError::Initialization {
                    pool: name,
                    slot: index,
                    reason: format!("failed to load {}: {}", conf.script(), reason),
                });
            }
        }

        tracing::info!(
            "Loaded {} (instance {}) into {} slots of {} pool in {:?}",
            conf.script(),
            conf.id(),
            self.slots.len(),
            name,
            start.elapsed()
        );

        Ok(())
    }

    /// Tear down every interpreter.
    pub fn destroy(self) {
        let stats = self.stats();

        tracing::info!(
            "Destroying {} pool ({} slots, {} dispatches, {} live contexts)",
            self.name,
            stats.capacity,
            stats.dispatched,
            stats.live_contexts
        );
    }

    /// Pick the next slot for an incoming event.
    pub(crate) fn select(&self) -> &Slot<I> {
        let index = self.selector.next_slot();
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        &self.slots[index]
    }

    pub(crate) fn counters(&self) -> &Arc<PoolCounters> {
        &self.counters
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot<I>> {
        self.slots.get(index)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.slots.len(),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            contexts_created: self.counters.contexts_created.load(Ordering::Relaxed),
            live_contexts: self.counters.live_contexts.load(Ordering::Acquire),
            script_faults: self.counters.script_faults.load(Ordering::Relaxed),
        }
    }
}

impl<I: Interpreter> Drop for ContextPool<I> {
    fn drop(&mut self) {
        tracing::debug!(
            "Tearing down {} pool interpreters ({} slots)",
            self.name,
            self.slots.len()
        );
    }
}
