//! Execution context - per-transaction state bound to a pool slot
//!
//! A context is created while its slot is locked and lives until the
//! transaction closes. It only refers to its slot by index: dropping it
//! never touches the slot's interpreter or lock, so the slot can serve the
//! next transaction long before this one's close notification fires.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::config::InstanceConfig;
use crate::engine::{ContextBinding, ContextResources};
use crate::event::Invocation;
use crate::host::{ClientRequest, Transaction, TxnId};
use crate::pool::PoolCounters;

pub struct ExecutionContext {
    pool: &'static str,
    slot: usize,
    txn: TxnId,
    request: Option<ClientRequest>,
    invocation: Invocation,
    conf: Arc<InstanceConfig>,
    /// Engine resources acquired when the context was bound
    resources: Option<ContextResources>,
    counters: Arc<PoolCounters>,
}

impl ExecutionContext {
    pub(crate) fn new(
        pool: &'static str,
        slot: usize,
        txn: TxnId,
        request: Option<ClientRequest>,
        invocation: Invocation,
        conf: Arc<InstanceConfig>,
        counters: Arc<PoolCounters>,
    ) -> Self {
        counters.contexts_created.fetch_add(1, Ordering::Relaxed);
        counters.live_contexts.fetch_add(1, Ordering::AcqRel);

        log::trace!(
            "Created execution context for txn {:?} on {} slot {} ({:?})",
            txn,
            pool,
            slot,
            invocation
        );

        Self {
            pool,
            slot,
            txn,
            request,
            invocation,
            conf,
            resources: None,
            counters,
        }
    }

    pub fn binding(&self) -> ContextBinding<'_> {
        ContextBinding {
            instance: self.conf.id(),
            txn: self.txn,
            request: self.request.as_ref(),
            invocation: self.invocation,
        }
    }

    pub(crate) fn attach(&mut self, resources: Option<ContextResources>) {
        self.resources = resources;
    }

    /// Hand the context to the transaction; it is dropped when the
    /// transaction closes.
    pub(crate) fn release_on_close(self, txn: &dyn Transaction) {
        log::trace!(
            "Registering close hook for txn {:?} ({} slot {})",
            self.txn,
            self.pool,
            self.slot
        );

        txn.add_close_hook(Box::new(move || {
            log::trace!("Transaction {:?} closed, releasing context", self.txn);
            drop(self);
        }));
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn request(&self) -> Option<&ClientRequest> {
        self.request.as_ref()
    }

    pub fn invocation(&self) -> Invocation {
        self.invocation
    }

    pub fn is_remap(&self) -> bool {
        self.invocation.is_remap()
    }

    pub fn conf(&self) -> &InstanceConfig {
        &self.conf
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // Engine resources go first, while the counters still show the context live
        self.resources.take();
        self.counters.live_contexts.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("pool", &self.pool)
            .field("slot", &self.slot)
            .field("txn", &self.txn)
            .field("request", &self.request)
            .field("invocation", &self.invocation)
            .field("instance", &self.conf.id())
            .field("has_resources", &self.resources.is_some())
            .finish()
    }
}
