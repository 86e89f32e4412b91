//! Dispatch of transaction events onto pool slots.
//!
//! A dispatch walks through [`DispatchState`] in order:
//!
//! 1. select a slot and lock it
//! 2. build the execution context and bind it to the slot interpreter
//! 3. resolve the entry point as a global function
//! 4. invoke it with no arguments and one result
//! 5. extract the integer status, restoring the evaluation stack
//! 6. register the close hook that owns the context
//! 7. unlock (and, for phase hooks, resume the transaction)
//!
//! Missing entry points, missing request data and script faults all end
//! the dispatch early with status 0; none of them reach the pipeline as a
//! failure.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::config::InstanceConfig;
use crate::engine::{Interpreter, StackGuard, ValueKind};
use crate::error::{ScriptFault, Skip};
use crate::event::{HookEvent, Invocation, REMAP_ENTRY_POINT, phase_entry_point};
use crate::execution_context::ExecutionContext;
use crate::host::{ClientRequest, RemapRequestInfo, RemapStatus, ResumeEvent, Transaction};
use crate::pool::ContextPool;
use crate::slot::SlotState;

/// Progress of one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DispatchState {
    Selected,
    Locked,
    ContextBuilt,
    EntryResolved,
    Invoked,
    ResultExtracted,
    HookRegistered,
    Unlocked,
}

/// How a dispatch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Entry point ran and returned an integer
    Completed { slot: usize, status: i64 },
    /// Entry point ran and faulted; treated as status 0
    Faulted { slot: usize, fault: ScriptFault },
    /// Nothing was invoked
    Skipped { slot: Option<usize>, reason: Skip },
}

impl DispatchOutcome {
    /// Status reported to the pipeline
    pub fn status(&self) -> i64 {
        match self {
            DispatchOutcome::Completed { status, .. } => *status,
            _ => 0,
        }
    }

    pub fn slot(&self) -> Option<usize> {
        match self {
            DispatchOutcome::Completed { slot, .. } | DispatchOutcome::Faulted { slot, .. } => {
                Some(*slot)
            }
            DispatchOutcome::Skipped { slot, .. } => *slot,
        }
    }

    /// Whether an execution context was handed to the transaction
    pub fn context_registered(&self) -> bool {
        !matches!(self, DispatchOutcome::Skipped { .. })
    }
}

/// Targeted dispatch at the remap point.
///
/// Runs `do_remap` on the next slot and returns its status. Request
/// references come from the caller.
pub fn dispatch_remap<I: Interpreter>(
    pool: &ContextPool<I>,
    conf: &Arc<InstanceConfig>,
    txn: &dyn Transaction,
    rri: &RemapRequestInfo,
) -> (RemapStatus, DispatchOutcome) {
    let slot = pool.select();
    log::trace!(
        "txn {:?}: {:?} slot {} for remap",
        txn.id(),
        DispatchState::Selected,
        slot.index()
    );

    let request = ClientRequest::from(rri);
    let outcome = slot.with_lock(|state| {
        run_locked(
            pool,
            slot.index(),
            state,
            conf,
            Invocation::Remap,
            REMAP_ENTRY_POINT,
            txn,
            Some(request),
        )
    });

    log::trace!("txn {:?}: {:?}", txn.id(), DispatchState::Unlocked);

    (RemapStatus::from_code(outcome.status()), outcome)
}

/// Phase dispatch for a pipeline-wide hook.
///
/// The transaction is resumed with `Continue` exactly once, after the slot
/// is unlocked, whatever the outcome.
pub fn dispatch_phase<I: Interpreter>(
    pool: &ContextPool<I>,
    conf: &Arc<InstanceConfig>,
    event: HookEvent,
    txn: &dyn Transaction,
) -> DispatchOutcome {
    let outcome = match phase_entry_point(event) {
        None => {
            log::debug!("txn {:?}: no entry point for {:?}", txn.id(), event);
            DispatchOutcome::Skipped {
                slot: None,
                reason: Skip::UnhandledEvent(event),
            }
        }
        Some(entry) => {
            let slot = pool.select();
            log::trace!(
                "txn {:?}: {:?} slot {} for {:?}",
                txn.id(),
                DispatchState::Selected,
                slot.index(),
                event
            );

            let outcome = slot.with_lock(|state| match txn.client_request() {
                None => {
                    log::debug!(
                        "txn {:?}: client request unavailable for {:?}",
                        txn.id(),
                        event
                    );
                    DispatchOutcome::Skipped {
                        slot: Some(slot.index()),
                        reason: Skip::MissingRequestData,
                    }
                }
                Some(request) => run_locked(
                    pool,
                    slot.index(),
                    state,
                    conf,
                    Invocation::Phase(event),
                    entry,
                    txn,
                    Some(request),
                ),
            });

            log::trace!("txn {:?}: {:?}", txn.id(), DispatchState::Unlocked);
            outcome
        }
    };

    txn.reenable(ResumeEvent::Continue);
    outcome
}

/// Steps 2-6, with the slot lock held by the caller.
#[allow(clippy::too_many_arguments)]
fn run_locked<I: Interpreter>(
    pool: &ContextPool<I>,
    slot: usize,
    state: &mut SlotState<I>,
    conf: &Arc<InstanceConfig>,
    invocation: Invocation,
    entry: &'static str,
    txn: &dyn Transaction,
    request: Option<ClientRequest>,
) -> DispatchOutcome {
    let txn_id = txn.id();
    log::trace!("txn {:?}: {:?} slot {}", txn_id, DispatchState::Locked, slot);

    state.globals.total_requests += 1;
    state.globals.last_used = Some(Instant::now());

    let mut ctx = ExecutionContext::new(
        pool.name(),
        slot,
        txn_id,
        request,
        invocation,
        Arc::clone(conf),
        Arc::clone(pool.counters()),
    );

    let interpreter = &mut state.interpreter;
    let resources = interpreter.bind(&ctx.binding());
    ctx.attach(resources);
    log::trace!("txn {:?}: {:?}", txn_id, DispatchState::ContextBuilt);

    let result = {
        let mut stack = StackGuard::new(interpreter);

        let found = stack.push_global(entry);
        if found != ValueKind::Function {
            log::trace!(
                "txn {:?}: entry point {} not defined (found {})",
                txn_id,
                entry,
                found
            );

            // ctx is dropped here: nothing was registered for it
            return DispatchOutcome::Skipped {
                slot: Some(slot),
                reason: Skip::MissingEntryPoint { entry, found },
            };
        }
        log::trace!("txn {:?}: {:?} {}", txn_id, DispatchState::EntryResolved, entry);

        let called = stack.call(0, 1);
        log::trace!("txn {:?}: {:?}", txn_id, DispatchState::Invoked);

        match called {
            Err(message) => Err(ScriptFault::Raised { entry, message }),
            Ok(()) => stack.to_integer(-1).ok_or_else(|| ScriptFault::NotInteger {
                entry,
                found: stack.describe(-1),
            }),
        }
        // stack guard pops the result (or error) here
    };
    log::trace!("txn {:?}: {:?}", txn_id, DispatchState::ResultExtracted);

    let outcome = match result {
        Ok(status) => DispatchOutcome::Completed { slot, status },
        Err(fault) => {
            log::error!(
                "txn {:?}: {} ({} slot {}, script {})",
                txn_id,
                fault,
                pool.name(),
                slot,
                conf.script()
            );
            state.globals.script_faults += 1;
            pool.counters()
                .script_faults
                .fetch_add(1, Ordering::Relaxed);

            DispatchOutcome::Faulted { slot, fault }
        }
    };

    ctx.release_on_close(txn);
    log::trace!("txn {:?}: {:?}", txn_id, DispatchState::HookRegistered);

    outcome
}
