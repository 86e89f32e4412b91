pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod execution_context;
pub mod host;
pub mod plugin;
pub mod pool;
pub mod selector;
pub mod slot;

#[cfg(feature = "v8")]
mod platform;
#[cfg(feature = "v8")]
pub mod v8_engine;

// Core API
pub use config::{InstanceConfig, InstanceId, PoolConfig};
pub use dispatcher::{DispatchOutcome, DispatchState, dispatch_phase, dispatch_remap};
pub use engine::{ContextBinding, ContextResources, Interpreter, ScriptEngine, StackGuard, ValueKind};
pub use error::{HookError, ScriptFault, Skip};
pub use event::{HookEvent, Invocation, PHASE_ENTRY_POINTS, REMAP_ENTRY_POINT};
pub use execution_context::ExecutionContext;
pub use host::{
    BufferRef, ClientRequest, CloseHook, GlobalHookHandler, HeaderRef, HookRegistry,
    RemapRequestInfo, RemapStatus, ResumeEvent, Transaction, TxnId, UrlRef,
};
pub use plugin::{GlobalPlugin, RemapApiInfo, RemapInstance, RemapPlugin};
pub use pool::{ContextPool, PoolStats};
pub use selector::SlotSelector;
pub use slot::{Slot, SlotGlobals};

#[cfg(feature = "v8")]
pub use v8_engine::{V8Engine, V8Interpreter};
