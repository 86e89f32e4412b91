//! Interface to the host request pipeline.
//!
//! The pipeline owns transactions and their lifecycle; this crate only sees
//! them through [`Transaction`] and registers global hooks through
//! [`HookRegistry`].

use std::sync::Arc;

use crate::event::HookEvent;

/// Opaque transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(pub u64);

/// Opaque reference to a marshal buffer owned by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRef(pub u64);

/// Opaque reference to a header block inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeaderRef(pub u64);

/// Opaque reference to a URL inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UrlRef(pub u64);

/// Client request references for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRequest {
    pub buffer: BufferRef,
    pub header: HeaderRef,
    /// Absent when the pipeline could not resolve the request URL
    pub url: Option<UrlRef>,
}

/// Request data handed to a remap invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapRequestInfo {
    pub buffer: BufferRef,
    pub header: HeaderRef,
    pub url: UrlRef,
}

impl From<&RemapRequestInfo> for ClientRequest {
    fn from(rri: &RemapRequestInfo) -> Self {
        Self {
            buffer: rri.buffer,
            header: rri.header,
            url: Some(rri.url),
        }
    }
}

/// Event passed back when resuming a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeEvent {
    Continue,
    Error,
}

/// Notification run when a transaction closes
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// A transaction as seen by the dispatcher.
///
/// Implementations must run every hook passed to `add_close_hook` exactly
/// once when the transaction ends, including when it is aborted.
pub trait Transaction: Send + Sync {
    fn id(&self) -> TxnId;

    /// Fetch client request references, `None` if not available yet.
    fn client_request(&self) -> Option<ClientRequest>;

    fn add_close_hook(&self, hook: CloseHook);

    /// Unblock the pipeline after a phase hook.
    fn reenable(&self, event: ResumeEvent);
}

/// Handler registered for a pipeline-wide event
pub type GlobalHookHandler = Arc<dyn Fn(HookEvent, &dyn Transaction) -> i32 + Send + Sync>;

/// Registration of pipeline-wide hooks
pub trait HookRegistry {
    fn add_global_hook(&mut self, event: HookEvent, handler: GlobalHookHandler);
}

/// Result of a remap invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapStatus {
    NoRemap,
    DidRemap,
    NoRemapStop,
    DidRemapStop,
    Error,
}

impl RemapStatus {
    /// Map a script status code. Unknown codes fall back to `NoRemap`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => RemapStatus::NoRemap,
            1 => RemapStatus::DidRemap,
            2 => RemapStatus::NoRemapStop,
            3 => RemapStatus::DidRemapStop,
            -1 => RemapStatus::Error,
            other => {
                log::warn!("Unknown remap status {}, treating as no remap", other);
                RemapStatus::NoRemap
            }
        }
    }

    pub fn code(self) -> i32 {
        match self {
            RemapStatus::NoRemap => 0,
            RemapStatus::DidRemap => 1,
            RemapStatus::NoRemapStop => 2,
            RemapStatus::DidRemapStop => 3,
            RemapStatus::Error => -1,
        }
    }
}
