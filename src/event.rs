//! Pipeline events and the entry points they map to.

/// Entry point invoked for targeted (remap) dispatch
pub const REMAP_ENTRY_POINT: &str = "do_remap";

/// Transaction lifecycle events raised by the host pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    TxnStart,
    ReadRequestHdr,
    PreRemap,
    OsDns,
    SendRequestHdr,
    ReadResponseHdr,
    SendResponseHdr,
    CacheLookupComplete,
    TxnClose,
}

/// Phase entry points, one per handled event.
///
/// Adding a phase is a matter of adding a row here; the global plugin
/// registers a hook for every event listed.
pub const PHASE_ENTRY_POINTS: &[(HookEvent, &str)] = &[
    (HookEvent::ReadRequestHdr, "do_global_read_request"),
    (HookEvent::SendRequestHdr, "do_global_send_request"),
    (HookEvent::ReadResponseHdr, "do_global_read_response"),
    (HookEvent::SendResponseHdr, "do_global_send_response"),
    (
        HookEvent::CacheLookupComplete,
        "do_global_cache_lookup_complete",
    ),
];

/// Entry point name for a phase event, `None` if the event is not handled
pub fn phase_entry_point(event: HookEvent) -> Option<&'static str> {
    PHASE_ENTRY_POINTS
        .iter()
        .find(|(e, _)| *e == event)
        .map(|(_, name)| *name)
}

/// Shape of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Bound to one transaction at the remap point
    Remap,
    /// Triggered by a pipeline-wide hook
    Phase(HookEvent),
}

impl Invocation {
    pub fn entry_point(self) -> Option<&'static str> {
        match self {
            Invocation::Remap => Some(REMAP_ENTRY_POINT),
            Invocation::Phase(event) => phase_entry_point(event),
        }
    }

    pub fn is_remap(self) -> bool {
        matches!(self, Invocation::Remap)
    }
}
