//! Error and outcome types.
//!
//! Only [`HookError`] ever leaves this crate as a failure, and only at
//! registration time. Everything that can go wrong while a transaction is
//! being dispatched is folded into a [`Skip`] or a [`ScriptFault`] and
//! reported to the pipeline as "continue".

use crate::engine::ValueKind;
use crate::event::HookEvent;

/// Registration-time failures
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// A pool or one of its interpreters could not be built, or a module
    /// failed to load into a slot. Partially built state has already been
    /// torn down when this is returned.
    #[error("{pool} pool initialization failed at slot {slot}: {reason}")]
    Initialization {
        pool: &'static str,
        slot: usize,
        reason: String,
    },

    /// Bad plugin arguments or pool configuration. No pool state was touched.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Entry point invocation failed inside the interpreter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptFault {
    #[error("entry point {entry} raised: {message}")]
    Raised { entry: &'static str, message: String },

    #[error("entry point {entry} returned a non-integer value ({found})")]
    NotInteger { entry: &'static str, found: String },
}

/// Reasons a dispatch ends without invoking an entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// The script does not define the entry point, or it is not callable.
    MissingEntryPoint { entry: &'static str, found: ValueKind },
    /// The pipeline had no client request header for this transaction.
    MissingRequestData,
    /// No entry point is mapped to this event.
    UnhandledEvent(HookEvent),
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Skip::MissingEntryPoint { entry, found } => {
                write!(f, "entry point {} not callable (found {})", entry, found)
            }
            Skip::MissingRequestData => write!(f, "client request header unavailable"),
            Skip::UnhandledEvent(event) => write!(f, "no entry point for event {:?}", event),
        }
    }
}
