//! Pool and instance configuration.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::HookError;

// ============================================================================
// Constants
// ============================================================================

/// Default number of interpreter slots per pool
pub const DEFAULT_POOL_CAPACITY: usize = 2048;

/// Size of the script name buffer handed to script loaders
pub const MAX_SCRIPT_FNAME_LENGTH: usize = 1024;

/// Bytes of the script name buffer reserved for loader-side suffixes
pub const SCRIPT_FNAME_HEADROOM: usize = 16;

/// Longest accepted script path, in bytes (1007)
pub const MAX_SCRIPT_PATH_LENGTH: usize = MAX_SCRIPT_FNAME_LENGTH - SCRIPT_FNAME_HEADROOM - 1;

// ============================================================================
// Pool configuration
// ============================================================================

/// Configuration for a context pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of slots, fixed for the lifetime of the pool
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl PoolConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Check the capacity fits the selector's index space.
    pub fn validate(&self) -> Result<(), HookError> {
        if self.capacity == 0 {
            return Err(HookError::Configuration(
                "pool capacity must be at least 1".to_string(),
            ));
        }

        if self.capacity > i32::MAX as usize {
            return Err(HookError::Configuration(format!(
                "pool capacity {} exceeds {}",
                self.capacity,
                i32::MAX
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Instance configuration
// ============================================================================

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one registered script instance across every slot of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A script registered under a plugin instance.
///
/// Immutable once built; every execution context created for the instance
/// shares it read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    id: InstanceId,
    /// Loader argument list: the script path followed by extra arguments
    loader_args: Vec<String>,
}

impl InstanceConfig {
    /// Build from a loader argument list whose first entry is the script path.
    pub fn from_loader_args<S: AsRef<str>>(args: &[S]) -> Result<Self, HookError> {
        let Some(script) = args.first().map(AsRef::as_ref) else {
            return Err(HookError::Configuration(
                "script file required".to_string(),
            ));
        };

        validate_script_path(script)?;

        Ok(Self {
            id: InstanceId::next(),
            loader_args: args.iter().map(|a| a.as_ref().to_string()).collect(),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn script(&self) -> &str {
        &self.loader_args[0]
    }

    /// Arguments after the script path
    pub fn extra_args(&self) -> &[String] {
        &self.loader_args[1..]
    }

    /// Full argument list passed through to the module loader
    pub fn loader_args(&self) -> &[String] {
        &self.loader_args
    }
}

fn validate_script_path(script: &str) -> Result<(), HookError> {
    if script.is_empty() {
        return Err(HookError::Configuration(
            "script file required".to_string(),
        ));
    }

    if script.len() > MAX_SCRIPT_PATH_LENGTH {
        return Err(HookError::Configuration(format!(
            "script file name too long ({} bytes, max {})",
            script.len(),
            MAX_SCRIPT_PATH_LENGTH
        )));
    }

    Ok(())
}
