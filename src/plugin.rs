//! Plugin entry surfaces.
//!
//! Two independent paths exist side by side, each with its own pool and
//! its own selector:
//!
//! - [`RemapPlugin`]: per-rule scripts invoked at the remap point
//! - [`GlobalPlugin`]: one script invoked from pipeline-wide phase hooks
//!
//! Registration (`init`, `new_instance`) needs exclusive access to the
//! plugin and so completes before the first dispatch can start.

use std::sync::Arc;

use crate::config::{InstanceConfig, PoolConfig};
use crate::dispatcher::{DispatchOutcome, dispatch_phase, dispatch_remap};
use crate::engine::{Interpreter, ScriptEngine};
use crate::error::HookError;
use crate::event::{HookEvent, PHASE_ENTRY_POINTS};
use crate::host::{
    GlobalHookHandler, HookRegistry, RemapRequestInfo, RemapStatus, Transaction,
};
use crate::pool::ContextPool;

// ============================================================================
// Remap plugin
// ============================================================================

/// Oldest remap interface major version accepted by [`RemapPlugin::init`]
pub const REMAP_API_VERSION_MAJOR: u32 = 1;

/// Interface description supplied by the host when loading a remap plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapApiInfo {
    /// `major << 16 | minor`
    pub version: u32,
}

impl RemapApiInfo {
    pub fn new(major: u16, minor: u16) -> Self {
        Self {
            version: ((major as u32) << 16) | minor as u32,
        }
    }

    pub fn major(&self) -> u32 {
        self.version >> 16
    }
}

/// A remap rule's script registration
#[derive(Debug, Clone)]
pub struct RemapInstance {
    conf: Arc<InstanceConfig>,
}

impl RemapInstance {
    pub fn conf(&self) -> &InstanceConfig {
        &self.conf
    }
}

/// Remap path: one pool shared by every remap rule
pub struct RemapPlugin<I: Interpreter> {
    pool: ContextPool<I>,
    instances: usize,
}

impl<I: Interpreter> RemapPlugin<I> {
    /// Build the remap pool.
    pub fn init<E>(
        api_info: Option<&RemapApiInfo>,
        engine: &E,
        config: &PoolConfig,
    ) -> Result<Self, HookError>
    where
        E: ScriptEngine<Interpreter = I>,
    {
        let Some(api_info) = api_info else {
            return Err(HookError::Configuration(
                "missing remap API info".to_string(),
            ));
        };

        if api_info.major() < REMAP_API_VERSION_MAJOR {
            return Err(HookError::Configuration(format!(
                "remap API version {} too old (need major {})",
                api_info.major(),
                REMAP_API_VERSION_MAJOR
            )));
        }

        let pool = ContextPool::create("remap", engine, config)?;

        Ok(Self { pool, instances: 0 })
    }

    /// Register a remap rule's script.
    ///
    /// `args` is the rule's argument list: `[from_url, to_url, script, extra...]`.
    pub fn new_instance<S: AsRef<str>>(&mut self, args: &[S]) -> Result<RemapInstance, HookError> {
        if args.len() < 3 {
            return Err(HookError::Configuration(
                "script file required".to_string(),
            ));
        }

        let conf = Arc::new(InstanceConfig::from_loader_args(&args[2..])?);
        self.pool.add_module(&conf)?;
        self.instances += 1;

        log::info!(
            "Remap instance {} registered for {} ({} active)",
            conf.id(),
            conf.script(),
            self.instances
        );

        Ok(RemapInstance { conf })
    }

    pub fn do_remap(
        &self,
        instance: &RemapInstance,
        txn: &dyn Transaction,
        rri: &RemapRequestInfo,
    ) -> RemapStatus {
        dispatch_remap(&self.pool, &instance.conf, txn, rri).0
    }

    /// Same as [`RemapPlugin::do_remap`], also returning the full outcome.
    pub fn do_remap_detailed(
        &self,
        instance: &RemapInstance,
        txn: &dyn Transaction,
        rri: &RemapRequestInfo,
    ) -> (RemapStatus, DispatchOutcome) {
        dispatch_remap(&self.pool, &instance.conf, txn, rri)
    }

    /// Release a rule's configuration. Contexts still waiting for their
    /// transactions to close keep their own reference.
    pub fn delete_instance(&mut self, instance: RemapInstance) {
        self.instances = self.instances.saturating_sub(1);
        log::info!(
            "Remap instance {} deleted ({} active)",
            instance.conf.id(),
            self.instances
        );
    }

    pub fn pool(&self) -> &ContextPool<I> {
        &self.pool
    }

    pub fn shutdown(self) {
        self.pool.destroy();
    }
}

// ============================================================================
// Global plugin
// ============================================================================

/// Phase path: one script, hooked into every event of the phase table
pub struct GlobalPlugin<I: Interpreter> {
    pool: ContextPool<I>,
    conf: Arc<InstanceConfig>,
}

impl<I: Interpreter + 'static> GlobalPlugin<I> {
    /// Build the global pool, load the script and register the phase hooks.
    ///
    /// `args` is the plugin argument list: `[plugin_name, script, extra...]`.
    /// Arguments are validated before the pool is created.
    pub fn init<E, S>(
        engine: &E,
        config: &PoolConfig,
        args: &[S],
        registry: &mut dyn HookRegistry,
    ) -> Result<Arc<Self>, HookError>
    where
        E: ScriptEngine<Interpreter = I>,
        S: AsRef<str>,
    {
        if args.len() < 2 {
            return Err(HookError::Configuration(
                "script file required".to_string(),
            ));
        }

        let conf = Arc::new(InstanceConfig::from_loader_args(&args[1..])?);

        let mut pool = ContextPool::create("global", engine, config)?;
        pool.add_module(&conf)?;

        let plugin = Arc::new(Self { pool, conf });

        let handler: GlobalHookHandler = {
            let plugin = Arc::clone(&plugin);
            Arc::new(move |event: HookEvent, txn: &dyn Transaction| {
                plugin.handle(event, txn).status() as i32
            })
        };

        for (event, entry) in PHASE_ENTRY_POINTS {
            log::debug!("Registering global hook {:?} -> {}", event, entry);
            registry.add_global_hook(*event, Arc::clone(&handler));
        }

        log::info!(
            "Global plugin initialized with {} (instance {}, {} hooks)",
            plugin.conf.script(),
            plugin.conf.id(),
            PHASE_ENTRY_POINTS.len()
        );

        Ok(plugin)
    }
}

impl<I: Interpreter> GlobalPlugin<I> {
    /// Handle one phase event for a transaction.
    pub fn handle(&self, event: HookEvent, txn: &dyn Transaction) -> DispatchOutcome {
        dispatch_phase(&self.pool, &self.conf, event, txn)
    }

    pub fn conf(&self) -> &InstanceConfig {
        &self.conf
    }

    pub fn pool(&self) -> &ContextPool<I> {
        &self.pool
    }

    /// Destroy the pool if no registered hook still holds the plugin.
    pub fn shutdown(self: Arc<Self>) -> Result<(), Arc<Self>> {
        let plugin = Arc::try_unwrap(self)?;
        plugin.pool.destroy();
        Ok(())
    }
}
