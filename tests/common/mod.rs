//! Test doubles for the scripting engine and the host pipeline.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use openworkers_hooks::{
    BufferRef, ClientRequest, CloseHook, ContextBinding, ContextResources, GlobalHookHandler,
    HeaderRef, HookEvent, HookRegistry, InstanceConfig, InstanceId, Interpreter, RemapRequestInfo,
    ResumeEvent, ScriptEngine, Transaction, TxnId, UrlRef, ValueKind,
};

// ============================================================================
// Stub scripts
// ============================================================================

/// Value returned by a stub entry point
#[derive(Debug, Clone, PartialEq)]
pub enum StubValue {
    Nil,
    Int(i64),
    Str(String),
}

/// What an entry point sees when it runs
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub slot: usize,
    pub instance: InstanceId,
    pub txn: Option<TxnId>,
    pub request: Option<ClientRequest>,
    pub remap: bool,
}

pub type EntryFn = Arc<dyn Fn(&CallInfo) -> Result<StubValue, String> + Send + Sync>;

/// A script: named entry points plus non-callable globals
#[derive(Clone, Default)]
pub struct StubScript {
    entries: HashMap<String, EntryFn>,
    values: HashMap<String, StubValue>,
}

impl StubScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&CallInfo) -> Result<StubValue, String> + Send + Sync + 'static,
    {
        self.entries.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn returning(self, name: &str, status: i64) -> Self {
        self.entry(name, move |_| Ok(StubValue::Int(status)))
    }

    pub fn faulting(self, name: &str, message: &'static str) -> Self {
        self.entry(name, move |_| Err(message.to_string()))
    }

    pub fn sleeping(self, name: &str, duration: Duration, status: i64) -> Self {
        self.entry(name, move |_| {
            std::thread::sleep(duration);
            Ok(StubValue::Int(status))
        })
    }

    /// A global that exists but is not a function
    pub fn value(mut self, name: &str, value: StubValue) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }
}

// ============================================================================
// Stub engine
// ============================================================================

/// Counters shared by every interpreter of one engine
#[derive(Debug, Default)]
pub struct EngineProbe {
    pub created: AtomicUsize,
    pub dropped: AtomicUsize,
    pub loads: AtomicUsize,
    pub calls: AtomicUsize,
    pub resources_released: AtomicUsize,
    /// Per-slot count of calls currently executing
    pub in_flight: Mutex<HashMap<usize, usize>>,
    /// Highest in-flight count ever seen on any single slot
    pub max_in_flight_per_slot: AtomicUsize,
}

impl EngineProbe {
    fn enter(&self, slot: usize) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(slot).or_insert(0);
        *count += 1;
        self.max_in_flight_per_slot
            .fetch_max(*count, Ordering::SeqCst);
    }

    fn exit(&self, slot: usize) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(&slot) {
            *count -= 1;
        }
    }
}

#[derive(Clone, Default)]
pub struct StubEngine {
    scripts: Arc<HashMap<String, StubScript>>,
    fail_create_at: Option<usize>,
    fail_load_at: Option<usize>,
    pub probe: Arc<EngineProbe>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, path: &str, script: StubScript) -> Self {
        let mut scripts = (*self.scripts).clone();
        scripts.insert(path.to_string(), script);
        self.scripts = Arc::new(scripts);
        self
    }

    /// Make interpreter creation fail for `slot`
    pub fn failing_create_at(mut self, slot: usize) -> Self {
        self.fail_create_at = Some(slot);
        self
    }

    /// Make module loading fail for `slot`
    pub fn failing_load_at(mut self, slot: usize) -> Self {
        self.fail_load_at = Some(slot);
        self
    }
}

impl ScriptEngine for StubEngine {
    type Interpreter = StubInterpreter;

    fn name(&self) -> &str {
        "stub"
    }

    fn create_interpreter(&self, slot: usize) -> Result<StubInterpreter, String> {
        if self.fail_create_at == Some(slot) {
            return Err(format!("out of memory creating slot {}", slot));
        }

        self.probe.created.fetch_add(1, Ordering::SeqCst);

        Ok(StubInterpreter {
            slot,
            scripts: Arc::clone(&self.scripts),
            fail_load: self.fail_load_at == Some(slot),
            modules: HashMap::new(),
            current: None,
            stack: Vec::new(),
            probe: Arc::clone(&self.probe),
        })
    }
}

enum StackItem {
    Function(EntryFn),
    Value(StubValue),
}

pub struct StubInterpreter {
    slot: usize,
    scripts: Arc<HashMap<String, StubScript>>,
    fail_load: bool,
    modules: HashMap<InstanceId, StubScript>,
    current: Option<CallInfo>,
    stack: Vec<StackItem>,
    probe: Arc<EngineProbe>,
}

impl StubInterpreter {
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

struct ResourceToken(Arc<EngineProbe>);

impl Drop for ResourceToken {
    fn drop(&mut self) {
        self.0.resources_released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Interpreter for StubInterpreter {
    fn load_module(&mut self, conf: &InstanceConfig, args: &[String]) -> Result<(), String> {
        if self.fail_load {
            return Err("syntax error near line 1".to_string());
        }

        assert_eq!(args.first().map(String::as_str), Some(conf.script()));

        let script = self
            .scripts
            .get(conf.script())
            .cloned()
            .ok_or_else(|| format!("cannot open {}", conf.script()))?;

        self.modules.insert(conf.id(), script);
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn bind(&mut self, binding: &ContextBinding<'_>) -> Option<ContextResources> {
        self.current = Some(CallInfo {
            slot: self.slot,
            instance: binding.instance,
            txn: Some(binding.txn),
            request: binding.request.copied(),
            remap: binding.invocation.is_remap(),
        });

        Some(Box::new(ResourceToken(Arc::clone(&self.probe))))
    }

    fn push_global(&mut self, name: &str) -> ValueKind {
        let script = self
            .current
            .as_ref()
            .and_then(|info| self.modules.get(&info.instance));

        let (item, kind) = match script {
            Some(script) if script.entries.contains_key(name) => (
                StackItem::Function(Arc::clone(&script.entries[name])),
                ValueKind::Function,
            ),
            Some(script) => match script.values.get(name) {
                Some(value) => (StackItem::Value(value.clone()), kind_of(value)),
                None => (StackItem::Value(StubValue::Nil), ValueKind::Nil),
            },
            None => (StackItem::Value(StubValue::Nil), ValueKind::Nil),
        };

        self.stack.push(item);
        kind
    }

    fn call(&mut self, nargs: usize, nresults: usize) -> Result<(), String> {
        let base = self.stack.len() - nargs - 1;
        let mut frame = self.stack.split_off(base);

        let StackItem::Function(entry) = frame.remove(0) else {
            return Err("attempt to call a non-function".to_string());
        };

        let info = self.current.clone().ok_or("no context bound")?;

        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        self.probe.enter(self.slot);
        let result = entry(&info);
        self.probe.exit(self.slot);

        let value = result?;

        if nresults > 0 {
            self.stack.push(StackItem::Value(value));
            for _ in 1..nresults {
                self.stack.push(StackItem::Value(StubValue::Nil));
            }
        }

        Ok(())
    }

    fn to_integer(&self, index: isize) -> Option<i64> {
        let position = (self.stack.len() as isize + index) as usize;
        match self.stack.get(position)? {
            StackItem::Value(StubValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    fn describe(&self, index: isize) -> String {
        let position = (self.stack.len() as isize + index) as usize;
        match self.stack.get(position) {
            Some(StackItem::Value(value)) => format!("{:?}", value),
            Some(StackItem::Function(_)) => "function".to_string(),
            None => "none".to_string(),
        }
    }

    fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn set_stack_depth(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }
}

impl Drop for StubInterpreter {
    fn drop(&mut self) {
        self.probe.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

fn kind_of(value: &StubValue) -> ValueKind {
    match value {
        StubValue::Nil => ValueKind::Nil,
        StubValue::Int(_) => ValueKind::Number,
        StubValue::Str(_) => ValueKind::String,
    }
}

// ============================================================================
// Stub pipeline
// ============================================================================

pub fn request(id: u64) -> ClientRequest {
    ClientRequest {
        buffer: BufferRef(id),
        header: HeaderRef(id + 1),
        url: Some(UrlRef(id + 2)),
    }
}

pub fn remap_info(id: u64) -> RemapRequestInfo {
    RemapRequestInfo {
        buffer: BufferRef(id),
        header: HeaderRef(id + 1),
        url: UrlRef(id + 2),
    }
}

/// Transaction that records hooks and resumes
pub struct StubTxn {
    id: TxnId,
    request: Option<ClientRequest>,
    close_hooks: Mutex<Vec<CloseHook>>,
    reenabled: Mutex<Vec<ResumeEvent>>,
    closed: AtomicBool,
}

impl StubTxn {
    pub fn new(id: u64) -> Self {
        Self::with_request(id, Some(request(id * 10)))
    }

    pub fn without_request(id: u64) -> Self {
        Self::with_request(id, None)
    }

    pub fn with_request(id: u64, request: Option<ClientRequest>) -> Self {
        Self {
            id: TxnId(id),
            request,
            close_hooks: Mutex::new(Vec::new()),
            reenabled: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Finish the transaction, running every close hook once.
    pub fn close(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let hooks = std::mem::take(&mut *self.close_hooks.lock().unwrap());
        let count = hooks.len();
        for hook in hooks {
            hook();
        }
        count
    }

    /// Abort mid-flight; the pipeline still closes the transaction.
    pub fn abort(&self) -> usize {
        self.close()
    }

    pub fn pending_close_hooks(&self) -> usize {
        self.close_hooks.lock().unwrap().len()
    }

    pub fn reenabled(&self) -> Vec<ResumeEvent> {
        self.reenabled.lock().unwrap().clone()
    }
}

impl Transaction for StubTxn {
    fn id(&self) -> TxnId {
        self.id
    }

    fn client_request(&self) -> Option<ClientRequest> {
        self.request
    }

    fn add_close_hook(&self, hook: CloseHook) {
        self.close_hooks.lock().unwrap().push(hook);
    }

    fn reenable(&self, event: ResumeEvent) {
        self.reenabled.lock().unwrap().push(event);
    }
}

/// Registry that records global hooks
#[derive(Default)]
pub struct StubRegistry {
    pub hooks: Vec<(HookEvent, GlobalHookHandler)>,
}

impl StubRegistry {
    pub fn handler(&self, event: HookEvent) -> Option<GlobalHookHandler> {
        self.hooks
            .iter()
            .find(|(e, _)| *e == event)
            .map(|(_, h)| Arc::clone(h))
    }
}

impl HookRegistry for StubRegistry {
    fn add_global_hook(&mut self, event: HookEvent, handler: GlobalHookHandler) {
        self.hooks.push((event, handler));
    }
}

pub fn conf(script: &str) -> Arc<InstanceConfig> {
    Arc::new(InstanceConfig::from_loader_args(&[script]).unwrap())
}
