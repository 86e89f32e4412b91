//! V8-backed interpreter for pool slots
//!
//! Each slot owns one isolate created without auto-enter
//! (`v8::UnenteredIsolate`) and locks it with `v8::Locker` for every
//! operation, so a slot may be driven from whichever pipeline thread
//! selected it.
//!
//! Every registered instance gets its own V8 context; `bind` selects the
//! context whose globals entry points are looked up in. Entry points are
//! plain global functions (`function do_remap() { return 1; }`).
//!
//! V8 has no user-visible value stack, so the interpreter keeps a shadow
//! stack of converted values. Integral numbers are stored as integers;
//! everything else keeps its kind and a printable form for diagnostics.

use std::collections::HashMap;
use std::pin::pin;

use crate::config::{InstanceConfig, InstanceId};
use crate::engine::{ContextBinding, ContextResources, Interpreter, ScriptEngine, ValueKind};

/// Largest integer a JS number represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Factory for V8 slot interpreters
#[derive(Debug, Clone)]
pub struct V8Engine {
    /// Initial heap size per isolate in MB
    pub heap_initial_mb: usize,
    /// Maximum heap size per isolate in MB
    pub heap_max_mb: usize,
}

impl Default for V8Engine {
    fn default() -> Self {
        Self {
            heap_initial_mb: 1,
            heap_max_mb: 64,
        }
    }
}

impl ScriptEngine for V8Engine {
    type Interpreter = V8Interpreter;

    fn name(&self) -> &str {
        "v8"
    }

    fn create_interpreter(&self, slot: usize) -> Result<V8Interpreter, String> {
        if self.heap_max_mb == 0 || self.heap_initial_mb > self.heap_max_mb {
            return Err(format!(
                "invalid heap limits {}MB..{}MB",
                self.heap_initial_mb, self.heap_max_mb
            ));
        }

        crate::platform::get_platform();

        let heap_initial = self.heap_initial_mb * 1024 * 1024;
        let heap_max = self.heap_max_mb * 1024 * 1024;

        let params = v8::CreateParams::default()
            .heap_limits(heap_initial, heap_max)
            .allow_atomics_wait(false);

        tracing::trace!("Creating isolate for slot {}", slot);

        Ok(V8Interpreter {
            stack: Vec::new(),
            contexts: HashMap::new(),
            current: None,
            isolate: v8::Isolate::new_unentered(params),
        })
    }
}

enum StackEntry {
    Function(v8::Global<v8::Function>),
    Integer(i64),
    Value { kind: ValueKind, display: String },
}

impl StackEntry {
    fn nil() -> Self {
        StackEntry::Value {
            kind: ValueKind::Nil,
            display: "undefined".to_string(),
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            StackEntry::Function(_) => ValueKind::Function,
            StackEntry::Integer(_) => ValueKind::Number,
            StackEntry::Value { kind, .. } => *kind,
        }
    }
}

/// Convert a local value into a stack entry (functions are kept as kind only).
macro_rules! entry_from_value {
    ($scope:expr, $value:expr) => {{
        let value = $value;
        if value.is_null_or_undefined() {
            StackEntry::nil()
        } else if value.is_number() {
            let n = value.number_value($scope).unwrap_or(f64::NAN);
            if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                StackEntry::Integer(n as i64)
            } else {
                StackEntry::Value {
                    kind: ValueKind::Number,
                    display: n.to_string(),
                }
            }
        } else {
            let kind = if value.is_boolean() {
                ValueKind::Boolean
            } else if value.is_string() {
                ValueKind::String
            } else if value.is_function() {
                ValueKind::Function
            } else if value.is_object() {
                ValueKind::Object
            } else {
                ValueKind::Other
            };
            StackEntry::Value {
                kind,
                display: value.to_rust_string_lossy($scope),
            }
        }
    }};
}

/// Set `obj[key] = value`, ignoring failures.
macro_rules! set_property {
    ($scope:expr, $obj:expr, $key:expr, $value:expr) => {{
        if let Some(key) = v8::String::new($scope, $key) {
            let value: v8::Local<v8::Value> = $value;
            $obj.set($scope, key.into(), value);
        }
    }};
}

/// One slot's isolate plus per-instance contexts
pub struct V8Interpreter {
    // Handles first: they are released before the isolate
    stack: Vec<StackEntry>,
    contexts: HashMap<InstanceId, v8::Global<v8::Context>>,
    current: Option<InstanceId>,
    isolate: v8::UnenteredIsolate,
}

// SAFETY: the isolate and every handle created from it are only reached
// through `&mut self`, i.e. under the owning slot's lock, and every access
// to the isolate takes a `v8::Locker` first.
unsafe impl Send for V8Interpreter {}

impl V8Interpreter {
    fn resolve(&self, index: isize) -> Option<&StackEntry> {
        let len = self.stack.len() as isize;
        let position = if index < 0 { len + index } else { index };

        if position < 0 || position >= len {
            return None;
        }

        self.stack.get(position as usize)
    }

    /// Number of instance contexts loaded in this isolate
    pub fn instance_count(&self) -> usize {
        self.contexts.len()
    }
}

impl Interpreter for V8Interpreter {
    fn load_module(&mut self, conf: &InstanceConfig, args: &[String]) -> Result<(), String> {
        let code = std::fs::read_to_string(conf.script())
            .map_err(|e| format!("cannot read {}: {}", conf.script(), e))?;

        let mut locker = v8::Locker::new(&mut self.isolate);
        let scope = pin!(v8::HandleScope::new(&mut *locker));
        let mut scope = scope.init();
        let context = v8::Context::new(&scope, Default::default());
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        let global = context.global(scope);
        let script_args = v8::Array::new(scope, args.len() as i32);
        for (i, arg) in args.iter().enumerate() {
            let value = v8::String::new(scope, arg).ok_or("Failed to create V8 string")?;
            script_args.set_index(scope, i as u32, value.into());
        }
        set_property!(scope, global, "scriptArgs", script_args.into());

        let context_global = v8::Global::new(scope, context);
        let code_str = v8::String::new(scope, &code).ok_or("Failed to create V8 string")?;

        let tc = pin!(v8::TryCatch::new(scope));
        let tc = tc.init();

        let script_obj = v8::Script::compile(&tc, code_str, None).ok_or_else(|| {
            tc.exception()
                .and_then(|e| e.to_string(&tc).map(|s| s.to_rust_string_lossy(&tc)))
                .unwrap_or_else(|| "Compile error".to_string())
        })?;

        script_obj.run(&tc).ok_or_else(|| {
            tc.exception()
                .and_then(|e| e.to_string(&tc).map(|s| s.to_rust_string_lossy(&tc)))
                .unwrap_or_else(|| "Runtime error".to_string())
        })?;

        self.contexts.insert(conf.id(), context_global);
        Ok(())
    }

    fn bind(&mut self, binding: &ContextBinding<'_>) -> Option<ContextResources> {
        self.current = Some(binding.instance);
        let context = self.contexts.get(&binding.instance)?;

        let mut locker = v8::Locker::new(&mut self.isolate);
        let scope = pin!(v8::HandleScope::new(&mut *locker));
        let mut scope = scope.init();
        let ctx = v8::Local::new(&scope, context);
        let scope = &mut v8::ContextScope::new(&mut scope, ctx);

        let global = ctx.global(scope);
        let txn = v8::Object::new(scope);

        set_property!(scope, txn, "id", v8::Number::new(scope, binding.txn.0 as f64).into());
        set_property!(
            scope,
            txn,
            "remap",
            v8::Boolean::new(scope, binding.invocation.is_remap()).into()
        );

        if let Some(request) = binding.request {
            set_property!(scope, txn, "buffer", v8::Number::new(scope, request.buffer.0 as f64).into());
            set_property!(scope, txn, "header", v8::Number::new(scope, request.header.0 as f64).into());

            if let Some(url) = request.url {
                set_property!(scope, txn, "url", v8::Number::new(scope, url.0 as f64).into());
            }
        }

        set_property!(scope, global, "txn", txn.into());
        None
    }

    fn push_global(&mut self, name: &str) -> ValueKind {
        let Some(context) = self.current.and_then(|id| self.contexts.get(&id)) else {
            self.stack.push(StackEntry::nil());
            return ValueKind::Nil;
        };

        let mut locker = v8::Locker::new(&mut self.isolate);
        let scope = pin!(v8::HandleScope::new(&mut *locker));
        let mut scope = scope.init();
        let ctx = v8::Local::new(&scope, context);
        let scope = &mut v8::ContextScope::new(&mut scope, ctx);

        let global = ctx.global(scope);
        let value = v8::String::new(scope, name).and_then(|key| global.get(scope, key.into()));

        let entry = match value {
            None => StackEntry::nil(),
            Some(value) if value.is_function() => match v8::Local::<v8::Function>::try_from(value) {
                Ok(function) => StackEntry::Function(v8::Global::new(scope, function)),
                Err(_) => StackEntry::Value {
                    kind: ValueKind::Other,
                    display: name.to_string(),
                },
            },
            Some(value) => entry_from_value!(scope, value),
        };

        let kind = entry.kind();
        self.stack.push(entry);
        kind
    }

    fn call(&mut self, nargs: usize, nresults: usize) -> Result<(), String> {
        if self.stack.len() < nargs + 1 {
            return Err("stack underflow".to_string());
        }

        let Some(context) = self.current.and_then(|id| self.contexts.get(&id)) else {
            return Err("no instance bound".to_string());
        };

        let base = self.stack.len() - nargs - 1;
        let mut frame = self.stack.split_off(base);
        let callee = frame.remove(0);
        let callee_kind = callee.kind();

        let StackEntry::Function(function) = callee else {
            return Err(format!("attempt to call a {} value", callee_kind));
        };

        let mut locker = v8::Locker::new(&mut self.isolate);
        let scope = pin!(v8::HandleScope::new(&mut *locker));
        let mut scope = scope.init();
        let ctx = v8::Local::new(&scope, context);
        let scope = &mut v8::ContextScope::new(&mut scope, ctx);

        let receiver = ctx.global(scope);
        let func = v8::Local::new(scope, &function);

        let mut args: Vec<v8::Local<v8::Value>> = Vec::with_capacity(frame.len());
        for entry in &frame {
            let arg: v8::Local<v8::Value> = match entry {
                StackEntry::Function(f) => v8::Local::new(scope, f).into(),
                StackEntry::Integer(n) => v8::Number::new(scope, *n as f64).into(),
                StackEntry::Value {
                    kind: ValueKind::Nil,
                    ..
                } => v8::undefined(scope).into(),
                StackEntry::Value { display, .. } => match v8::String::new(scope, display) {
                    Some(s) => s.into(),
                    None => v8::undefined(scope).into(),
                },
            };
            args.push(arg);
        }

        // Handles of the frame are released while the isolate is locked
        drop(frame);
        drop(function);

        let tc = pin!(v8::TryCatch::new(scope));
        let tc = tc.init();

        let Some(result) = func.call(&tc, receiver.into(), &args) else {
            return Err(tc
                .exception()
                .and_then(|e| e.to_string(&tc).map(|s| s.to_rust_string_lossy(&tc)))
                .unwrap_or_else(|| "Runtime error".to_string()));
        };

        if nresults > 0 {
            let entry = entry_from_value!(&tc, result);
            self.stack.push(entry);

            for _ in 1..nresults {
                self.stack.push(StackEntry::nil());
            }
        }

        Ok(())
    }

    fn to_integer(&self, index: isize) -> Option<i64> {
        match self.resolve(index)? {
            StackEntry::Integer(n) => Some(*n),
            _ => None,
        }
    }

    fn describe(&self, index: isize) -> String {
        match self.resolve(index) {
            None => "none".to_string(),
            Some(StackEntry::Function(_)) => "function".to_string(),
            Some(StackEntry::Integer(n)) => format!("number {}", n),
            Some(StackEntry::Value { kind, display }) => format!("{} {:?}", kind, display),
        }
    }

    fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn set_stack_depth(&mut self, depth: usize) {
        if depth >= self.stack.len() {
            return;
        }

        let _locker = v8::Locker::new(&mut self.isolate);
        self.stack.truncate(depth);
    }
}

impl Drop for V8Interpreter {
    fn drop(&mut self) {
        let _locker = v8::Locker::new(&mut self.isolate);
        self.stack.clear();
        self.contexts.clear();
    }
}
