//! Interface to the embedded scripting engine.
//!
//! An [`Interpreter`] is a stack machine in the style of embeddable script
//! VMs: globals are pushed onto an evaluation stack, called, and their
//! results read back from the top. Each pool slot owns one interpreter for
//! its whole lifetime, so the stack is shared by every dispatch that lands
//! on the slot and must not grow across dispatches. [`StackGuard`] restores
//! it on every exit path.

use std::any::Any;
use std::ops::{Deref, DerefMut};

use crate::config::{InstanceConfig, InstanceId};
use crate::event::Invocation;
use crate::host::{ClientRequest, TxnId};

/// Type of a value on the evaluation stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Nil,
    Boolean,
    Number,
    String,
    Function,
    Object,
    Other,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Function => "function",
            ValueKind::Object => "object",
            ValueKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// What an interpreter gets to see of the transaction it runs for
#[derive(Debug, Clone, Copy)]
pub struct ContextBinding<'a> {
    pub instance: InstanceId,
    pub txn: TxnId,
    pub request: Option<&'a ClientRequest>,
    pub invocation: Invocation,
}

/// Engine-level resources owned by one execution context (accessor
/// handles and the like). Dropped when the transaction closes.
pub type ContextResources = Box<dyn Any + Send>;

/// One interpreter instance. Teardown happens in `Drop`.
pub trait Interpreter: Send {
    /// Load a script into this interpreter under `conf`'s instance id.
    fn load_module(&mut self, conf: &InstanceConfig, args: &[String]) -> Result<(), String>;

    /// Select the instance environment and expose the transaction's request
    /// references to scripts.
    fn bind(&mut self, binding: &ContextBinding<'_>) -> Option<ContextResources>;

    /// Push the named global of the bound environment and report its kind.
    fn push_global(&mut self, name: &str) -> ValueKind;

    /// Call the value below the top `nargs` values.
    ///
    /// On success the callee and arguments are replaced by `nresults`
    /// values. On failure they are removed and the error message returned.
    fn call(&mut self, nargs: usize, nresults: usize) -> Result<(), String>;

    /// Read the value at `index` (negative counts from the top) as an integer.
    fn to_integer(&self, index: isize) -> Option<i64>;

    /// Describe the value at `index` for diagnostics.
    fn describe(&self, index: isize) -> String;

    fn stack_depth(&self) -> usize;

    /// Drop values until the stack is `depth` deep.
    fn set_stack_depth(&mut self, depth: usize);
}

/// Factory for interpreters, shared by every slot of a pool
pub trait ScriptEngine {
    type Interpreter: Interpreter;

    fn name(&self) -> &str;

    fn create_interpreter(&self, slot: usize) -> Result<Self::Interpreter, String>;
}

/// Restores an interpreter's stack to the depth it had on creation.
pub struct StackGuard<'a, I: Interpreter + ?Sized> {
    interpreter: &'a mut I,
    depth: usize,
}

impl<'a, I: Interpreter + ?Sized> StackGuard<'a, I> {
    pub fn new(interpreter: &'a mut I) -> Self {
        let depth = interpreter.stack_depth();
        Self { interpreter, depth }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<I: Interpreter + ?Sized> Deref for StackGuard<'_, I> {
    type Target = I;

    fn deref(&self) -> &I {
        self.interpreter
    }
}

impl<I: Interpreter + ?Sized> DerefMut for StackGuard<'_, I> {
    fn deref_mut(&mut self) -> &mut I {
        self.interpreter
    }
}

impl<I: Interpreter + ?Sized> Drop for StackGuard<'_, I> {
    fn drop(&mut self) {
        let current = self.interpreter.stack_depth();

        if current != self.depth {
            log::trace!("Restoring stack depth {} -> {}", current, self.depth);
            self.interpreter.set_stack_depth(self.depth);
        }
    }
}
