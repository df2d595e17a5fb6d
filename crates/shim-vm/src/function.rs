//! Native functions

use crate::execution::ExecutionState;
use crate::value::Value;
use shim_gc::GcRef;
use std::rc::Rc;

/// Body of a callable object. `Err` carries the thrown value.
pub type NativeFunction = Rc<dyn Fn(&mut ExecutionState<'_>, &CallInfo) -> Result<Value, Value>>;

/// Arguments of one invocation
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// The function being called
    pub callee: GcRef,
    /// Receiver
    pub this: Value,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Set for `new` calls
    pub new_target: Option<GcRef>,
}

impl CallInfo {
    /// Argument `i`, `undefined` when absent
    pub fn arg(&self, i: usize) -> Value {
        self.args.get(i).cloned().unwrap_or_default()
    }

    /// Whether this is a `new` call
    pub fn is_construct_call(&self) -> bool {
        self.new_target.is_some()
    }
}

/// Callable object payload
#[derive(Clone)]
pub struct FunctionKind {
    /// `name`
    pub name: Rc<str>,
    /// `length`
    pub length: u32,
    /// Body
    pub native: NativeFunction,
    /// Whether `new` is allowed
    pub is_constructor: bool,
}

impl std::fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionKind")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("is_constructor", &self.is_constructor)
            .finish()
    }
}
