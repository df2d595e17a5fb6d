//! Guarded execution.
//!
//! [`Evaluator::execute`] runs a closure against a realm and reports either
//! the produced value or the thrown value together with the stack that was
//! active when it was thrown.

use crate::execution::ExecutionState;
use crate::value::Value;
use crate::vm::VmInstance;
use shim_gc::{GcRef, GcTraceable};
use std::rc::Rc;

/// One frame of a captured stack
#[derive(Debug, Clone, PartialEq)]
pub struct StackTraceData {
    /// Resource name
    pub src: Rc<str>,
    /// Full source text of the resource
    pub source_code: Rc<str>,
    /// Function name, empty for top-level code
    pub function_name: Rc<str>,
    /// 1-based line
    pub line: i32,
    /// 1-based column
    pub column: i32,
    /// Whether the frame is a function call
    pub is_function: bool,
    /// Whether the frame is a `new` call
    pub is_constructor: bool,
}

impl GcTraceable for StackTraceData {}

/// Outcome of [`Evaluator::execute`]
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// Value or thrown value
    pub result: Result<Value, Value>,
    /// Stack captured at the throw, innermost first; empty on success
    pub stack_trace: Vec<StackTraceData>,
}

impl EvalResult {
    /// Whether nothing was thrown
    pub fn is_successful(&self) -> bool {
        self.result.is_ok()
    }

    /// Produced value
    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    /// Thrown value
    pub fn error(&self) -> Option<&Value> {
        self.result.as_ref().err()
    }
}

/// Runs closures with thrown values captured
pub struct Evaluator;

impl Evaluator {
    /// Run `f` in `context`.
    ///
    /// Leaves idle mode first. Nested calls share the VM's frame stack, so
    /// a stack captured deeper down is reported by the innermost `execute`
    /// that sees the throw.
    pub fn execute<F>(vm: &VmInstance, context: GcRef, f: F) -> EvalResult
    where
        F: FnOnce(&mut ExecutionState<'_>) -> Result<Value, Value>,
    {
        vm.exit_idle_mode();
        let mut state = ExecutionState::new(vm, context);
        match f(&mut state) {
            Ok(value) => EvalResult {
                result: Ok(value),
                stack_trace: Vec::new(),
            },
            Err(thrown) => {
                let stack_trace = vm
                    .take_captured_stack()
                    .unwrap_or_else(|| vm.capture_stack_trace());
                EvalResult {
                    result: Err(thrown),
                    stack_trace,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_has_no_stack() {
        let vm = VmInstance::default();
        let ctx = vm.create_context(None);
        let result = Evaluator::execute(&vm, ctx, |_| Ok(Value::from(42)));
        assert!(result.is_successful());
        assert_eq!(result.value(), Some(&Value::from(42)));
        assert!(result.stack_trace.is_empty());
    }

    #[test]
    fn test_execute_leaves_idle_mode() {
        let vm = VmInstance::default();
        let ctx = vm.create_context(None);
        vm.enter_idle_mode();
        Evaluator::execute(&vm, ctx, |_| Ok(Value::Undefined));
        assert!(!vm.is_idle());
    }
}
