//! Runs engine work for an API entry and routes what it throws

use crate::isolate::IsolateWrap;
use shim_gc::GcRef;
use shim_vm::{EvalResult, Evaluator, ExecutionState, Value as JsValue};

/// Run `f` in the engine realm `context`.
///
/// `None` means nothing was produced: the isolate is terminating, or `f`
/// threw and the thrown value went through
/// [`IsolateWrap::handle_exception`].
pub(crate) fn execute<R>(
    isolate: &IsolateWrap,
    context: GcRef,
    f: impl FnOnce(&mut ExecutionState<'_>) -> Result<R, JsValue>,
) -> Option<R> {
    if isolate.is_execution_terminating() {
        isolate.mark_terminated();
        return None;
    }

    let mut produced = None;
    let EvalResult {
        result,
        stack_trace,
    } = Evaluator::execute(isolate.vm(), context, |state| {
        produced = Some(f(state)?);
        Ok(JsValue::Undefined)
    });

    if let Err(thrown) = result {
        isolate.handle_exception(thrown, stack_trace);
        return None;
    }
    if isolate.is_execution_terminating() {
        isolate.mark_terminated();
        return None;
    }
    produced
}

