//! Exceptions thrown by scripts and host callbacks

use shim_api::object::undefined;
use shim_api::{
    Context, ContextScope, CreateParams, FunctionCallbackInfo, HandleScope, IsolateScope,
    IsolateWrap, Local, ScriptOrigin, TryCatch, types,
};
use shim_vm::{Value as JsValue, VmError};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const THROWING: &str = "throw new TypeError('boom')";
const CALLS_HOST: &str = "host()";
const CATCHES_HOST: &str = "try { host() } catch (e) { 'recovered' }";

thread_local! {
    static INNER_CAUGHT: Cell<bool> = const { Cell::new(false) };
}

struct Fixture {
    isolate: Rc<IsolateWrap>,
    _entered: IsolateScope,
}

impl Fixture {
    fn new() -> Self {
        INNER_CAUGHT.with(|c| c.set(false));
        let isolate = IsolateWrap::new(CreateParams::default());
        let entered = IsolateScope::new(&isolate);
        let precompiled = isolate.vm().precompiled();
        precompiled.register(THROWING, |state| {
            state.set_location(3, 7);
            Err(state.throw(VmError::type_error("boom")))
        });
        precompiled.register(CALLS_HOST, |state| {
            state.set_location(1, 1);
            let global = JsValue::Object(state.global());
            let host = state.get(&global, "host")?;
            state.call(&host, JsValue::Undefined, &[])
        });
        precompiled.register(CATCHES_HOST, |state| {
            state.set_location(1, 7);
            let global = JsValue::Object(state.global());
            let host = state.get(&global, "host")?;
            match state.try_catch(|state| state.call(&host, JsValue::Undefined, &[])) {
                Ok(value) => Ok(value),
                Err(_) => Ok(JsValue::from("recovered")),
            }
        });
        Self {
            isolate,
            _entered: entered,
        }
    }

    fn install_host(&self, context: Local<types::Context>, callback: fn(&FunctionCallbackInfo)) {
        let function = types::Function::new(context, callback, None, 0).unwrap();
        let key = types::String::new_from_utf8(&self.isolate, "host").unwrap();
        context
            .global()
            .set(context, key.as_value(), function.as_value())
            .unwrap();
    }

    fn run(&self, context: Local<types::Context>, source: &str) -> Option<Local<types::Value>> {
        let source = types::String::new_from_utf8(&self.isolate, source).unwrap();
        let origin = ScriptOrigin::new("main.js");
        let script = types::Script::compile(context, source, Some(&origin))?;
        script.run(context)
    }

    fn collect_messages(&self) -> Rc<RefCell<Vec<String>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        self.isolate
            .add_message_listener(move |message, _| sink.borrow_mut().push(message.get().to_string()));
        seen
    }
}

fn throw_range_error(info: &FunctionCallbackInfo) {
    let isolate = info.get_isolate();
    let text = types::String::new_from_utf8(isolate, "too far").unwrap();
    isolate.throw_exception(types::Exception::range_error(text));
}

fn throw_and_catch_inside(info: &FunctionCallbackInfo) {
    let isolate = info.get_isolate();
    let try_catch = TryCatch::new(isolate);
    let text = types::String::new_from_utf8(isolate, "contained").unwrap();
    isolate.throw_exception(types::Exception::error(text));
    INNER_CAUGHT.with(|c| c.set(try_catch.has_caught()));
    info.get_return_value().set_int32(1);
}

fn terminate(info: &FunctionCallbackInfo) {
    info.get_isolate().terminate_execution();
}

#[test]
fn test_script_throw_is_caught_with_location() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);

    let try_catch = TryCatch::new(&fixture.isolate);
    assert!(fixture.run(context, THROWING).is_none());
    assert!(try_catch.has_caught());
    assert!(try_catch.can_continue());

    let exception = try_catch.exception().unwrap();
    assert!(exception.is_native_error());
    let message = try_catch.message().unwrap();
    assert_eq!(message.get(), "Uncaught TypeError: boom");
    assert_eq!(message.get_script_resource_name(), "main.js");
    assert_eq!(message.get_line_number(), 3);
    assert_eq!(message.get_start_column(), 6);
    assert_eq!(message.get_stack_trace().len(), 1);

    let frames = types::Exception::get_stack_trace(exception).unwrap();
    assert_eq!(frames.len(), 1);
    let stack = try_catch.stack_trace().unwrap();
    assert!(stack.cast::<types::String>().to_rust_string().starts_with("TypeError: boom"));

    try_catch.reset();
    assert!(!try_catch.has_caught());
    assert!(try_catch.message().is_none());
}

#[test]
fn test_compile_failure_is_syntax_error() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);

    let try_catch = TryCatch::new(&fixture.isolate);
    assert!(fixture.run(context, "never registered(").is_none());
    assert!(try_catch.has_caught());
    assert!(try_catch.message().unwrap().get().contains("SyntaxError"));
}

#[test]
fn test_uncaught_exception_reaches_listeners() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);
    let seen = fixture.collect_messages();

    assert!(fixture.run(context, THROWING).is_none());
    assert_eq!(*seen.borrow(), vec!["Uncaught TypeError: boom".to_string()]);
    assert!(!fixture.isolate.has_pending_exception());
}

#[test]
fn test_verbose_try_catch_also_reports() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);
    let seen = fixture.collect_messages();

    let quiet = TryCatch::new(&fixture.isolate);
    assert!(fixture.run(context, THROWING).is_none());
    assert!(quiet.has_caught());
    assert!(seen.borrow().is_empty());
    drop(quiet);

    let verbose = TryCatch::new(&fixture.isolate);
    verbose.set_verbose(true);
    assert!(fixture.run(context, THROWING).is_none());
    assert!(verbose.has_caught());
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn test_host_throw_reaches_outer_try_catch() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);
    fixture.install_host(context, throw_range_error);

    let try_catch = TryCatch::new(&fixture.isolate);
    assert!(fixture.run(context, CALLS_HOST).is_none());
    assert!(try_catch.has_caught());
    assert_eq!(try_catch.message().unwrap().get(), "Uncaught RangeError: too far");
    assert_eq!(fixture.isolate.call_depth(), 0);
    assert!(!fixture.isolate.has_scheduled_exception());
}

#[test]
fn test_host_throw_caught_by_script_try() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);
    fixture.install_host(context, throw_range_error);
    let seen = fixture.collect_messages();

    let result = fixture.run(context, CATCHES_HOST).unwrap();
    assert_eq!(result.cast::<types::String>().to_rust_string(), "recovered");
    assert!(seen.borrow().is_empty());
}

#[test]
fn test_try_catch_inside_callback_takes_throw() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);
    fixture.install_host(context, throw_and_catch_inside);

    let outer = TryCatch::new(&fixture.isolate);
    let result = fixture.run(context, CALLS_HOST).unwrap();
    assert_eq!(result.int32_value(), Some(1));
    assert!(INNER_CAUGHT.with(|c| c.get()));
    assert!(!outer.has_caught());
}

#[test]
fn test_rethrow_keeps_first_location() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);

    let outer = TryCatch::new(&fixture.isolate);
    let caught = {
        let inner = TryCatch::new(&fixture.isolate);
        assert!(fixture.run(context, THROWING).is_none());
        assert!(inner.has_caught());
        assert!(!outer.has_caught());
        let caught = inner.exception().unwrap();
        assert!(inner.rethrow().is_undefined());
        caught
    };

    assert!(outer.has_caught());
    assert!(outer.exception().unwrap().strict_equals(caught));
    assert_eq!(outer.message().unwrap().get_line_number(), 3);
}

#[test]
fn test_host_throw_outside_scripts() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);

    let try_catch = TryCatch::new(&fixture.isolate);
    let text = types::String::new_from_utf8(&fixture.isolate, "direct").unwrap();
    let error = types::Exception::error(text);
    assert!(fixture.isolate.throw_exception(error).is_undefined());
    assert!(try_catch.has_caught());
    assert!(try_catch.exception().unwrap().strict_equals(error));
}

#[test]
fn test_second_throw_keeps_first_exception() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);
    let seen = fixture.collect_messages();

    let try_catch = TryCatch::new(&fixture.isolate);
    let text = |s: &str| types::String::new_from_utf8(&fixture.isolate, s).unwrap();
    let first = types::Exception::error(text("first"));
    let second = types::Exception::error(text("second"));
    fixture.isolate.throw_exception(first);
    fixture.isolate.throw_exception(second);

    assert!(try_catch.exception().unwrap().strict_equals(first));
    assert_eq!(try_catch.message().unwrap().get(), "Uncaught Error: first");
    assert!(seen.borrow().is_empty());
    assert!(!fixture.isolate.has_pending_exception());
}

#[test]
fn test_create_message_for_unthrown_error() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);

    let text = types::String::new_from_utf8(&fixture.isolate, "never thrown").unwrap();
    let error = types::Exception::reference_error(text);
    assert!(types::Exception::get_stack_trace(error).is_none());
    let message = types::Exception::create_message(error);
    assert_eq!(message.get(), "Uncaught ReferenceError: never thrown");
    assert_eq!(message.get_line_number(), 0);
}

#[test]
fn test_termination_from_callback() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);
    fixture.install_host(context, terminate);

    let try_catch = TryCatch::new(&fixture.isolate);
    assert!(fixture.run(context, CALLS_HOST).is_none());
    assert!(try_catch.has_terminated());
    assert!(!try_catch.can_continue());
    assert!(!try_catch.has_caught());

    assert!(fixture.run(context, THROWING).is_none());
    assert!(!try_catch.has_caught());

    fixture.isolate.cancel_terminate_execution();
    assert!(fixture.run(context, THROWING).is_none());
    assert!(try_catch.has_caught());
}

#[test]
fn test_terminate_from_another_thread() {
    let fixture = Fixture::new();
    let _scope = HandleScope::new(&fixture.isolate);
    let context = Context::new(&fixture.isolate, None);
    let _context_scope = ContextScope::new(context);
    fixture.install_host(context, throw_range_error);

    let handle = fixture.isolate.thread_safe_handle();
    std::thread::spawn(move || handle.terminate_execution())
        .join()
        .unwrap();
    assert!(fixture.isolate.is_execution_terminating());

    let try_catch = TryCatch::new(&fixture.isolate);
    assert!(fixture.run(context, CALLS_HOST).is_none());
    assert!(!try_catch.has_caught());

    fixture.isolate.cancel_terminate_execution();
    assert!(fixture.run(context, CALLS_HOST).is_none());
    assert!(try_catch.has_caught());
    assert!(undefined(&fixture.isolate).as_value().is_undefined());
}
