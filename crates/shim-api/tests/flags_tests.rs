//! Command-line flag parsing and the behavior flags switch on

use serial_test::serial;
use shim_api::{
    Context, ContextScope, CreateParams, FlagType, Flags, HandleScope, IsolateScope, IsolateWrap,
    TryCatch, types,
};

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn reset_on_exit() -> scopeguard::ScopeGuard<(), impl FnOnce(())> {
    Flags::reset();
    scopeguard::guard((), |_| Flags::reset())
}

#[test]
#[serial]
fn test_recognized_flags_are_removed() {
    let _reset = reset_on_exit();
    let mut args = argv(&[
        "host",
        "--expose-gc",
        "--trace-call=ISOLATE,-GC",
        "--unknown-flag",
        "script.js",
        "--use_strict",
    ]);
    Flags::set_flags_from_command_line(&mut args, true);

    assert_eq!(args, argv(&["host", "script.js"]));
    assert!(Flags::is(FlagType::ExposeGC));
    assert!(Flags::is(FlagType::UseStrict));
    assert!(Flags::is(FlagType::TraceCall));
    assert!(!Flags::is(FlagType::TraceGC));
    assert_eq!(Flags::trace_call_ids(), vec!["ISOLATE".to_string()]);
    assert!(Flags::is_negative_trace_call_id("GC"));
    assert!(Flags::is_trace_call_enabled("ISOLATE"));
    assert!(!Flags::is_trace_call_enabled("GC"));
    assert!(!Flags::is_trace_call_enabled("SCOPE"));
}

#[test]
#[serial]
fn test_flags_kept_without_remove() {
    let _reset = reset_on_exit();
    let mut args = argv(&["host", "--trace-gc", "--bogus"]);
    Flags::set_flags_from_command_line(&mut args, false);
    assert_eq!(args, argv(&["host", "--trace-gc", "--bogus"]));
    assert!(Flags::is_trace_gc_enabled());
}

#[test]
#[serial]
fn test_parsing_stops_at_double_dash() {
    let _reset = reset_on_exit();
    let mut args = argv(&["host", "--", "--expose-gc", "-"]);
    Flags::set_flags_from_command_line(&mut args, true);
    assert_eq!(args, argv(&["host", "--", "--expose-gc", "-"]));
    assert!(!Flags::is_expose_gc_enabled());
}

#[test]
#[serial]
fn test_pass_through_flags() {
    let _reset = reset_on_exit();
    let mut args = argv(&["host", "--stack-size=2048", "--nolazy"]);
    Flags::set_flags_from_command_line(&mut args, true);
    assert_eq!(args, argv(&["host"]));
    assert!(!Flags::is(FlagType::ExposeGC));
}

#[test]
#[serial]
fn test_bare_trace_call_enables_every_id() {
    let _reset = reset_on_exit();
    Flags::set_flags_from_string("--trace-call --internal_log");
    assert!(Flags::is(FlagType::InternalLog));
    assert!(Flags::trace_call_ids().is_empty());
    assert!(Flags::is_trace_call_enabled("CONTEXT"));
}

#[test]
#[serial]
fn test_idle_gc_switch() {
    let _reset = reset_on_exit();
    assert!(Flags::is_idle_gc_enabled());
    Flags::set(FlagType::DisableIdleGC);
    assert!(!Flags::is_idle_gc_enabled());
    Flags::clear(FlagType::DisableIdleGC);
    assert!(Flags::is_idle_gc_enabled());
}

#[test]
#[serial]
fn test_caught_exception_does_not_abort() {
    let _reset = reset_on_exit();
    Flags::set(FlagType::AbortOnUncaughtException);

    let isolate = IsolateWrap::new(CreateParams::default());
    let _entered = IsolateScope::new(&isolate);
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let try_catch = TryCatch::new(&isolate);
    let text = types::String::new_from_utf8(&isolate, "handled").unwrap();
    isolate.throw_exception(types::Exception::error(text));
    assert!(try_catch.has_caught());
}

#[test]
#[serial]
#[should_panic(expected = "Uncaught Error: fatal")]
fn test_abort_on_uncaught_exception() {
    let _reset = reset_on_exit();
    Flags::set_flags_from_string("--abort-on-uncaught-exception");

    let isolate = IsolateWrap::new(CreateParams::default());
    let _entered = IsolateScope::new(&isolate);
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let text = types::String::new_from_utf8(&isolate, "fatal").unwrap();
    isolate.throw_exception(types::Exception::error(text));
}
