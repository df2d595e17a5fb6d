//! Entry and invariant macros

/// Abort on a broken invariant. Logs before panicking so the message
/// survives `panic = "abort"`.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        tracing::error!(target: "shim::fatal", $($arg)+);
        panic!($($arg)+)
    }};
}

/// `fatal!` unless the condition holds
macro_rules! shim_check {
    ($cond:expr) => {
        if !$cond {
            fatal!("check failed: {}", stringify!($cond))
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            fatal!($($arg)+)
        }
    };
}

/// Code that must never run
macro_rules! shim_unreachable {
    () => {
        fatal!("unreachable code reached")
    };
    ($($arg:tt)+) => {
        fatal!($($arg)+)
    };
}

/// Call tracing gated by `--trace-call`
macro_rules! trace_call {
    ($id:expr) => {
        trace_call!($id, "")
    };
    ($id:expr, $($arg:tt)+) => {
        if $crate::flags::Flags::is_trace_call_enabled($id) {
            tracing::trace!(target: "shim::call", id = $id, $($arg)+);
        }
    };
}

/// Resolve the current isolate for an API entry. Returns `$ret` from the
/// enclosing function while execution is terminating.
macro_rules! api_enter {
    ($ret:expr) => {{
        let isolate = $crate::isolate::IsolateWrap::current_or_fatal();
        if isolate.is_execution_terminating() {
            tracing::debug!(target: "shim::api", "entry skipped: execution terminating");
            return $ret;
        }
        isolate
    }};
}

/// Resolve the current isolate without the termination check
macro_rules! api_enter_no_exception {
    () => {
        $crate::isolate::IsolateWrap::current_or_fatal()
    };
}

/// Embedding API method this shim does not support; logs and yields `$ret`
macro_rules! api_unimplemented {
    ($name:expr, $ret:expr) => {{
        tracing::debug!(target: "shim::api", "{} is not implemented", $name);
        $ret
    }};
}
