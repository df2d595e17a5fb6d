//! Process-wide flags parsed from the command line.

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::sync::LazyLock;

/// One recognized flag bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FlagType {
    /// `--expose-gc`
    ExposeGC = 1 << 0,
    /// `--use-strict`
    UseStrict = 1 << 1,
    /// `--off-idlegc`
    DisableIdleGC = 1 << 2,
    /// `--harmony-top-level-await`
    TopLevelWait = 1 << 3,
    /// `--allow-code-generation-from-strings`
    AllowCodeGenerationFromString = 1 << 4,
    /// `--abort-on-uncaught-exception`
    AbortOnUncaughtException = 1 << 5,
    /// `--expose-externalize-string`
    ExposeExternalizeString = 1 << 6,
    /// `--trace-call[=ids]`
    TraceCall = 1 << 7,
    /// `--trace-gc`
    TraceGC = 1 << 8,
    /// `--internal-log`
    InternalLog = 1 << 9,
}

/// What a command-line option means to the shim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recognized {
    Bit(FlagType),
    TraceCall,
    /// Host option accepted without effect here
    PassThrough,
}

fn recognize(name: &str) -> Option<Recognized> {
    let recognized = match name {
        "expose-gc" => Recognized::Bit(FlagType::ExposeGC),
        "use-strict" => Recognized::Bit(FlagType::UseStrict),
        "off-idlegc" => Recognized::Bit(FlagType::DisableIdleGC),
        "harmony-top-level-await" => Recognized::Bit(FlagType::TopLevelWait),
        "allow-code-generation-from-strings" => {
            Recognized::Bit(FlagType::AllowCodeGenerationFromString)
        }
        "abort-on-uncaught-exception" => Recognized::Bit(FlagType::AbortOnUncaughtException),
        "expose-externalize-string" => Recognized::Bit(FlagType::ExposeExternalizeString),
        "trace-gc" => Recognized::Bit(FlagType::TraceGC),
        "internal-log" => Recognized::Bit(FlagType::InternalLog),
        "trace-call" => Recognized::TraceCall,
        "trace-debug" | "debug" | "stack-size" | "nolazy" => Recognized::PassThrough,
        _ => return None,
    };
    Some(recognized)
}

#[derive(Debug, Default)]
struct FlagsState {
    bits: u32,
    trace_call_ids: FxHashSet<String>,
    negative_trace_call_ids: FxHashSet<String>,
}

static STATE: LazyLock<RwLock<FlagsState>> = LazyLock::new(|| RwLock::new(FlagsState::default()));

/// Accessors for the process-wide flag state
pub struct Flags;

impl Flags {
    /// Whether `flag` is set
    pub fn is(flag: FlagType) -> bool {
        STATE.read().bits & flag as u32 != 0
    }

    /// Set `flag`
    pub fn set(flag: FlagType) {
        STATE.write().bits |= flag as u32;
    }

    /// Clear `flag`
    pub fn clear(flag: FlagType) {
        STATE.write().bits &= !(flag as u32);
    }

    /// Clear every bit and trace id
    pub fn reset() {
        *STATE.write() = FlagsState::default();
    }

    /// `--expose-gc`
    pub fn is_expose_gc_enabled() -> bool {
        Self::is(FlagType::ExposeGC)
    }

    /// `--trace-gc`
    pub fn is_trace_gc_enabled() -> bool {
        Self::is(FlagType::TraceGC)
    }

    /// Idle-time collection unless `--off-idlegc`
    pub fn is_idle_gc_enabled() -> bool {
        !Self::is(FlagType::DisableIdleGC)
    }

    /// Whether call tracing is on for `id`.
    ///
    /// Requires `--trace-call`. Ids listed with a leading `-` are always
    /// off; otherwise an empty id list or `*` enables every id.
    pub fn is_trace_call_enabled(id: &str) -> bool {
        let state = STATE.read();
        if state.bits & FlagType::TraceCall as u32 == 0 {
            return false;
        }
        if state.negative_trace_call_ids.contains(id) {
            return false;
        }
        state.trace_call_ids.is_empty()
            || state.trace_call_ids.contains("*")
            || state.trace_call_ids.contains(id)
    }

    /// Positive trace-call ids
    pub fn trace_call_ids() -> Vec<String> {
        STATE.read().trace_call_ids.iter().cloned().collect()
    }

    /// Whether `id` was listed with a leading `-`
    pub fn is_negative_trace_call_id(id: &str) -> bool {
        STATE.read().negative_trace_call_ids.contains(id)
    }

    fn add_trace_call_ids(list: &str) {
        let mut state = STATE.write();
        for id in list.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            match id.strip_prefix('-') {
                Some(negative) if !negative.is_empty() => {
                    state.negative_trace_call_ids.insert(negative.to_string());
                }
                Some(_) => {}
                None => {
                    state.trace_call_ids.insert(id.to_string());
                }
            }
        }
    }

    /// Apply one `--name[=value]` option. Returns whether it was recognized.
    fn apply(arg: &str) -> bool {
        let body = arg.trim_start_matches('-');
        let (name, value) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };
        let name = name.replace('_', "-");

        match recognize(&name) {
            Some(Recognized::Bit(flag)) => {
                Self::set(flag);
                true
            }
            Some(Recognized::TraceCall) => {
                Self::set(FlagType::TraceCall);
                if let Some(ids) = value {
                    Self::add_trace_call_ids(ids);
                }
                true
            }
            Some(Recognized::PassThrough) => true,
            None => false,
        }
    }

    /// Parse options out of `argv` (`argv[0]` is the program name).
    ///
    /// Recognized options set their bits. Unrecognized options are logged.
    /// With `remove_flags`, every option consumed here, recognized or not,
    /// is removed from `argv`. Parsing stops at `--`.
    pub fn set_flags_from_command_line(argv: &mut Vec<String>, remove_flags: bool) {
        let mut kept = Vec::with_capacity(argv.len());
        let mut args = std::mem::take(argv).into_iter();
        if let Some(program) = args.next() {
            kept.push(program);
        }

        let mut done = false;
        for arg in args {
            if done || !arg.starts_with('-') || arg == "-" {
                kept.push(arg);
                continue;
            }
            if arg == "--" {
                done = true;
                kept.push(arg);
                continue;
            }
            if !Self::apply(&arg) {
                tracing::warn!(target: "shim::flags", flag = %arg, "unknown flag ignored");
            }
            if !remove_flags {
                kept.push(arg);
            }
        }
        *argv = kept;
    }

    /// Parse a whitespace-separated option string
    pub fn set_flags_from_string(flags: &str) {
        for arg in flags.split_whitespace() {
            if !Self::apply(arg) {
                tracing::warn!(target: "shim::flags", flag = %arg, "unknown flag ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_underscore_normalized() {
        Flags::reset();
        Flags::set_flags_from_string("--expose_gc --off_idlegc");
        assert!(Flags::is_expose_gc_enabled());
        assert!(!Flags::is_idle_gc_enabled());
        Flags::reset();
    }

    #[test]
    #[serial]
    fn test_trace_call_disabled_without_bit() {
        Flags::reset();
        assert!(!Flags::is_trace_call_enabled("ISOLATE"));
        Flags::set(FlagType::TraceCall);
        assert!(Flags::is_trace_call_enabled("ISOLATE"));
        Flags::reset();
    }

    #[test]
    #[serial]
    fn test_star_enables_all_but_negative() {
        Flags::reset();
        Flags::set_flags_from_string("--trace-call=*,-GC");
        assert!(Flags::is_trace_call_enabled("ANY"));
        assert!(!Flags::is_trace_call_enabled("GC"));
        Flags::reset();
    }
}
