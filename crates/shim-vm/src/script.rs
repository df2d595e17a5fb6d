//! Scripts.
//!
//! The VM does not parse source text. A [`ScriptCompiler`] maps source text
//! to an executable body; [`PrecompiledScripts`] is the registry-backed
//! compiler used by default.

use crate::error::VmError;
use crate::execution::ExecutionState;
use crate::value::Value;
use rustc_hash::FxHashMap;
use shim_gc::GcTraceable;
use std::cell::RefCell;
use std::rc::Rc;

/// Executable body of a compiled script
pub type ScriptBody = Rc<dyn Fn(&mut ExecutionState<'_>) -> Result<Value, Value>>;

/// Turns source text into an executable body
pub trait ScriptCompiler {
    /// Compile `source`; `src_name` is only used for diagnostics
    fn compile(&self, src_name: &str, source: &str) -> Result<ScriptBody, VmError>;
}

/// Compiler backed by bodies registered ahead of time, keyed by source text
#[derive(Default)]
pub struct PrecompiledScripts {
    bodies: RefCell<FxHashMap<Rc<str>, ScriptBody>>,
}

impl PrecompiledScripts {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body for `source`, replacing any previous one
    pub fn register(
        &self,
        source: impl Into<Rc<str>>,
        body: impl Fn(&mut ExecutionState<'_>) -> Result<Value, Value> + 'static,
    ) {
        self.bodies.borrow_mut().insert(source.into(), Rc::new(body));
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.bodies.borrow().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.bodies.borrow().is_empty()
    }
}

impl ScriptCompiler for PrecompiledScripts {
    fn compile(&self, src_name: &str, source: &str) -> Result<ScriptBody, VmError> {
        self.bodies.borrow().get(source).cloned().ok_or_else(|| {
            VmError::syntax_error(format!("{src_name}: no compiled body for source"))
        })
    }
}

/// A compiled script bound to its source
pub struct Script {
    src_name: Rc<str>,
    source: Rc<str>,
    body: ScriptBody,
}

impl Script {
    pub(crate) fn new(src_name: Rc<str>, source: Rc<str>, body: ScriptBody) -> Self {
        Self {
            src_name,
            source,
            body,
        }
    }

    /// Resource name
    pub fn src_name(&self) -> Rc<str> {
        self.src_name.clone()
    }

    /// Source text
    pub fn source(&self) -> Rc<str> {
        self.source.clone()
    }

    pub(crate) fn body(&self) -> ScriptBody {
        self.body.clone()
    }
}

impl GcTraceable for Script {}
