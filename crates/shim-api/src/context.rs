//! Contexts and the entered-context stack

use crate::handle::ValueWrap;
use crate::isolate::IsolateWrap;
use crate::local::{Local, MaybeLocal};
use crate::types;
use shim_gc::{GcRef, GcTraceable};
use shim_vm::Value as JsValue;
use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;

#[derive(Debug, Clone)]
enum EmbedderSlot {
    Empty,
    Value(JsValue),
    Aligned(*mut c_void),
}

/// Heap cell behind a context handle: the engine realm plus embedder data
#[derive(Debug)]
pub struct ContextWrap {
    engine: GcRef,
    embedder_data: RefCell<Vec<EmbedderSlot>>,
}

impl ContextWrap {
    fn new(engine: GcRef) -> Self {
        Self {
            engine,
            embedder_data: RefCell::new(Vec::new()),
        }
    }

    /// Engine realm
    pub fn engine(&self) -> GcRef {
        self.engine
    }

    fn set_slot(&self, index: usize, slot: EmbedderSlot) {
        let mut data = self.embedder_data.borrow_mut();
        if data.len() <= index {
            data.resize(index + 1, EmbedderSlot::Empty);
        }
        data[index] = slot;
    }

    fn slot(&self, index: usize) -> EmbedderSlot {
        self.embedder_data
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or(EmbedderSlot::Empty)
    }
}

impl GcTraceable for ContextWrap {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        tracer(self.engine);
        for slot in self.embedder_data.borrow().iter() {
            if let EmbedderSlot::Value(v) = slot {
                v.trace(tracer);
            }
        }
    }
}

impl IsolateWrap {
    fn context_cell(&self, wrap: GcRef) -> Rc<ContextWrap> {
        let cell = self.value_wrap(wrap).context();
        match self.vm().heap().get::<ContextWrap>(cell) {
            Some(context) => context,
            None => fatal!("context handle {wrap:?} refers to a reclaimed context"),
        }
    }

    /// Push the context behind `wrap`
    pub fn push_context(&self, wrap: GcRef) {
        trace_call!("CONTEXT", ?wrap, "push");
        self.contexts.borrow_mut().push(wrap);
    }

    /// Pop the context behind `expected`. Aborts when another context is
    /// on top.
    pub fn pop_context(&self, expected: GcRef) {
        trace_call!("CONTEXT", ?expected, "pop");
        let top = self.contexts.borrow().last().copied();
        let Some(top) = top else {
            fatal!("context exited with no context entered")
        };
        let same = top == expected
            || self.value_wrap(top).context() == self.value_wrap(expected).context();
        shim_check!(same, "exiting a context that is not the current one");
        self.contexts.borrow_mut().pop();
    }

    /// Number of entered contexts
    pub fn context_depth(&self) -> usize {
        self.contexts.borrow().len()
    }

    /// Top of the entered-context stack
    pub fn get_current_context(&self) -> MaybeLocal<types::Context> {
        let top = self.contexts.borrow().last().copied()?;
        Some(Local::from_wrap(top))
    }

    /// Engine realm of the current context; aborts when none is entered
    pub fn current_engine_context(&self) -> GcRef {
        let top = self.contexts.borrow().last().copied();
        match top {
            Some(wrap) => self.context_cell(wrap).engine(),
            None => fatal!("no context entered"),
        }
    }

    /// Engine realm of the current context, or the compile-only realm
    pub(crate) fn engine_context_or_pure(&self) -> GcRef {
        let top = self.contexts.borrow().last().copied();
        match top {
            Some(wrap) => self.context_cell(wrap).engine(),
            None => self.pure_context(),
        }
    }
}

/// Constructors for context handles
pub struct Context;

impl Context {
    /// New context, shaping the global object from `global_template`
    pub fn new(
        isolate: &IsolateWrap,
        global_template: Option<Local<types::ObjectTemplate>>,
    ) -> Local<types::Context> {
        trace_call!("CONTEXT", "new");
        let template = global_template.map(|t| t.value_wrap().otpl());
        let vm = isolate.vm();
        let engine = vm.create_context(template);
        if let Some(global) = template.map(|_| vm.context_data(engine).global()) {
            crate::extra_data::materialize(vm, global, None);
        }
        let cell = vm.heap().allocate(ContextWrap::new(engine));
        isolate.new_local(ValueWrap::create_context(cell))
    }
}

impl Local<types::Context> {
    fn cell(&self) -> Rc<ContextWrap> {
        let isolate = api_enter_no_exception!();
        isolate.context_cell(self.wrap_ref())
    }

    /// Engine realm
    pub fn engine_context(&self) -> GcRef {
        self.cell().engine()
    }

    /// Make this the current context
    pub fn enter(&self) {
        let isolate = api_enter_no_exception!();
        isolate.push_context(self.wrap_ref());
    }

    /// Undo [`Local::<types::Context>::enter`]
    pub fn exit(&self) {
        let isolate = api_enter_no_exception!();
        isolate.pop_context(self.wrap_ref());
    }

    /// Global object
    pub fn global(&self) -> Local<types::Object> {
        let isolate = api_enter_no_exception!();
        let global = isolate
            .vm()
            .context_data(self.engine_context())
            .global();
        isolate.new_value(JsValue::Object(global))
    }

    /// Store a value in embedder slot `index`
    pub fn set_embedder_data(&self, index: usize, value: Local<types::Value>) {
        let value = value.value_wrap().value();
        self.cell().set_slot(index, EmbedderSlot::Value(value));
    }

    /// Value in embedder slot `index`; `undefined` when unset
    pub fn get_embedder_data(&self, index: usize) -> Local<types::Value> {
        let isolate = api_enter_no_exception!();
        match self.cell().slot(index) {
            EmbedderSlot::Value(v) => isolate.new_value(v),
            _ => isolate.new_value(JsValue::Undefined),
        }
    }

    /// Store an embedder pointer in slot `index`
    pub fn set_aligned_pointer_in_embedder_data(&self, index: usize, pointer: *mut c_void) {
        self.cell().set_slot(index, EmbedderSlot::Aligned(pointer));
    }

    /// Embedder pointer in slot `index`; null when unset
    pub fn get_aligned_pointer_from_embedder_data(&self, index: usize) -> *mut c_void {
        match self.cell().slot(index) {
            EmbedderSlot::Aligned(p) => p,
            _ => std::ptr::null_mut(),
        }
    }
}

/// Enters a context for its lifetime
#[must_use = "the context is exited when the scope is dropped"]
pub struct ContextScope {
    isolate: Rc<IsolateWrap>,
    context: GcRef,
}

impl ContextScope {
    /// Enter `context`
    pub fn new(context: Local<types::Context>) -> Self {
        let isolate = api_enter_no_exception!();
        isolate.push_context(context.wrap_ref());
        Self {
            isolate,
            context: context.wrap_ref(),
        }
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        self.isolate.pop_context(self.context);
    }
}
