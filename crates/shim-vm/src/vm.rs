//! VM instance: heap, realms, templates, scripts and the call-frame stack.

use crate::array_buffer::ArrayBufferObject;
use crate::context::Context;
use crate::error::{ErrorKind, VmError};
use crate::evaluator::StackTraceData;
use crate::execution::ExecutionState;
use crate::function::{CallInfo, FunctionKind, NativeFunction};
use crate::object::{JsObject, ObjectKind};
use crate::script::{PrecompiledScripts, Script, ScriptCompiler};
use crate::template::{FunctionTemplate, ObjectTemplate, TemplateValue};
use crate::value::{Value, number_to_string};
use shim_gc::{CollectStats, GcConfig, GcRef, GcTraceable, Heap};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Configuration for a VM instance.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum frames captured for a thrown value
    pub stack_trace_limit: usize,
    /// Maximum nested calls before a RangeError
    pub max_call_depth: usize,
    /// Heap configuration
    pub gc: GcConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_trace_limit: 10,
            max_call_depth: 256,
            gc: GcConfig::default(),
        }
    }
}

/// One active call
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) function_name: Rc<str>,
    pub(crate) src: Rc<str>,
    pub(crate) source: Rc<str>,
    pub(crate) line: Cell<i32>,
    pub(crate) column: Cell<i32>,
    pub(crate) is_function: bool,
    pub(crate) is_constructor: bool,
}

impl Frame {
    pub(crate) fn native(name: Rc<str>, is_constructor: bool) -> Self {
        Self {
            function_name: name,
            src: Rc::from(""),
            source: Rc::from(""),
            line: Cell::new(0),
            column: Cell::new(0),
            is_function: true,
            is_constructor,
        }
    }

    pub(crate) fn script(src: Rc<str>, source: Rc<str>) -> Self {
        Self {
            function_name: Rc::from(""),
            src,
            source,
            line: Cell::new(1),
            column: Cell::new(1),
            is_function: false,
            is_constructor: false,
        }
    }
}

/// A VM instance. Single-threaded; all state uses interior mutability.
pub struct VmInstance {
    heap: Heap,
    config: VmConfig,
    frames: RefCell<Vec<Frame>>,
    captured_stack: RefCell<Option<Vec<StackTraceData>>>,
    stack_roots: RefCell<Vec<Value>>,
    try_depth: Cell<u32>,
    precompiled: Rc<PrecompiledScripts>,
    compiler: RefCell<Rc<dyn ScriptCompiler>>,
    idle: Cell<bool>,
    next_context_id: Cell<u64>,
}

impl VmInstance {
    /// Create an instance
    pub fn new(config: VmConfig) -> Self {
        let precompiled = Rc::new(PrecompiledScripts::new());
        let compiler: Rc<dyn ScriptCompiler> = precompiled.clone();
        Self {
            heap: Heap::with_config(config.gc.clone()),
            config,
            frames: RefCell::new(Vec::new()),
            captured_stack: RefCell::new(None),
            stack_roots: RefCell::new(Vec::new()),
            try_depth: Cell::new(0),
            precompiled,
            compiler: RefCell::new(compiler),
            idle: Cell::new(false),
            next_context_id: Cell::new(1),
        }
    }

    /// The heap every object lives in
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Instance configuration
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    // ---- typed cell access ----

    fn cell<T: GcTraceable>(&self, r: GcRef, what: &str) -> Rc<T> {
        match self.heap.get::<T>(r) {
            Some(cell) => cell,
            None => panic!(
                "{what} expected at {r:?}, found {}",
                self.heap.type_name(r).unwrap_or("a reclaimed cell")
            ),
        }
    }

    /// Object at `r`. Panics if `r` is stale or not an object.
    pub fn object(&self, r: GcRef) -> Rc<JsObject> {
        self.cell(r, "object")
    }

    /// Object at `r`, if it is one
    pub fn try_object(&self, r: GcRef) -> Option<Rc<JsObject>> {
        self.heap.get::<JsObject>(r)
    }

    /// Realm at `r`
    pub fn context_data(&self, r: GcRef) -> Rc<Context> {
        self.cell(r, "context")
    }

    /// Function template at `r`
    pub fn function_template(&self, r: GcRef) -> Rc<FunctionTemplate> {
        self.cell(r, "function template")
    }

    /// Object template at `r`
    pub fn object_template(&self, r: GcRef) -> Rc<ObjectTemplate> {
        self.cell(r, "object template")
    }

    /// Script at `r`
    pub fn script(&self, r: GcRef) -> Rc<Script> {
        self.cell(r, "script")
    }

    // ---- realms and objects ----

    fn alloc_object(&self, kind: ObjectKind, prototype: Option<GcRef>) -> GcRef {
        self.heap.allocate(JsObject::new(kind, prototype))
    }

    /// Create a realm, optionally shaping its global object from a template
    pub fn create_context(&self, global_template: Option<GcRef>) -> GcRef {
        let object_prototype = self.alloc_object(ObjectKind::Ordinary, None);
        let function_prototype = self.alloc_object(ObjectKind::Ordinary, Some(object_prototype));
        let array_buffer_prototype =
            self.alloc_object(ObjectKind::Ordinary, Some(object_prototype));
        let error_base = self.alloc_object(ObjectKind::Ordinary, Some(object_prototype));
        let error_prototypes = ErrorKind::ALL.map(|kind| {
            let proto = if kind == ErrorKind::Error {
                error_base
            } else {
                self.alloc_object(ObjectKind::Ordinary, Some(error_base))
            };
            let obj = self.object(proto);
            obj.set_own("name", Value::from(kind.name()));
            obj.set_own("message", Value::from(""));
            proto
        });
        let global = self.alloc_object(ObjectKind::Ordinary, Some(object_prototype));

        let id = self.next_context_id.get();
        self.next_context_id.set(id + 1);
        let context = self.heap.allocate(Context::new(
            id,
            global,
            object_prototype,
            function_prototype,
            array_buffer_prototype,
            error_prototypes,
        ));

        let global = match global_template {
            Some(template) => {
                let shaped = self.instantiate_object_template(context, template);
                self.context_data(context).set_global(shaped);
                shaped
            }
            None => global,
        };
        self.object(global)
            .set_own("globalThis", Value::Object(global));
        tracing::debug!(target: "shim_vm", id, ?context, "context created");
        context
    }

    /// Ordinary object inheriting from the realm's `Object.prototype`
    pub fn new_object(&self, context: GcRef) -> GcRef {
        let proto = self.context_data(context).object_prototype();
        self.alloc_object(ObjectKind::Ordinary, Some(proto))
    }

    /// Plain native function
    pub fn new_function(
        &self,
        context: GcRef,
        name: &str,
        length: u32,
        native: impl Fn(&mut ExecutionState<'_>, &CallInfo) -> Result<Value, Value> + 'static,
        is_constructor: bool,
    ) -> GcRef {
        let native: NativeFunction = Rc::new(native);
        let realm = self.context_data(context);
        let kind = FunctionKind {
            name: Rc::from(name),
            length,
            native,
            is_constructor,
        };
        let function =
            self.alloc_object(ObjectKind::Function(kind), Some(realm.function_prototype()));
        let obj = self.object(function);
        obj.set_own("name", Value::from(name));
        obj.set_own("length", Value::from(length));
        if is_constructor {
            let proto = self.alloc_object(ObjectKind::Ordinary, Some(realm.object_prototype()));
            self.object(proto)
                .set_own("constructor", Value::Object(function));
            obj.set_own("prototype", Value::Object(proto));
        }
        function
    }

    /// Native error instance with `message` and `stack`
    pub fn new_error(&self, context: GcRef, kind: ErrorKind, message: &str) -> GcRef {
        let proto = self.context_data(context).error_prototype(kind);
        let error = self.alloc_object(ObjectKind::Error(kind), Some(proto));
        let obj = self.object(error);
        obj.set_own("message", Value::from(message));

        let mut stack = if message.is_empty() {
            kind.name().to_string()
        } else {
            format!("{}: {message}", kind.name())
        };
        for frame in self.capture_stack_trace() {
            let name = if frame.function_name.is_empty() {
                "<anonymous>"
            } else {
                &frame.function_name
            };
            stack.push_str(&format!(
                "\n    at {name} ({}:{}:{})",
                frame.src, frame.line, frame.column
            ));
        }
        obj.set_own("stack", Value::from(stack));
        error
    }

    /// Materialize a [`VmError`] as an error object
    pub fn error_from(&self, context: GcRef, err: &VmError) -> GcRef {
        self.new_error(context, err.kind(), err.message())
    }

    /// Detached ArrayBuffer
    pub fn new_array_buffer(&self, context: GcRef) -> GcRef {
        let proto = self.context_data(context).array_buffer_prototype();
        self.alloc_object(
            ObjectKind::ArrayBuffer(ArrayBufferObject::new()),
            Some(proto),
        )
    }

    /// Property lookup along the prototype chain without interceptors
    pub fn lookup(&self, object: GcRef, key: &str) -> Option<Value> {
        let mut current = Some(object);
        while let Some(r) = current {
            let obj = self.try_object(r)?;
            if let Some(value) = obj.get_own(key) {
                return Some(value);
            }
            current = obj.prototype();
        }
        None
    }

    /// `String(value)` without running user code
    pub fn display_string(&self, value: &Value) -> String {
        match value {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Object(r) => {
                let Some(obj) = self.try_object(*r) else {
                    return "[object Object]".to_string();
                };
                if let Some(function) = obj.as_function() {
                    return format!("function {}() {{ [native code] }}", function.name);
                }
                let is_error = obj.error_kind().is_some();
                let name = self.lookup(*r, "name").and_then(|v| v.as_str().map(str::to_string));
                let message = self
                    .lookup(*r, "message")
                    .and_then(|v| v.as_str().map(str::to_string));
                match (is_error, name, message) {
                    (true, Some(name), Some(message)) if !message.is_empty() => {
                        format!("{name}: {message}")
                    }
                    (true, Some(name), _) => name,
                    _ => "[object Object]".to_string(),
                }
            }
        }
    }

    // ---- templates ----

    /// New function template with fresh instance and prototype templates
    pub fn new_function_template(
        &self,
        name: &str,
        length: u32,
        native: impl Fn(&mut ExecutionState<'_>, &CallInfo) -> Result<Value, Value> + 'static,
    ) -> GcRef {
        let instance_template = self.heap.allocate(ObjectTemplate::new(None));
        let prototype_template = self.heap.allocate(ObjectTemplate::new(None));
        let ftpl = self.heap.allocate(FunctionTemplate::new(
            Rc::from(name),
            length,
            Rc::new(native),
            instance_template,
            prototype_template,
        ));
        self.object_template(instance_template)
            .set_constructor(Some(ftpl));
        ftpl
    }

    /// New object template, optionally describing instances of `constructor`
    pub fn new_object_template(&self, constructor: Option<GcRef>) -> GcRef {
        self.heap.allocate(ObjectTemplate::new(constructor))
    }

    /// The function for `ftpl` in `context`, created on first request.
    ///
    /// The template's extra data is copied onto the new function.
    pub fn instantiate_function_template(&self, context: GcRef, ftpl: GcRef) -> GcRef {
        let realm = self.context_data(context);
        let template = self.function_template(ftpl);
        if let Some(existing) = template.cached_instance(realm.id()) {
            if self.heap.is_alive(existing) {
                return existing;
            }
        }

        let name = template.name();
        let kind = FunctionKind {
            name: name.clone(),
            length: template.length(),
            native: template.native(),
            is_constructor: template.is_constructor(),
        };
        let function =
            self.alloc_object(ObjectKind::Function(kind), Some(realm.function_prototype()));
        let obj = self.object(function);
        obj.set_template(Some(ftpl));
        obj.set_extra(template.extra());
        obj.set_own("name", Value::String(name));
        obj.set_own("length", Value::from(template.length()));
        template.cache_instance(realm.id(), function);

        if template.is_constructor() {
            let parent_proto = template
                .parent()
                .map(|parent| self.instantiate_function_template(context, parent))
                .and_then(|parent_fn| self.object(parent_fn).get_own("prototype"))
                .and_then(|v| v.as_object())
                .unwrap_or(realm.object_prototype());
            let proto =
                self.instantiate_with_prototype(context, template.prototype_template(), parent_proto);
            self.object(proto)
                .set_own("constructor", Value::Object(function));
            obj.set_own("prototype", Value::Object(proto));
        }

        self.apply_template_properties(context, &obj, template.properties());
        function
    }

    /// A fresh object shaped by `otpl`.
    ///
    /// Its prototype is the `prototype` of the template's constructor
    /// function in `context`, or `Object.prototype` when there is none.
    pub fn instantiate_object_template(&self, context: GcRef, otpl: GcRef) -> GcRef {
        let template = self.object_template(otpl);
        let proto = template
            .constructor()
            .map(|ftpl| self.instantiate_function_template(context, ftpl))
            .and_then(|function| self.object(function).get_own("prototype"))
            .and_then(|v| v.as_object())
            .unwrap_or_else(|| self.context_data(context).object_prototype());
        self.instantiate_with_prototype(context, otpl, proto)
    }

    fn instantiate_with_prototype(&self, context: GcRef, otpl: GcRef, proto: GcRef) -> GcRef {
        let template = self.object_template(otpl);
        let object = self.alloc_object(ObjectKind::Ordinary, Some(proto));
        let obj = self.object(object);
        obj.set_template(Some(otpl));
        obj.set_extra(template.extra());
        obj.set_interceptor(template.interceptor());
        template.mark_instantiated();
        self.apply_template_properties(context, &obj, template.properties());
        object
    }

    fn apply_template_properties(
        &self,
        context: GcRef,
        obj: &JsObject,
        properties: Vec<(Rc<str>, TemplateValue)>,
    ) {
        for (name, value) in properties {
            let value = match value {
                TemplateValue::Value(v) => v,
                TemplateValue::FunctionTemplate(f) => {
                    Value::Object(self.instantiate_function_template(context, f))
                }
                TemplateValue::ObjectTemplate(o) => {
                    Value::Object(self.instantiate_object_template(context, o))
                }
            };
            obj.set_own(name, value);
        }
    }

    // ---- scripts ----

    /// Registry used by the default compiler
    pub fn precompiled(&self) -> &Rc<PrecompiledScripts> {
        &self.precompiled
    }

    /// Replace the compiler
    pub fn set_compiler(&self, compiler: Rc<dyn ScriptCompiler>) {
        *self.compiler.borrow_mut() = compiler;
    }

    /// Compile `source` into a script cell
    pub fn compile(&self, src_name: &str, source: &str) -> Result<GcRef, VmError> {
        let compiler = self.compiler.borrow().clone();
        let body = compiler.compile(src_name, source)?;
        Ok(self
            .heap
            .allocate(Script::new(Rc::from(src_name), Rc::from(source), body)))
    }

    // ---- collection ----

    /// Collect everything unreachable from `roots` and the active call
    /// arguments
    pub fn collect_garbage(&self, roots: &[GcRef]) -> CollectStats {
        let mut all = roots.to_vec();
        all.extend(self.stack_roots.borrow().iter().filter_map(Value::as_object));
        let stats = self.heap.collect(&all);
        tracing::trace!(
            target: "shim_vm",
            roots = all.len(),
            reclaimed = stats.reclaimed,
            live = stats.live,
            "collect_garbage"
        );
        stats
    }

    /// Drop caches before an idle-time collection
    pub fn enter_idle_mode(&self) {
        self.idle.set(true);
        self.captured_stack.borrow_mut().take();
    }

    /// Leave idle mode; any execution does this implicitly
    pub fn exit_idle_mode(&self) {
        self.idle.set(false);
    }

    /// Whether the instance is idle
    pub fn is_idle(&self) -> bool {
        self.idle.get()
    }

    // ---- frames ----

    pub(crate) fn push_frame(&self, frame: Frame) {
        self.frames.borrow_mut().push(frame);
    }

    pub(crate) fn pop_frame(&self) {
        self.frames.borrow_mut().pop();
    }

    /// Active call depth
    pub fn frame_depth(&self) -> usize {
        self.frames.borrow().len()
    }

    pub(crate) fn set_location(&self, line: i32, column: i32) {
        if let Some(top) = self.frames.borrow().last() {
            top.line.set(line);
            top.column.set(column);
        }
    }

    /// Frames of the current stack, innermost first, without positionless
    /// (native) frames, bounded by `stack_trace_limit`
    pub fn capture_stack_trace(&self) -> Vec<StackTraceData> {
        self.frames
            .borrow()
            .iter()
            .rev()
            .filter(|f| f.line.get() > 0 && f.column.get() > 0)
            .take(self.config.stack_trace_limit)
            .map(|f| StackTraceData {
                src: f.src.clone(),
                source_code: f.source.clone(),
                function_name: f.function_name.clone(),
                line: f.line.get(),
                column: f.column.get(),
                is_function: f.is_function,
                is_constructor: f.is_constructor,
            })
            .collect()
    }

    pub(crate) fn capture_if_unset(&self) {
        let mut captured = self.captured_stack.borrow_mut();
        if captured.is_none() {
            *captured = Some(self.capture_stack_trace());
        }
    }

    pub(crate) fn take_captured_stack(&self) -> Option<Vec<StackTraceData>> {
        self.captured_stack.borrow_mut().take()
    }

    pub(crate) fn clear_captured_stack(&self) {
        self.captured_stack.borrow_mut().take();
    }

    pub(crate) fn push_roots(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let mut roots = self.stack_roots.borrow_mut();
        let mark = roots.len();
        roots.extend(values);
        mark
    }

    pub(crate) fn truncate_roots(&self, mark: usize) {
        self.stack_roots.borrow_mut().truncate(mark);
    }

    // ---- try regions ----

    pub(crate) fn enter_try(&self) {
        self.try_depth.set(self.try_depth.get() + 1);
    }

    pub(crate) fn exit_try(&self) {
        self.try_depth.set(self.try_depth.get().saturating_sub(1));
    }

    /// Whether a thrown value would be caught by an engine try region
    pub fn is_on_try(&self) -> bool {
        self.try_depth.get() > 0
    }
}

impl Default for VmInstance {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl std::fmt::Debug for VmInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmInstance")
            .field("heap", &self.heap)
            .field("frames", &self.frames.borrow().len())
            .field("idle", &self.idle.get())
            .finish()
    }
}
