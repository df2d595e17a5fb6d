//! Extra data stored in the single extra slot of engine objects and
//! templates.
//!
//! Templates carry template-level data. The first time an object made from
//! a template is handed to the embedder, that data is replaced by
//! per-instance data; [`InstanceState`] classifies which side of that
//! transition an object is on.

use crate::backing_store::BackingStoreWrapHolder;
use crate::template::{
    FunctionCallback, IndexedPropertyHandlerConfiguration, NamedPropertyHandlerConfiguration,
};
use shim_gc::{GcRef, GcTraceable};
use shim_vm::{ExtraSlot, StackTraceData, Value as JsValue, VmInstance};
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::rc::Rc;

/// One internal field slot
#[derive(Debug, Clone, PartialEq)]
pub enum InternalField {
    /// Never written
    Empty,
    /// Engine value
    Value(JsValue),
    /// Embedder pointer
    Aligned(*mut c_void),
}

/// Internal field storage shared by templates and instances
#[derive(Debug, Default)]
pub struct InternalFieldData {
    fields: RefCell<Vec<InternalField>>,
}

impl InternalFieldData {
    /// Storage with `count` empty slots
    pub fn with_count(count: usize) -> Self {
        Self {
            fields: RefCell::new(vec![InternalField::Empty; count]),
        }
    }

    /// Resize to `count` empty slots; a count of zero or less is rejected
    pub fn set_internal_field_count(&self, count: i32) {
        if count <= 0 {
            tracing::error!(target: "shim::extra_data", count, "invalid internal field count");
            return;
        }
        *self.fields.borrow_mut() = vec![InternalField::Empty; count as usize];
    }

    /// Number of slots
    pub fn internal_field_count(&self) -> usize {
        self.fields.borrow().len()
    }

    fn checked_index(&self, index: i32) -> Option<usize> {
        let count = self.internal_field_count();
        match usize::try_from(index) {
            Ok(i) if i < count => Some(i),
            _ => {
                tracing::error!(
                    target: "shim::extra_data",
                    index,
                    count,
                    "internal field index out of bounds"
                );
                None
            }
        }
    }

    /// Store a value; out of range is logged and ignored
    pub fn set_internal_field(&self, index: i32, value: JsValue) {
        if let Some(i) = self.checked_index(index) {
            self.fields.borrow_mut()[i] = InternalField::Value(value);
        }
    }

    /// Read a value slot; `None` when empty, out of range, or holding a
    /// pointer
    pub fn internal_field(&self, index: i32) -> Option<JsValue> {
        let i = self.checked_index(index)?;
        match &self.fields.borrow()[i] {
            InternalField::Value(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Store an embedder pointer; out of range is logged and ignored
    pub fn set_aligned_pointer(&self, index: i32, pointer: *mut c_void) {
        if let Some(i) = self.checked_index(index) {
            self.fields.borrow_mut()[i] = InternalField::Aligned(pointer);
        }
    }

    /// Read an embedder pointer; null when unset or out of range
    pub fn aligned_pointer(&self, index: i32) -> *mut c_void {
        let Some(i) = self.checked_index(index) else {
            return std::ptr::null_mut();
        };
        match self.fields.borrow()[i] {
            InternalField::Aligned(p) => p,
            _ => std::ptr::null_mut(),
        }
    }

    /// Raw slot
    pub fn field(&self, index: usize) -> Option<InternalField> {
        self.fields.borrow().get(index).cloned()
    }
}

impl Clone for InternalFieldData {
    fn clone(&self) -> Self {
        Self {
            fields: RefCell::new(self.fields.borrow().clone()),
        }
    }
}

impl GcTraceable for InternalFieldData {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        for field in self.fields.borrow().iter() {
            if let InternalField::Value(v) = field {
                v.trace(tracer);
            }
        }
    }
}

/// Data of a function template
#[derive(Debug)]
pub struct FunctionTemplateData {
    ftpl: GcRef,
    callback: Cell<Option<FunctionCallback>>,
    callback_data: RefCell<Option<JsValue>>,
    signature: Cell<Option<GcRef>>,
    length: Cell<i32>,
}

impl FunctionTemplateData {
    /// Data for the engine template `ftpl`
    pub fn new(
        ftpl: GcRef,
        callback: Option<FunctionCallback>,
        callback_data: Option<JsValue>,
        signature: Option<GcRef>,
        length: i32,
    ) -> Self {
        Self {
            ftpl,
            callback: Cell::new(callback),
            callback_data: RefCell::new(callback_data),
            signature: Cell::new(signature),
            length: Cell::new(length),
        }
    }

    /// Engine function template
    pub fn ftpl(&self) -> GcRef {
        self.ftpl
    }

    /// Host callback
    pub fn callback(&self) -> Option<FunctionCallback> {
        self.callback.get()
    }

    /// Replace the host callback
    pub fn set_callback(&self, callback: Option<FunctionCallback>, data: Option<JsValue>) {
        self.callback.set(callback);
        *self.callback_data.borrow_mut() = data;
    }

    /// Value passed as `info.data()`
    pub fn callback_data(&self) -> Option<JsValue> {
        self.callback_data.borrow().clone()
    }

    /// Engine template receivers must descend from
    pub fn signature(&self) -> Option<GcRef> {
        self.signature.get()
    }

    /// Declared `length`
    pub fn length(&self) -> i32 {
        self.length.get()
    }
}

impl GcTraceable for FunctionTemplateData {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        tracer(self.ftpl);
        if let Some(sig) = self.signature.get() {
            tracer(sig);
        }
        if let Some(data) = self.callback_data.borrow().as_ref() {
            data.trace(tracer);
        }
    }
}

/// Data of an object template
#[derive(Debug)]
pub struct ObjectTemplateData {
    fields: InternalFieldData,
    otpl: GcRef,
    constructor: Option<GcRef>,
    class_name: RefCell<Option<Rc<str>>>,
    named_handler: RefCell<Option<NamedPropertyHandlerConfiguration>>,
    indexed_handler: RefCell<Option<IndexedPropertyHandlerConfiguration>>,
}

impl ObjectTemplateData {
    /// Data for the engine template `otpl`
    pub fn new(otpl: GcRef, constructor: Option<GcRef>) -> Self {
        Self {
            fields: InternalFieldData::default(),
            otpl,
            constructor,
            class_name: RefCell::new(None),
            named_handler: RefCell::new(None),
            indexed_handler: RefCell::new(None),
        }
    }

    /// Slot layout copied into every instance
    pub fn fields(&self) -> &InternalFieldData {
        &self.fields
    }

    /// Engine object template
    pub fn otpl(&self) -> GcRef {
        self.otpl
    }

    /// Engine function template whose instances this describes
    pub fn constructor(&self) -> Option<GcRef> {
        self.constructor
    }

    /// Class name reported for instances
    pub fn class_name(&self) -> Option<Rc<str>> {
        self.class_name.borrow().clone()
    }

    /// Set the class name
    pub fn set_class_name(&self, name: Rc<str>) {
        *self.class_name.borrow_mut() = Some(name);
    }

    /// Named interceptor configuration
    pub fn named_handler(&self) -> Option<NamedPropertyHandlerConfiguration> {
        self.named_handler.borrow().clone()
    }

    /// Install the named interceptor configuration
    pub fn set_named_handler(&self, config: NamedPropertyHandlerConfiguration) {
        *self.named_handler.borrow_mut() = Some(config);
    }

    /// Indexed interceptor configuration
    pub fn indexed_handler(&self) -> Option<IndexedPropertyHandlerConfiguration> {
        self.indexed_handler.borrow().clone()
    }

    /// Install the indexed interceptor configuration
    pub fn set_indexed_handler(&self, config: IndexedPropertyHandlerConfiguration) {
        *self.indexed_handler.borrow_mut() = Some(config);
    }
}

impl GcTraceable for ObjectTemplateData {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        self.fields.trace(tracer);
        tracer(self.otpl);
        if let Some(ctor) = self.constructor {
            tracer(ctor);
        }
        if let Some(named) = self.named_handler.borrow().as_ref() {
            named.data.trace(tracer);
        }
        if let Some(indexed) = self.indexed_handler.borrow().as_ref() {
            indexed.data.trace(tracer);
        }
    }
}

/// Per-instance data
#[derive(Debug, Clone)]
pub struct ObjectData {
    fields: InternalFieldData,
    function_template: Option<GcRef>,
    object_template: Option<GcRef>,
}

impl ObjectData {
    /// Instance data with no fields
    pub fn new(function_template: Option<GcRef>) -> Self {
        Self {
            fields: InternalFieldData::default(),
            function_template,
            object_template: None,
        }
    }

    /// Instance data laid out by `template`
    pub fn from_template(template: &ObjectTemplateData) -> Self {
        Self {
            fields: template.fields.clone(),
            function_template: template.constructor,
            object_template: Some(template.otpl),
        }
    }

    /// Internal fields
    pub fn fields(&self) -> &InternalFieldData {
        &self.fields
    }

    /// Engine function template the instance was created for
    pub fn function_template(&self) -> Option<GcRef> {
        self.function_template
    }

    /// Engine object template the instance was created from
    pub fn object_template(&self) -> Option<GcRef> {
        self.object_template
    }
}

impl GcTraceable for ObjectData {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        self.fields.trace(tracer);
        if let Some(f) = self.function_template {
            tracer(f);
        }
        if let Some(o) = self.object_template {
            tracer(o);
        }
    }
}

/// Per-function data: instance data plus the template data the callback
/// dispatch needs
#[derive(Debug)]
pub struct FunctionData {
    object: ObjectData,
    template_data: Rc<ExtraData>,
}

impl FunctionData {
    /// The function's instance data
    pub fn object(&self) -> &ObjectData {
        &self.object
    }

    /// The originating [`ExtraData::FunctionTemplate`]
    pub fn template_data(&self) -> &Rc<ExtraData> {
        &self.template_data
    }
}

/// ArrayBuffer instance data
#[derive(Debug)]
pub struct ArrayBufferObjectData {
    object: ObjectData,
    backing_store: Rc<BackingStoreWrapHolder>,
}

impl ArrayBufferObjectData {
    /// Instance data keeping `backing_store` alive
    pub fn new(backing_store: Rc<BackingStoreWrapHolder>) -> Self {
        Self {
            object: ObjectData::new(None),
            backing_store,
        }
    }

    /// The counted holder
    pub fn backing_store(&self) -> &Rc<BackingStoreWrapHolder> {
        &self.backing_store
    }
}

/// Stack frames captured when an object was first thrown
#[derive(Debug, Clone)]
pub struct ExceptionObjectData {
    frames: Rc<[StackTraceData]>,
}

impl ExceptionObjectData {
    /// Data owning `frames`
    pub fn new(frames: Vec<StackTraceData>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// Captured frames, innermost first
    pub fn frames(&self) -> &[StackTraceData] {
        &self.frames
    }

    pub(crate) fn shared_frames(&self) -> Rc<[StackTraceData]> {
        self.frames.clone()
    }
}

/// Everything the shim stores in an engine extra slot
#[derive(Debug)]
pub enum ExtraData {
    /// On an engine function template, copied to its functions
    FunctionTemplate(FunctionTemplateData),
    /// On an engine object template, copied to its instances
    ObjectTemplate(ObjectTemplateData),
    /// On an instance
    Object(ObjectData),
    /// On a function instantiated from a template
    Function(FunctionData),
    /// On an ArrayBuffer
    ArrayBuffer(ArrayBufferObjectData),
    /// On a thrown object
    Exception(ExceptionObjectData),
}

impl ExtraData {
    /// Function template data, if that is what this is
    pub fn as_function_template_data(&self) -> Option<&FunctionTemplateData> {
        match self {
            ExtraData::FunctionTemplate(d) => Some(d),
            _ => None,
        }
    }

    /// Object template data, if that is what this is
    pub fn as_object_template_data(&self) -> Option<&ObjectTemplateData> {
        match self {
            ExtraData::ObjectTemplate(d) => Some(d),
            _ => None,
        }
    }

    /// Instance data of any instance kind
    pub fn object_data(&self) -> Option<&ObjectData> {
        match self {
            ExtraData::Object(d) => Some(d),
            ExtraData::Function(d) => Some(&d.object),
            ExtraData::ArrayBuffer(d) => Some(&d.object),
            _ => None,
        }
    }

    /// Exception frames, if that is what this is
    pub fn as_exception_data(&self) -> Option<&ExceptionObjectData> {
        match self {
            ExtraData::Exception(d) => Some(d),
            _ => None,
        }
    }

    /// Whether this is per-instance data
    pub fn is_instance_data(&self) -> bool {
        self.object_data().is_some()
    }
}

impl GcTraceable for ExtraData {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        match self {
            ExtraData::FunctionTemplate(d) => d.trace(tracer),
            ExtraData::ObjectTemplate(d) => d.trace(tracer),
            ExtraData::Object(d) => d.trace(tracer),
            ExtraData::Function(d) => {
                d.object.trace(tracer);
                d.template_data.trace(tracer);
            }
            ExtraData::ArrayBuffer(d) => d.object.trace(tracer),
            ExtraData::Exception(_) => {}
        }
    }
}

fn downcast(slot: Option<Rc<dyn ExtraSlot>>) -> Option<Rc<ExtraData>> {
    slot?.into_any().downcast::<ExtraData>().ok()
}

/// Shim data in the extra slot of engine object `object`
pub fn get_extra_data(vm: &VmInstance, object: GcRef) -> Option<Rc<ExtraData>> {
    downcast(vm.try_object(object)?.extra())
}

/// Replace the extra slot of engine object `object`
pub fn set_extra_data(vm: &VmInstance, object: GcRef, data: Rc<ExtraData>) {
    vm.object(object).set_extra(Some(data as Rc<dyn ExtraSlot>));
}

/// Shim data of an engine function template
pub fn function_template_data(vm: &VmInstance, ftpl: GcRef) -> Option<Rc<ExtraData>> {
    downcast(vm.function_template(ftpl).extra())
}

/// Shim data of an engine object template
pub fn object_template_data(vm: &VmInstance, otpl: GcRef) -> Option<Rc<ExtraData>> {
    downcast(vm.object_template(otpl).extra())
}

/// Where a not-yet-specialized object came from
#[derive(Debug)]
pub enum TemplateSource {
    /// Carries object template data
    ObjectTemplate(Rc<ExtraData>),
    /// Carries function template data
    FunctionTemplate(Rc<ExtraData>),
    /// Carries nothing
    Bare,
}

/// Which side of the template-to-instance transition an object is on
#[derive(Debug)]
pub enum InstanceState {
    /// Still carries template-level data (or none)
    Uninstantiated(TemplateSource),
    /// Carries per-instance data
    Instantiated(Rc<ExtraData>),
}

impl InstanceState {
    /// Classify an extra slot. Exception data on an object being
    /// instantiated is a broken invariant and aborts.
    pub fn classify(extra: Option<Rc<ExtraData>>) -> Self {
        let Some(extra) = extra else {
            return InstanceState::Uninstantiated(TemplateSource::Bare);
        };
        match &*extra {
            ExtraData::ObjectTemplate(_) => {
                InstanceState::Uninstantiated(TemplateSource::ObjectTemplate(extra))
            }
            ExtraData::FunctionTemplate(_) => {
                InstanceState::Uninstantiated(TemplateSource::FunctionTemplate(extra))
            }
            ExtraData::Object(_) | ExtraData::Function(_) | ExtraData::ArrayBuffer(_) => {
                InstanceState::Instantiated(extra)
            }
            ExtraData::Exception(_) => {
                fatal!("exception data found on an object being instantiated")
            }
        }
    }
}

/// Give `object` per-instance data, replacing any template-level data.
///
/// Idempotent: an object that already carries instance data keeps it and
/// the same `Rc` is returned. `ftpl` links objects with no template data to
/// the function template that created them; a function's own data never
/// links back to its template, so it is not an instance of it.
pub fn materialize(vm: &VmInstance, object: GcRef, ftpl: Option<GcRef>) -> Rc<ExtraData> {
    let data = match InstanceState::classify(get_extra_data(vm, object)) {
        InstanceState::Instantiated(data) => return data,
        InstanceState::Uninstantiated(TemplateSource::ObjectTemplate(template)) => {
            let Some(otd) = template.as_object_template_data() else {
                shim_unreachable!()
            };
            ExtraData::Object(ObjectData::from_template(otd))
        }
        InstanceState::Uninstantiated(TemplateSource::FunctionTemplate(template)) => {
            ExtraData::Function(FunctionData {
                object: ObjectData::new(None),
                template_data: template,
            })
        }
        InstanceState::Uninstantiated(TemplateSource::Bare) => {
            ExtraData::Object(ObjectData::new(ftpl))
        }
    };
    let data = Rc::new(data);
    set_extra_data(vm, object, data.clone());
    data
}
