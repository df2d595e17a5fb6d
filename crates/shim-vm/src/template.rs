//! Function and object templates.
//!
//! A template is a blueprint shared by every object instantiated from it.
//! Templates carry their own extra slot; instantiation copies the template's
//! extra data onto the fresh object so the embedder can tell an object that
//! has never been specialized from one that has.

use crate::function::NativeFunction;
use crate::object::{ExtraSlot, PropertyInterceptor};
use crate::value::Value;
use rustc_hash::FxHashMap;
use shim_gc::{GcRef, GcTraceable};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Property value stored on a template
#[derive(Debug, Clone)]
pub enum TemplateValue {
    /// Copied as is
    Value(Value),
    /// Instantiated into a function per realm
    FunctionTemplate(GcRef),
    /// Instantiated into a fresh object per instance
    ObjectTemplate(GcRef),
}

impl GcTraceable for TemplateValue {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        match self {
            TemplateValue::Value(v) => v.trace(tracer),
            TemplateValue::FunctionTemplate(r) | TemplateValue::ObjectTemplate(r) => tracer(*r),
        }
    }
}

type TemplateProperties = RefCell<Vec<(Rc<str>, TemplateValue)>>;

fn trace_properties(properties: &TemplateProperties, tracer: &mut dyn FnMut(GcRef)) {
    for (_, value) in properties.borrow().iter() {
        value.trace(tracer);
    }
}

fn set_property(properties: &TemplateProperties, name: Rc<str>, value: TemplateValue) {
    let mut properties = properties.borrow_mut();
    match properties.iter_mut().find(|(key, _)| *key == name) {
        Some(slot) => slot.1 = value,
        None => properties.push((name, value)),
    }
}

/// Blueprint for a function, its instances and its prototype object
pub struct FunctionTemplate {
    name: RefCell<Rc<str>>,
    length: Cell<u32>,
    native: NativeFunction,
    is_constructor: Cell<bool>,
    parent: Cell<Option<GcRef>>,
    instance_template: GcRef,
    prototype_template: GcRef,
    properties: TemplateProperties,
    instances: RefCell<FxHashMap<u64, GcRef>>,
    extra: RefCell<Option<Rc<dyn ExtraSlot>>>,
}

impl FunctionTemplate {
    pub(crate) fn new(
        name: Rc<str>,
        length: u32,
        native: NativeFunction,
        instance_template: GcRef,
        prototype_template: GcRef,
    ) -> Self {
        Self {
            name: RefCell::new(name),
            length: Cell::new(length),
            native,
            is_constructor: Cell::new(true),
            parent: Cell::new(None),
            instance_template,
            prototype_template,
            properties: RefCell::new(Vec::new()),
            instances: RefCell::new(FxHashMap::default()),
            extra: RefCell::new(None),
        }
    }

    /// Function `name`
    pub fn name(&self) -> Rc<str> {
        self.name.borrow().clone()
    }

    /// Rename (`SetClassName`)
    pub fn set_name(&self, name: impl Into<Rc<str>>) {
        *self.name.borrow_mut() = name.into();
    }

    /// Function `length`
    pub fn length(&self) -> u32 {
        self.length.get()
    }

    /// Set `length`
    pub fn set_length(&self, length: u32) {
        self.length.set(length);
    }

    /// Body shared by every instantiated function
    pub fn native(&self) -> NativeFunction {
        self.native.clone()
    }

    /// Whether instantiated functions accept `new`
    pub fn is_constructor(&self) -> bool {
        self.is_constructor.get()
    }

    /// Allow or forbid `new`
    pub fn set_constructor(&self, is_constructor: bool) {
        self.is_constructor.set(is_constructor);
    }

    /// Template whose prototype object this template's prototype inherits
    pub fn parent(&self) -> Option<GcRef> {
        self.parent.get()
    }

    /// Link to a parent template
    pub fn set_parent(&self, parent: Option<GcRef>) {
        self.parent.set(parent);
    }

    /// Template for objects created by `new`
    pub fn instance_template(&self) -> GcRef {
        self.instance_template
    }

    /// Template for the `prototype` object
    pub fn prototype_template(&self) -> GcRef {
        self.prototype_template
    }

    /// Add or replace a property installed on each instantiated function
    pub fn set(&self, name: impl Into<Rc<str>>, value: TemplateValue) {
        set_property(&self.properties, name.into(), value);
    }

    /// Snapshot of template properties
    pub fn properties(&self) -> Vec<(Rc<str>, TemplateValue)> {
        self.properties.borrow().clone()
    }

    /// Function already instantiated for the realm with id `context_id`
    pub fn cached_instance(&self, context_id: u64) -> Option<GcRef> {
        self.instances.borrow().get(&context_id).copied()
    }

    pub(crate) fn cache_instance(&self, context_id: u64, function: GcRef) {
        self.instances.borrow_mut().insert(context_id, function);
    }

    /// Template-level extra data
    pub fn extra(&self) -> Option<Rc<dyn ExtraSlot>> {
        self.extra.borrow().clone()
    }

    /// Replace template-level extra data
    pub fn set_extra(&self, extra: Option<Rc<dyn ExtraSlot>>) {
        *self.extra.borrow_mut() = extra;
    }
}

impl GcTraceable for FunctionTemplate {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        if let Some(parent) = self.parent.get() {
            tracer(parent);
        }
        tracer(self.instance_template);
        tracer(self.prototype_template);
        trace_properties(&self.properties, tracer);
        for function in self.instances.borrow().values() {
            tracer(*function);
        }
        if let Some(extra) = self.extra.borrow().as_ref() {
            extra.trace(tracer);
        }
    }
}

/// Blueprint for plain objects
pub struct ObjectTemplate {
    constructor: Cell<Option<GcRef>>,
    properties: TemplateProperties,
    interceptor: RefCell<Option<Rc<dyn PropertyInterceptor>>>,
    instantiated: Cell<bool>,
    extra: RefCell<Option<Rc<dyn ExtraSlot>>>,
}

impl ObjectTemplate {
    pub(crate) fn new(constructor: Option<GcRef>) -> Self {
        Self {
            constructor: Cell::new(constructor),
            properties: RefCell::new(Vec::new()),
            interceptor: RefCell::new(None),
            instantiated: Cell::new(false),
            extra: RefCell::new(None),
        }
    }

    /// Function template whose instances this template describes
    pub fn constructor(&self) -> Option<GcRef> {
        self.constructor.get()
    }

    pub(crate) fn set_constructor(&self, constructor: Option<GcRef>) {
        self.constructor.set(constructor);
    }

    /// Add or replace a property installed on each instance
    pub fn set(&self, name: impl Into<Rc<str>>, value: TemplateValue) {
        set_property(&self.properties, name.into(), value);
    }

    /// Snapshot of template properties
    pub fn properties(&self) -> Vec<(Rc<str>, TemplateValue)> {
        self.properties.borrow().clone()
    }

    /// Interceptor copied onto every instance
    pub fn interceptor(&self) -> Option<Rc<dyn PropertyInterceptor>> {
        self.interceptor.borrow().clone()
    }

    /// Install the interceptor for future instances
    pub fn set_interceptor(&self, interceptor: Option<Rc<dyn PropertyInterceptor>>) {
        *self.interceptor.borrow_mut() = interceptor;
    }

    /// Whether any instance has been created
    pub fn is_instantiated(&self) -> bool {
        self.instantiated.get()
    }

    pub(crate) fn mark_instantiated(&self) {
        self.instantiated.set(true);
    }

    /// Template-level extra data
    pub fn extra(&self) -> Option<Rc<dyn ExtraSlot>> {
        self.extra.borrow().clone()
    }

    /// Replace template-level extra data
    pub fn set_extra(&self, extra: Option<Rc<dyn ExtraSlot>>) {
        *self.extra.borrow_mut() = extra;
    }
}

impl GcTraceable for ObjectTemplate {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        if let Some(constructor) = self.constructor.get() {
            tracer(constructor);
        }
        trace_properties(&self.properties, tracer);
        if let Some(extra) = self.extra.borrow().as_ref() {
            extra.trace(tracer);
        }
    }
}
