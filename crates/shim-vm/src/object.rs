//! Object cells

use crate::array_buffer::ArrayBufferObject;
use crate::error::ErrorKind;
use crate::execution::ExecutionState;
use crate::function::FunctionKind;
use crate::value::Value;
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use shim_gc::{GcRef, GcTraceable};
use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

/// Own properties in insertion order
pub type PropertyMap = IndexMap<Rc<str>, Value, FxBuildHasher>;

/// Embedder-owned data stored in an object's extra slot.
///
/// The VM only traces it and hands it back; the embedder downcasts through
/// [`ExtraSlot::into_any`].
pub trait ExtraSlot: GcTraceable {
    /// Erase to `Any` for downcasting
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: GcTraceable> ExtraSlot for T {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Embedder hook consulted before ordinary property lookup on an object.
///
/// Returning `None` means "not intercepted", and the ordinary lookup runs.
pub trait PropertyInterceptor {
    /// Intercept `[[Get]]`
    fn get(
        &self,
        state: &mut ExecutionState<'_>,
        receiver: GcRef,
        key: &str,
    ) -> Option<Result<Value, Value>>;

    /// Intercept `[[Set]]`
    fn set(
        &self,
        state: &mut ExecutionState<'_>,
        receiver: GcRef,
        key: &str,
        value: &Value,
    ) -> Option<Result<(), Value>>;
}

/// What kind of exotic behaviour an object carries
pub enum ObjectKind {
    /// Plain object
    Ordinary,
    /// Callable
    Function(FunctionKind),
    /// Instance of a native error constructor
    Error(ErrorKind),
    /// `ArrayBuffer`
    ArrayBuffer(ArrayBufferObject),
}

/// A heap object
pub struct JsObject {
    kind: ObjectKind,
    prototype: Cell<Option<GcRef>>,
    properties: RefCell<PropertyMap>,
    extra: RefCell<Option<Rc<dyn ExtraSlot>>>,
    interceptor: RefCell<Option<Rc<dyn PropertyInterceptor>>>,
    template: Cell<Option<GcRef>>,
}

impl JsObject {
    /// New object with no own properties
    pub fn new(kind: ObjectKind, prototype: Option<GcRef>) -> Self {
        Self {
            kind,
            prototype: Cell::new(prototype),
            properties: RefCell::new(PropertyMap::default()),
            extra: RefCell::new(None),
            interceptor: RefCell::new(None),
            template: Cell::new(None),
        }
    }

    /// Exotic kind
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Whether the object is callable
    pub fn is_function(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    /// Function data, if callable
    pub fn as_function(&self) -> Option<&FunctionKind> {
        match &self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// ArrayBuffer data, if an ArrayBuffer
    pub fn as_array_buffer(&self) -> Option<&ArrayBufferObject> {
        match &self.kind {
            ObjectKind::ArrayBuffer(b) => Some(b),
            _ => None,
        }
    }

    /// Error constructor kind, if a native error
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.kind {
            ObjectKind::Error(kind) => Some(kind),
            _ => None,
        }
    }

    /// `[[Prototype]]`
    pub fn prototype(&self) -> Option<GcRef> {
        self.prototype.get()
    }

    /// Replace `[[Prototype]]`
    pub fn set_prototype(&self, prototype: Option<GcRef>) {
        self.prototype.set(prototype);
    }

    /// Own property value
    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.properties.borrow().get(key).cloned()
    }

    /// Create or overwrite an own property
    pub fn set_own(&self, key: impl Into<Rc<str>>, value: Value) {
        self.properties.borrow_mut().insert(key.into(), value);
    }

    /// Whether an own property exists
    pub fn has_own(&self, key: &str) -> bool {
        self.properties.borrow().contains_key(key)
    }

    /// Remove an own property, returning whether it existed
    pub fn delete_own(&self, key: &str) -> bool {
        self.properties.borrow_mut().shift_remove(key).is_some()
    }

    /// Own property names in insertion order
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.properties.borrow().keys().cloned().collect()
    }

    /// Borrow the property map
    pub fn properties(&self) -> Ref<'_, PropertyMap> {
        self.properties.borrow()
    }

    /// Current extra data
    pub fn extra(&self) -> Option<Rc<dyn ExtraSlot>> {
        self.extra.borrow().clone()
    }

    /// Replace the extra data, returning what was there
    pub fn set_extra(&self, extra: Option<Rc<dyn ExtraSlot>>) -> Option<Rc<dyn ExtraSlot>> {
        std::mem::replace(&mut *self.extra.borrow_mut(), extra)
    }

    /// Installed interceptor
    pub fn interceptor(&self) -> Option<Rc<dyn PropertyInterceptor>> {
        self.interceptor.borrow().clone()
    }

    /// Install or clear the interceptor
    pub fn set_interceptor(&self, interceptor: Option<Rc<dyn PropertyInterceptor>>) {
        *self.interceptor.borrow_mut() = interceptor;
    }

    /// Template this object was instantiated from
    pub fn template(&self) -> Option<GcRef> {
        self.template.get()
    }

    /// Record the originating template
    pub fn set_template(&self, template: Option<GcRef>) {
        self.template.set(template);
    }
}

impl GcTraceable for JsObject {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        if let Some(proto) = self.prototype.get() {
            tracer(proto);
        }
        if let Some(template) = self.template.get() {
            tracer(template);
        }
        for value in self.properties.borrow().values() {
            value.trace(tracer);
        }
        if let Some(extra) = self.extra.borrow().as_ref() {
            extra.trace(tracer);
        }
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            ObjectKind::Ordinary => "Ordinary",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Error(_) => "Error",
            ObjectKind::ArrayBuffer(_) => "ArrayBuffer",
        };
        f.debug_struct("JsObject")
            .field("kind", &kind)
            .field("properties", &self.properties.borrow().len())
            .field("has_extra", &self.extra.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker(u32);
    impl GcTraceable for Marker {}

    #[test]
    fn test_property_order_and_delete() {
        let obj = JsObject::new(ObjectKind::Ordinary, None);
        obj.set_own("b", Value::from(1));
        obj.set_own("a", Value::from(2));
        assert_eq!(obj.keys(), vec![Rc::from("b"), Rc::from("a")]);
        assert!(obj.delete_own("b"));
        assert!(!obj.has_own("b"));
        assert_eq!(obj.get_own("a"), Some(Value::from(2)));
    }

    #[test]
    fn test_extra_slot_downcast() {
        let obj = JsObject::new(ObjectKind::Ordinary, None);
        assert!(obj.set_extra(Some(Rc::new(Marker(7)))).is_none());
        let extra = obj.extra().expect("extra set");
        let marker = extra.into_any().downcast::<Marker>().ok().expect("marker");
        assert_eq!(marker.0, 7);
    }
}
