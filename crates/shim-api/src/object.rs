//! Values, objects, functions and scripts

use crate::evaluator::execute;
use crate::extra_data::{ExtraData, get_extra_data};
use crate::handle::ValueWrap;
use crate::isolate::IsolateWrap;
use crate::local::{Local, MaybeLocal};
use crate::template::FunctionCallback;
use crate::types;
use shim_gc::GcRef;
use shim_vm::{ObjectKind, Value as JsValue};
use std::ffi::c_void;
use std::rc::Rc;

/// `undefined`
pub fn undefined(isolate: &IsolateWrap) -> Local<types::Primitive> {
    Local::from_wrap(isolate.slots().undefined)
}

/// `null`
pub fn null(isolate: &IsolateWrap) -> Local<types::Primitive> {
    Local::from_wrap(isolate.slots().null)
}

/// `true`
pub fn true_value(isolate: &IsolateWrap) -> Local<types::Boolean> {
    Local::from_wrap(isolate.slots().true_value)
}

/// `false`
pub fn false_value(isolate: &IsolateWrap) -> Local<types::Boolean> {
    Local::from_wrap(isolate.slots().false_value)
}

fn value_of<T>(handle: Local<T>) -> JsValue {
    handle.value_wrap().value()
}

fn object_of<T>(handle: Local<T>) -> GcRef {
    match value_of(handle).as_object() {
        Some(object) => object,
        None => fatal!("object handle {handle:?} holds a primitive"),
    }
}

fn property_key(isolate: &IsolateWrap, key: Local<types::Value>) -> String {
    isolate.vm().display_string(&value_of(key))
}

// ---- values ----

impl Local<types::Value> {
    fn with_object<R>(&self, f: impl FnOnce(&shim_vm::JsObject) -> R) -> Option<R> {
        let isolate = api_enter_no_exception!();
        let object = value_of(*self).as_object()?;
        let object = isolate.vm().try_object(object)?;
        Some(f(&object))
    }

    /// `=== undefined`
    pub fn is_undefined(&self) -> bool {
        value_of(*self).is_undefined()
    }

    /// `=== null`
    pub fn is_null(&self) -> bool {
        value_of(*self).is_null()
    }

    /// `== null`
    pub fn is_null_or_undefined(&self) -> bool {
        value_of(*self).is_nullish()
    }

    /// `=== true`
    pub fn is_true(&self) -> bool {
        value_of(*self).as_bool() == Some(true)
    }

    /// `=== false`
    pub fn is_false(&self) -> bool {
        value_of(*self).as_bool() == Some(false)
    }

    /// Boolean primitive
    pub fn is_boolean(&self) -> bool {
        value_of(*self).is_boolean()
    }

    /// Number primitive
    pub fn is_number(&self) -> bool {
        value_of(*self).is_number()
    }

    /// Number primitive holding an `i32`
    pub fn is_int32(&self) -> bool {
        value_of(*self)
            .as_number()
            .is_some_and(|n| n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64)
    }

    /// String primitive
    pub fn is_string(&self) -> bool {
        value_of(*self).is_string()
    }

    /// Any object
    pub fn is_object(&self) -> bool {
        value_of(*self).is_object()
    }

    /// Callable object
    pub fn is_function(&self) -> bool {
        self.with_object(|o| o.is_function()).unwrap_or(false)
    }

    /// `ArrayBuffer`
    pub fn is_array_buffer(&self) -> bool {
        self.with_object(|o| o.as_array_buffer().is_some())
            .unwrap_or(false)
    }

    /// Instance of a native error constructor
    pub fn is_native_error(&self) -> bool {
        self.with_object(|o| matches!(o.kind(), ObjectKind::Error(_)))
            .unwrap_or(false)
    }

    /// `!!value`
    pub fn boolean_value(&self) -> bool {
        value_of(*self).truthy()
    }

    /// The number, for number primitives
    pub fn number_value(&self) -> Option<f64> {
        value_of(*self).as_number()
    }

    /// The number truncated to `i32`, for number primitives
    pub fn int32_value(&self) -> Option<i32> {
        let n = self.number_value()?;
        if !n.is_finite() {
            return Some(0);
        }
        Some(n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32)
    }

    /// `String(value)`
    pub fn to_string(&self, context: Local<types::Context>) -> MaybeLocal<types::String> {
        let isolate = api_enter!(None);
        let value = value_of(*self);
        if value.is_string() {
            return Some(self.cast());
        }
        let text = execute(&isolate, context.engine_context(), |state| {
            Ok(state.to_display_string(&value))
        })?;
        Some(isolate.new_value(JsValue::string(text)))
    }

    /// `===`
    pub fn strict_equals(&self, other: Local<types::Value>) -> bool {
        value_of(*self).strict_equals(&value_of(other))
    }
}

// ---- primitives ----

impl types::Boolean {
    /// One of the isolate's boolean slots
    pub fn new(isolate: &IsolateWrap, value: bool) -> Local<types::Boolean> {
        if value {
            true_value(isolate)
        } else {
            false_value(isolate)
        }
    }
}

impl Local<types::Boolean> {
    /// The boolean
    pub fn value(&self) -> bool {
        value_of(*self).as_bool().unwrap_or(false)
    }
}

impl types::Number {
    /// Number handle
    pub fn new(isolate: &IsolateWrap, value: f64) -> Local<types::Number> {
        isolate.new_value(JsValue::Number(value))
    }
}

impl Local<types::Number> {
    /// The number
    pub fn value(&self) -> f64 {
        value_of(*self).as_number().unwrap_or(f64::NAN)
    }
}

impl types::String {
    /// String handle for `text`; the empty string reuses the isolate slot
    pub fn new_from_utf8(isolate: &IsolateWrap, text: &str) -> MaybeLocal<types::String> {
        if text.is_empty() {
            return Some(Self::empty(isolate));
        }
        Some(isolate.new_value(JsValue::string(text)))
    }

    /// `""`
    pub fn empty(isolate: &IsolateWrap) -> Local<types::String> {
        Local::from_wrap(isolate.slots().empty_string)
    }
}

impl Local<types::String> {
    fn text(&self) -> Rc<str> {
        match value_of(*self) {
            JsValue::String(s) => s,
            other => fatal!("string handle holds {other:?}"),
        }
    }

    /// Length in UTF-16 code units
    pub fn length(&self) -> usize {
        self.text().encode_utf16().count()
    }

    /// Length of the UTF-8 encoding in bytes
    pub fn utf8_length(&self) -> usize {
        self.text().len()
    }

    /// Whether every character fits in Latin-1
    pub fn is_one_byte(&self) -> bool {
        self.text().chars().all(|c| (c as u32) <= 0xff)
    }

    /// Copy out as a Rust string
    pub fn to_rust_string(&self) -> String {
        self.text().to_string()
    }
}

// ---- objects ----

fn instance_data(isolate: &IsolateWrap, object: GcRef) -> Option<Rc<ExtraData>> {
    get_extra_data(isolate.vm(), object).filter(|extra| extra.is_instance_data())
}

impl types::Object {
    /// `{}` in the current context
    pub fn new(isolate: &IsolateWrap) -> Local<types::Object> {
        let context = isolate.current_engine_context();
        let object = isolate.vm().new_object(context);
        isolate.new_value(JsValue::Object(object))
    }
}

impl Local<types::Object> {
    fn object(&self) -> GcRef {
        object_of(*self)
    }

    /// `object[key]`
    pub fn get(
        &self,
        context: Local<types::Context>,
        key: Local<types::Value>,
    ) -> MaybeLocal<types::Value> {
        let isolate = api_enter!(None);
        let target = JsValue::Object(self.object());
        let key = property_key(&isolate, key);
        let value = execute(&isolate, context.engine_context(), |state| {
            state.get(&target, &key)
        })?;
        Some(isolate.new_value(value))
    }

    /// `object[index]`
    pub fn get_index(&self, context: Local<types::Context>, index: u32) -> MaybeLocal<types::Value> {
        let isolate = api_enter!(None);
        let key = isolate.new_value(JsValue::from(index));
        self.get(context, key)
    }

    /// `object[key] = value`; `None` when it threw
    pub fn set(
        &self,
        context: Local<types::Context>,
        key: Local<types::Value>,
        value: Local<types::Value>,
    ) -> Option<bool> {
        let isolate = api_enter!(None);
        let target = JsValue::Object(self.object());
        let key = property_key(&isolate, key);
        let value = value_of(value);
        execute(&isolate, context.engine_context(), |state| {
            state.set(&target, &key, value)
        })?;
        Some(true)
    }

    /// `object[index] = value`
    pub fn set_index(
        &self,
        context: Local<types::Context>,
        index: u32,
        value: Local<types::Value>,
    ) -> Option<bool> {
        let isolate = api_enter!(None);
        let key = isolate.new_value(JsValue::from(index));
        self.set(context, key, value)
    }

    /// `key in object`
    pub fn has(&self, context: Local<types::Context>, key: Local<types::Value>) -> Option<bool> {
        let isolate = api_enter!(None);
        let target = self.object();
        let key = property_key(&isolate, key);
        execute(&isolate, context.engine_context(), |state| {
            Ok(state.has_property(target, &key))
        })
    }

    /// `delete object[key]`
    pub fn delete(&self, context: Local<types::Context>, key: Local<types::Value>) -> Option<bool> {
        let isolate = api_enter!(None);
        let target = self.object();
        let key = property_key(&isolate, key);
        execute(&isolate, context.engine_context(), |state| {
            Ok(state.delete(target, &key))
        })
    }

    /// Own enumerable keys in insertion order
    pub fn get_own_property_names(&self) -> Vec<Local<types::String>> {
        let isolate = api_enter!(Vec::new());
        let keys = isolate.vm().object(self.object()).keys();
        keys.into_iter()
            .map(|key| isolate.new_value(JsValue::String(key)))
            .collect()
    }

    /// `Object.getPrototypeOf(object)`
    pub fn get_prototype(&self) -> Local<types::Value> {
        let isolate = api_enter_no_exception!();
        let proto = isolate.vm().object(self.object()).prototype();
        match proto {
            Some(proto) => isolate.new_value(JsValue::Object(proto)),
            None => null(&isolate).as_value(),
        }
    }

    /// `Object.setPrototypeOf(object, prototype)`; only objects and `null`
    pub fn set_prototype(
        &self,
        _context: Local<types::Context>,
        prototype: Local<types::Value>,
    ) -> Option<bool> {
        let isolate = api_enter!(None);
        let proto = match value_of(prototype) {
            JsValue::Object(r) => Some(r),
            JsValue::Null => None,
            _ => return Some(false),
        };
        isolate.vm().object(self.object()).set_prototype(proto);
        Some(true)
    }

    /// Name of the constructor the object was created by
    pub fn get_constructor_name(&self) -> Local<types::String> {
        let isolate = api_enter_no_exception!();
        let vm = isolate.vm();
        let name = vm
            .lookup(self.object(), "constructor")
            .and_then(|ctor| ctor.as_object())
            .and_then(|ctor| vm.lookup(ctor, "name"))
            .filter(JsValue::is_string)
            .unwrap_or_else(|| JsValue::string("Object"));
        isolate.new_value(name)
    }

    /// Internal fields of this object; 0 for objects not made from a
    /// template with fields
    pub fn internal_field_count(&self) -> i32 {
        let isolate = api_enter_no_exception!();
        instance_data(&isolate, self.object())
            .and_then(|extra| extra.object_data().map(|d| d.fields().internal_field_count()))
            .unwrap_or(0) as i32
    }

    /// Value in internal field `index`; `undefined` when out of range
    pub fn get_internal_field(&self, index: i32) -> Local<types::Value> {
        let isolate = api_enter_no_exception!();
        let value = instance_data(&isolate, self.object())
            .and_then(|extra| extra.object_data()?.fields().internal_field(index));
        match value {
            Some(value) => isolate.new_value(value),
            None => undefined(&isolate).as_value(),
        }
    }

    /// Store `value` in internal field `index`
    pub fn set_internal_field(&self, index: i32, value: Local<types::Value>) {
        let isolate = api_enter_no_exception!();
        let value = value_of(value);
        match instance_data(&isolate, self.object()) {
            Some(extra) => {
                if let Some(data) = extra.object_data() {
                    data.fields().set_internal_field(index, value);
                }
            }
            None => tracing::error!(
                target: "shim::object",
                index,
                "object has no internal fields"
            ),
        }
    }

    /// Embedder pointer in internal field `index`; null when unset
    pub fn get_aligned_pointer_from_internal_field(&self, index: i32) -> *mut c_void {
        let isolate = api_enter_no_exception!();
        instance_data(&isolate, self.object())
            .and_then(|extra| extra.object_data().map(|d| d.fields().aligned_pointer(index)))
            .unwrap_or(std::ptr::null_mut())
    }

    /// Store an embedder pointer in internal field `index`
    pub fn set_aligned_pointer_in_internal_field(&self, index: i32, pointer: *mut c_void) {
        let isolate = api_enter_no_exception!();
        match instance_data(&isolate, self.object()) {
            Some(extra) => {
                if let Some(data) = extra.object_data() {
                    data.fields().set_aligned_pointer(index, pointer);
                }
            }
            None => tracing::error!(
                target: "shim::object",
                index,
                "object has no internal fields"
            ),
        }
    }

    /// Shim data attached to the object, if any
    pub fn extra_data(&self) -> Option<Rc<ExtraData>> {
        let isolate = api_enter_no_exception!();
        get_extra_data(isolate.vm(), self.object())
    }
}

// ---- functions ----

impl types::Function {
    /// Standalone function calling `callback` with `data`
    pub fn new(
        context: Local<types::Context>,
        callback: FunctionCallback,
        data: Option<Local<types::Value>>,
        length: i32,
    ) -> MaybeLocal<types::Function> {
        let isolate = api_enter!(None);
        let template = types::FunctionTemplate::new_full(&isolate, Some(callback), data, None, length);
        template.get_function(context)
    }
}

impl Local<types::Function> {
    /// `function.call(receiver, ...args)`
    pub fn call(
        &self,
        context: Local<types::Context>,
        receiver: Local<types::Value>,
        args: &[Local<types::Value>],
    ) -> MaybeLocal<types::Value> {
        let isolate = api_enter!(None);
        trace_call!("FUNCTION", argc = args.len(), "call");
        let callee = value_of(*self);
        let this = value_of(receiver);
        let args: Vec<JsValue> = args.iter().map(|a| value_of(*a)).collect();
        let value = execute(&isolate, context.engine_context(), |state| {
            state.call(&callee, this, &args)
        })?;
        Some(isolate.new_value(value))
    }

    /// `new function(...args)`
    pub fn new_instance(
        &self,
        context: Local<types::Context>,
        args: &[Local<types::Value>],
    ) -> MaybeLocal<types::Object> {
        let isolate = api_enter!(None);
        trace_call!("FUNCTION", argc = args.len(), "new_instance");
        let callee = value_of(*self);
        let args: Vec<JsValue> = args.iter().map(|a| value_of(*a)).collect();
        let value = execute(&isolate, context.engine_context(), |state| {
            state.construct(&callee, &args)
        })?;
        Some(isolate.new_value(value))
    }

    /// `function.name`
    pub fn get_name(&self) -> Local<types::Value> {
        let isolate = api_enter_no_exception!();
        let name = isolate
            .vm()
            .object(object_of(*self))
            .get_own("name")
            .unwrap_or_default();
        isolate.new_value(name)
    }

    /// Overwrite `function.name`
    pub fn set_name(&self, name: Local<types::String>) {
        let isolate = api_enter_no_exception!();
        isolate
            .vm()
            .object(object_of(*self))
            .set_own("name", value_of(name));
    }
}

// ---- scripts ----

/// Where a script came from
#[derive(Debug, Clone, Default)]
pub struct ScriptOrigin {
    /// Name reported in messages and stack frames
    pub resource_name: String,
}

impl ScriptOrigin {
    /// Origin named `resource_name`
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
        }
    }
}

impl types::Script {
    /// Compile `source` in `context`. A compile failure throws a
    /// `SyntaxError` and yields `None`.
    pub fn compile(
        context: Local<types::Context>,
        source: Local<types::String>,
        origin: Option<&ScriptOrigin>,
    ) -> MaybeLocal<types::Script> {
        let isolate = api_enter!(None);
        let name = origin.map_or("", |o| o.resource_name.as_str());
        let text = source.to_rust_string();
        trace_call!("SCRIPT", resource = name, "compile");
        let script = execute(&isolate, context.engine_context(), |state| {
            state.vm().compile(name, &text).map_err(|e| state.throw(e))
        })?;
        Some(isolate.new_local(ValueWrap::create_script(script)))
    }
}

impl Local<types::Script> {
    /// Run in `context`
    pub fn run(&self, context: Local<types::Context>) -> MaybeLocal<types::Value> {
        let isolate = api_enter!(None);
        let script = self.value_wrap().script();
        trace_call!("SCRIPT", ?script, "run");
        let value = execute(&isolate, context.engine_context(), |state| {
            state.run_script(script)
        })?;
        Some(isolate.new_value(value))
    }
}
