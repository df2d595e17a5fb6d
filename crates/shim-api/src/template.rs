//! Function and object templates, host callbacks and interceptors.
//!
//! Every function instantiated from a function template runs
//! [`run_native_function_callback`], which finds the host callback through
//! the function's extra data, checks the receiver against the template's
//! signature and converts exceptions the callback scheduled into engine
//! throws.

use crate::extra_data::{
    ExtraData, FunctionTemplateData, ObjectTemplateData, get_extra_data, materialize,
    object_template_data,
};
use crate::handle::{HandleKind, ValueWrap};
use crate::handle_scope::{HandleScope, HandleScopeKind};
use crate::isolate::IsolateWrap;
use crate::local::{Local, MaybeLocal};
use crate::types;
use shim_gc::GcRef;
use shim_vm::{
    CallInfo, ErrorKind, ExecutionState, ExtraSlot, PropertyInterceptor, TemplateValue,
    Value as JsValue, VmInstance,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Host function called for every invocation of a templated function
pub type FunctionCallback = fn(&FunctionCallbackInfo);

/// Named property getter interceptor
pub type NamedPropertyGetterCallback = fn(Local<types::String>, &PropertyCallbackInfo);

/// Named property setter interceptor
pub type NamedPropertySetterCallback =
    fn(Local<types::String>, Local<types::Value>, &PropertyCallbackInfo);

/// Indexed property getter interceptor
pub type IndexedPropertyGetterCallback = fn(u32, &PropertyCallbackInfo);

/// Indexed property setter interceptor
pub type IndexedPropertySetterCallback = fn(u32, Local<types::Value>, &PropertyCallbackInfo);

/// Slot a host callback writes its result into
#[derive(Debug, Default)]
pub struct ReturnValue {
    value: RefCell<Option<JsValue>>,
}

impl ReturnValue {
    fn put(&self, value: JsValue) {
        *self.value.borrow_mut() = Some(value);
    }

    /// Return `value`
    pub fn set<T>(&self, value: Local<T>) {
        self.put(value.value_wrap().value());
    }

    /// Return a boolean
    pub fn set_bool(&self, value: bool) {
        self.put(JsValue::Boolean(value));
    }

    /// Return a number
    pub fn set_double(&self, value: f64) {
        self.put(JsValue::Number(value));
    }

    /// Return an integer
    pub fn set_int32(&self, value: i32) {
        self.put(JsValue::from(value));
    }

    /// Return `null`
    pub fn set_null(&self) {
        self.put(JsValue::Null);
    }

    /// Return `undefined`
    pub fn set_undefined(&self) {
        self.put(JsValue::Undefined);
    }

    /// Return `""`
    pub fn set_empty_string(&self) {
        self.put(JsValue::string(""));
    }

    /// Whether anything was set
    pub fn is_set(&self) -> bool {
        self.value.borrow().is_some()
    }

    fn take(&self) -> Option<JsValue> {
        self.value.borrow_mut().take()
    }
}

/// Arguments of a [`FunctionCallback`]
pub struct FunctionCallbackInfo {
    isolate: Rc<IsolateWrap>,
    this: Local<types::Object>,
    holder: Local<types::Object>,
    data: Local<types::Value>,
    args: Vec<Local<types::Value>>,
    new_target: Local<types::Value>,
    is_construct_call: bool,
    return_value: ReturnValue,
}

impl FunctionCallbackInfo {
    /// Number of arguments
    pub fn length(&self) -> i32 {
        self.args.len() as i32
    }

    /// Argument `i`; `undefined` when out of range
    pub fn get(&self, i: i32) -> Local<types::Value> {
        usize::try_from(i)
            .ok()
            .and_then(|i| self.args.get(i).copied())
            .unwrap_or_else(|| Local::from_wrap(self.isolate.slots().undefined))
    }

    /// Receiver
    pub fn this(&self) -> Local<types::Object> {
        self.this
    }

    /// Object in the receiver's prototype chain that matched the signature
    pub fn holder(&self) -> Local<types::Object> {
        self.holder
    }

    /// Data given to the template
    pub fn data(&self) -> Local<types::Value> {
        self.data
    }

    /// `new.target`; `undefined` for plain calls
    pub fn new_target(&self) -> Local<types::Value> {
        self.new_target
    }

    /// Whether the function was called with `new`
    pub fn is_construct_call(&self) -> bool {
        self.is_construct_call
    }

    /// Result slot
    pub fn get_return_value(&self) -> &ReturnValue {
        &self.return_value
    }

    /// Isolate running the callback
    pub fn get_isolate(&self) -> &Rc<IsolateWrap> {
        &self.isolate
    }
}

/// Arguments of an interceptor
pub struct PropertyCallbackInfo {
    isolate: Rc<IsolateWrap>,
    this: Local<types::Object>,
    data: Local<types::Value>,
    return_value: ReturnValue,
}

impl PropertyCallbackInfo {
    /// Object the property is accessed on
    pub fn this(&self) -> Local<types::Object> {
        self.this
    }

    /// Object carrying the interceptor
    pub fn holder(&self) -> Local<types::Object> {
        self.this
    }

    /// Data given with the handler configuration
    pub fn data(&self) -> Local<types::Value> {
        self.data
    }

    /// Result slot; setting it marks the access as intercepted
    pub fn get_return_value(&self) -> &ReturnValue {
        &self.return_value
    }

    /// Isolate running the interceptor
    pub fn get_isolate(&self) -> &Rc<IsolateWrap> {
        &self.isolate
    }
}

/// Named interceptors of an object template
#[derive(Debug, Clone, Default)]
pub struct NamedPropertyHandlerConfiguration {
    /// Getter
    pub getter: Option<NamedPropertyGetterCallback>,
    /// Setter
    pub setter: Option<NamedPropertySetterCallback>,
    /// Passed as `info.data()`
    pub data: Option<JsValue>,
}

impl NamedPropertyHandlerConfiguration {
    /// No interceptors
    pub fn new() -> Self {
        Self::default()
    }

    /// With a getter
    pub fn getter(mut self, getter: NamedPropertyGetterCallback) -> Self {
        self.getter = Some(getter);
        self
    }

    /// With a setter
    pub fn setter(mut self, setter: NamedPropertySetterCallback) -> Self {
        self.setter = Some(setter);
        self
    }

    /// With callback data
    pub fn data(mut self, data: Local<types::Value>) -> Self {
        self.data = Some(data.value_wrap().value());
        self
    }
}

/// Indexed interceptors of an object template
#[derive(Debug, Clone, Default)]
pub struct IndexedPropertyHandlerConfiguration {
    /// Getter
    pub getter: Option<IndexedPropertyGetterCallback>,
    /// Setter
    pub setter: Option<IndexedPropertySetterCallback>,
    /// Passed as `info.data()`
    pub data: Option<JsValue>,
}

impl IndexedPropertyHandlerConfiguration {
    /// No interceptors
    pub fn new() -> Self {
        Self::default()
    }

    /// With a getter
    pub fn getter(mut self, getter: IndexedPropertyGetterCallback) -> Self {
        self.getter = Some(getter);
        self
    }

    /// With a setter
    pub fn setter(mut self, setter: IndexedPropertySetterCallback) -> Self {
        self.setter = Some(setter);
        self
    }

    /// With callback data
    pub fn data(mut self, data: Local<types::Value>) -> Self {
        self.data = Some(data.value_wrap().value());
        self
    }
}

// ---- linkage ----

/// Function template an object was created for
fn template_of(vm: &VmInstance, object: GcRef) -> Option<GcRef> {
    let from_extra = get_extra_data(vm, object).and_then(|extra| match &*extra {
        ExtraData::ObjectTemplate(d) => d.constructor(),
        other => other.object_data().and_then(|d| d.function_template()),
    });
    from_extra.or_else(|| {
        let template = vm.try_object(object)?.template()?;
        vm.heap()
            .get::<shim_vm::ObjectTemplate>(template)?
            .constructor()
    })
}

/// Whether `ftpl` is `ancestor` or inherits from it
fn inherits(vm: &VmInstance, ftpl: GcRef, ancestor: GcRef) -> bool {
    let mut current = Some(ftpl);
    while let Some(t) = current {
        if t == ancestor {
            return true;
        }
        current = vm.function_template(t).parent();
    }
    false
}

/// First object in the prototype chain of `receiver` whose template
/// satisfies `signature`
fn find_holder(vm: &VmInstance, receiver: &JsValue, signature: GcRef) -> Option<GcRef> {
    let mut current = receiver.as_object();
    while let Some(object) = current {
        if template_of(vm, object).is_some_and(|t| inherits(vm, t, signature)) {
            return Some(object);
        }
        current = vm.try_object(object)?.prototype();
    }
    None
}

fn function_template_data_of(vm: &VmInstance, callee: GcRef) -> Rc<ExtraData> {
    let Some(extra) = get_extra_data(vm, callee) else {
        fatal!("templated function {callee:?} carries no template data")
    };
    match &*extra {
        ExtraData::FunctionTemplate(_) => extra.clone(),
        ExtraData::Function(data) => data.template_data().clone(),
        other => fatal!("templated function {callee:?} carries {other:?}"),
    }
}

// ---- callback dispatch ----

/// Run host code one callback level deeper, inside an internal handle
/// scope, then convert whatever it scheduled.
fn run_host<R>(isolate: &IsolateWrap, f: impl FnOnce() -> R) -> Result<R, JsValue> {
    isolate.increment_call_depth();
    let result = {
        let _depth = scopeguard::guard(isolate, |isolate| isolate.decrement_call_depth());
        let _scope = HandleScope::with_kind(isolate, HandleScopeKind::Internal);
        f()
    };
    isolate.throw_error_if_has_exception()?;
    Ok(result)
}

/// Engine entry point of every function created from a function template
pub fn run_native_function_callback(
    state: &mut ExecutionState<'_>,
    call: &CallInfo,
) -> Result<JsValue, JsValue> {
    let isolate = IsolateWrap::current_or_fatal();
    if isolate.is_execution_terminating() {
        return Err(JsValue::Undefined);
    }
    let vm = state.vm();
    let template_data = function_template_data_of(vm, call.callee);
    let Some(ftd) = template_data.as_function_template_data() else {
        shim_unreachable!()
    };
    trace_call!(
        "CALLBACK",
        callee = ?call.callee,
        construct = call.is_construct_call(),
        argc = call.args.len(),
        "invoke"
    );

    if call.is_construct_call() {
        if let Some(this) = call.this.as_object() {
            materialize(vm, this, Some(ftd.ftpl()));
        }
    }

    let returned = run_host(&isolate, || {
        let holder = match ftd.signature() {
            Some(signature) => match find_holder(vm, &call.this, signature) {
                Some(holder) => JsValue::Object(holder),
                None => {
                    let error =
                        vm.new_error(state.context(), ErrorKind::TypeError, "Illegal invocation");
                    isolate.schedule_throw(JsValue::Object(error), vm.capture_stack_trace());
                    return None;
                }
            },
            None => call.this.clone(),
        };
        let callback = ftd.callback()?;
        let info = FunctionCallbackInfo {
            isolate: isolate.clone(),
            this: isolate.new_value(call.this.clone()),
            holder: isolate.new_value(holder),
            data: isolate.new_value(ftd.callback_data().unwrap_or_default()),
            args: call.args.iter().map(|a| isolate.new_value(a.clone())).collect(),
            new_target: isolate.new_value(call.new_target.map(JsValue::Object).unwrap_or_default()),
            is_construct_call: call.is_construct_call(),
            return_value: ReturnValue::default(),
        };
        callback(&info);
        info.return_value.take()
    })?;

    let value = returned.unwrap_or_default();
    if call.is_construct_call() && !value.is_object() {
        return Ok(call.this.clone());
    }
    Ok(value)
}

/// Engine interceptor installed by [`Local::<types::ObjectTemplate>::set_handler`]
struct ShimInterceptor {
    otpl: GcRef,
}

fn array_index(key: &str) -> Option<u32> {
    let index = key.parse::<u32>().ok()?;
    (index.to_string() == key).then_some(index)
}

impl ShimInterceptor {
    fn template(&self, vm: &VmInstance) -> Option<Rc<ExtraData>> {
        object_template_data(vm, self.otpl)
    }

    fn invoke(
        &self,
        receiver: GcRef,
        data: Option<JsValue>,
        f: impl FnOnce(&IsolateWrap, &PropertyCallbackInfo),
    ) -> Result<Option<JsValue>, JsValue> {
        let isolate = IsolateWrap::current_or_fatal();
        if isolate.is_execution_terminating() {
            return Err(JsValue::Undefined);
        }
        run_host(&isolate, || {
            let info = PropertyCallbackInfo {
                isolate: isolate.clone(),
                this: isolate.new_value(JsValue::Object(receiver)),
                data: isolate.new_value(data.unwrap_or_default()),
                return_value: ReturnValue::default(),
            };
            f(&*isolate, &info);
            info.return_value.take()
        })
    }
}

impl PropertyInterceptor for ShimInterceptor {
    fn get(
        &self,
        state: &mut ExecutionState<'_>,
        receiver: GcRef,
        key: &str,
    ) -> Option<Result<JsValue, JsValue>> {
        let template = self.template(state.vm())?;
        let otd = template.as_object_template_data()?;

        let indexed = array_index(key).and_then(|index| {
            let config = otd.indexed_handler()?;
            Some((index, config.getter?, config.data))
        });
        let result = match indexed {
            Some((index, getter, data)) => {
                self.invoke(receiver, data, |_, info| getter(index, info))
            }
            None => {
                let config = otd.named_handler()?;
                let getter = config.getter?;
                self.invoke(receiver, config.data, |isolate, info| {
                    getter(isolate.new_value(JsValue::string(key)), info)
                })
            }
        };
        result.transpose()
    }

    fn set(
        &self,
        state: &mut ExecutionState<'_>,
        receiver: GcRef,
        key: &str,
        value: &JsValue,
    ) -> Option<Result<(), JsValue>> {
        let template = self.template(state.vm())?;
        let otd = template.as_object_template_data()?;

        let indexed = array_index(key).and_then(|index| {
            let config = otd.indexed_handler()?;
            Some((index, config.setter?, config.data))
        });
        let result = match indexed {
            Some((index, setter, data)) => self.invoke(receiver, data, |isolate, info| {
                setter(index, isolate.new_value(value.clone()), info)
            }),
            None => {
                let config = otd.named_handler()?;
                let setter = config.setter?;
                self.invoke(receiver, config.data, |isolate, info| {
                    setter(
                        isolate.new_value(JsValue::string(key)),
                        isolate.new_value(value.clone()),
                        info,
                    )
                })
            }
        };
        result.map(|set| set.map(|_| ())).transpose()
    }
}

fn erase(data: ExtraData) -> Option<Rc<dyn ExtraSlot>> {
    Some(Rc::new(data) as Rc<dyn ExtraSlot>)
}

fn template_value<T>(value: Local<T>) -> TemplateValue {
    let wrap = value.value_wrap();
    match wrap.kind() {
        HandleKind::JsValue => TemplateValue::Value(wrap.value()),
        HandleKind::FunctionTemplate => TemplateValue::FunctionTemplate(wrap.ftpl()),
        HandleKind::ObjectTemplate => TemplateValue::ObjectTemplate(wrap.otpl()),
        kind => fatal!("{kind:?} handles cannot be template properties"),
    }
}

// ---- function templates ----

impl types::FunctionTemplate {
    /// Template calling `callback`
    pub fn new(
        isolate: &IsolateWrap,
        callback: Option<FunctionCallback>,
    ) -> Local<types::FunctionTemplate> {
        Self::new_full(isolate, callback, None, None, 0)
    }

    /// Template calling `callback` with `data`, accepting only receivers
    /// matching `signature`, with the given `length`
    pub fn new_full(
        isolate: &IsolateWrap,
        callback: Option<FunctionCallback>,
        data: Option<Local<types::Value>>,
        signature: Option<Local<types::Signature>>,
        length: i32,
    ) -> Local<types::FunctionTemplate> {
        trace_call!("TEMPLATE", length, "FunctionTemplate::new");
        let vm = isolate.vm();
        let ftpl = vm.new_function_template(
            "",
            u32::try_from(length).unwrap_or(0),
            run_native_function_callback,
        );
        let template = vm.function_template(ftpl);
        let data = FunctionTemplateData::new(
            ftpl,
            callback,
            data.map(|d| d.value_wrap().value()),
            signature.map(|s| s.value_wrap().ftpl()),
            length,
        );
        template.set_extra(erase(ExtraData::FunctionTemplate(data)));

        let instance = template.instance_template();
        vm.object_template(instance)
            .set_extra(erase(ExtraData::ObjectTemplate(ObjectTemplateData::new(
                instance,
                Some(ftpl),
            ))));
        isolate.new_local(ValueWrap::create_function_template(ftpl))
    }
}

impl Local<types::FunctionTemplate> {
    fn ftpl(&self) -> GcRef {
        self.value_wrap().ftpl()
    }

    /// Template data attached at creation
    pub fn template_data(&self) -> Rc<ExtraData> {
        let isolate = api_enter_no_exception!();
        match crate::extra_data::function_template_data(isolate.vm(), self.ftpl()) {
            Some(data) => data,
            None => fatal!("function template without template data"),
        }
    }

    /// The function for this template in `context`, created on first
    /// request and the same object afterwards
    pub fn get_function(&self, context: Local<types::Context>) -> MaybeLocal<types::Function> {
        let isolate = api_enter!(None);
        trace_call!("TEMPLATE", "GetFunction");
        let vm = isolate.vm();
        let function = vm.instantiate_function_template(context.engine_context(), self.ftpl());
        materialize(vm, function, None);
        Some(isolate.new_value(JsValue::Object(function)))
    }

    /// Whether `value` was created from this template or a descendant
    pub fn has_instance(&self, value: Local<types::Value>) -> bool {
        let isolate = api_enter_no_exception!();
        let vm = isolate.vm();
        value
            .value_wrap()
            .value()
            .as_object()
            .and_then(|object| template_of(vm, object))
            .is_some_and(|t| inherits(vm, t, self.ftpl()))
    }

    /// Make instances inherit from `parent`'s prototype
    pub fn inherit(&self, parent: Local<types::FunctionTemplate>) {
        let isolate = api_enter_no_exception!();
        isolate
            .vm()
            .function_template(self.ftpl())
            .set_parent(Some(parent.ftpl()));
    }

    /// Template for objects created by `new`
    pub fn instance_template(&self) -> Local<types::ObjectTemplate> {
        let isolate = api_enter_no_exception!();
        let otpl = isolate.vm().function_template(self.ftpl()).instance_template();
        isolate.new_local(ValueWrap::create_object_template(otpl))
    }

    /// Template for the `prototype` object
    pub fn prototype_template(&self) -> Local<types::ObjectTemplate> {
        let isolate = api_enter_no_exception!();
        let otpl = isolate
            .vm()
            .function_template(self.ftpl())
            .prototype_template();
        isolate.new_local(ValueWrap::create_object_template(otpl))
    }

    /// Function `name` and instance class name
    pub fn set_class_name(&self, name: Local<types::String>) {
        let isolate = api_enter_no_exception!();
        let vm = isolate.vm();
        let name: Rc<str> = vm.display_string(&name.value_wrap().value()).into();
        let template = vm.function_template(self.ftpl());
        template.set_name(name.clone());
        let instance = ensure_object_template_data(vm, template.instance_template());
        if let Some(otd) = instance.as_object_template_data() {
            otd.set_class_name(name);
        }
    }

    /// Replace the host callback and its data
    pub fn set_call_handler(
        &self,
        callback: FunctionCallback,
        data: Option<Local<types::Value>>,
    ) {
        let data = data.map(|d| d.value_wrap().value());
        if let Some(ftd) = self.template_data().as_function_template_data() {
            ftd.set_callback(Some(callback), data);
        }
    }

    /// Set `length`
    pub fn set_length(&self, length: i32) {
        let isolate = api_enter_no_exception!();
        isolate
            .vm()
            .function_template(self.ftpl())
            .set_length(u32::try_from(length).unwrap_or(0));
    }

    /// Property installed on every function made from this template
    pub fn set<T>(&self, name: &str, value: Local<T>) {
        let isolate = api_enter_no_exception!();
        isolate
            .vm()
            .function_template(self.ftpl())
            .set(name, template_value(value));
    }
}

impl types::Signature {
    /// Receivers must be instances of `receiver` or its descendants
    pub fn new(
        isolate: &IsolateWrap,
        receiver: Local<types::FunctionTemplate>,
    ) -> Local<types::Signature> {
        isolate.new_local(ValueWrap::create_function_template(receiver.ftpl()))
    }
}

// ---- object templates ----

fn ensure_object_template_data(vm: &VmInstance, otpl: GcRef) -> Rc<ExtraData> {
    if let Some(data) = object_template_data(vm, otpl) {
        return data;
    }
    let template = vm.object_template(otpl);
    let data = Rc::new(ExtraData::ObjectTemplate(ObjectTemplateData::new(
        otpl,
        template.constructor(),
    )));
    template.set_extra(Some(data.clone() as Rc<dyn ExtraSlot>));
    data
}

impl types::ObjectTemplate {
    /// Template for plain objects, or for instances of `constructor`
    pub fn new(
        isolate: &IsolateWrap,
        constructor: Option<Local<types::FunctionTemplate>>,
    ) -> Local<types::ObjectTemplate> {
        trace_call!("TEMPLATE", "ObjectTemplate::new");
        let vm = isolate.vm();
        let constructor = constructor.map(|c| c.ftpl());
        let otpl = vm.new_object_template(constructor);
        ensure_object_template_data(vm, otpl);
        isolate.new_local(ValueWrap::create_object_template(otpl))
    }
}

impl Local<types::ObjectTemplate> {
    fn otpl(&self) -> GcRef {
        self.value_wrap().otpl()
    }

    /// Template data, created on first use
    pub fn template_data(&self) -> Rc<ExtraData> {
        let isolate = api_enter_no_exception!();
        ensure_object_template_data(isolate.vm(), self.otpl())
    }

    /// Give every future instance `count` internal fields.
    ///
    /// Ignored (and logged) once the template has been instantiated.
    pub fn set_internal_field_count(&self, count: i32) {
        let isolate = api_enter_no_exception!();
        if isolate.vm().object_template(self.otpl()).is_instantiated() {
            tracing::error!(
                target: "shim::template",
                count,
                "internal field count changed after instantiation"
            );
            return;
        }
        if let Some(otd) = self.template_data().as_object_template_data() {
            otd.fields().set_internal_field_count(count);
        }
    }

    /// Internal fields every instance gets
    pub fn internal_field_count(&self) -> i32 {
        self.template_data()
            .as_object_template_data()
            .map_or(0, |otd| otd.fields().internal_field_count() as i32)
    }

    /// Fresh instance in `context`
    pub fn new_instance(&self, context: Local<types::Context>) -> MaybeLocal<types::Object> {
        let isolate = api_enter!(None);
        trace_call!("TEMPLATE", "NewInstance");
        let vm = isolate.vm();
        self.template_data();
        let object = vm.instantiate_object_template(context.engine_context(), self.otpl());
        materialize(vm, object, None);
        Some(isolate.new_value(JsValue::Object(object)))
    }

    /// Install named interceptors
    pub fn set_handler(&self, config: NamedPropertyHandlerConfiguration) {
        let isolate = api_enter_no_exception!();
        if let Some(otd) = self.template_data().as_object_template_data() {
            otd.set_named_handler(config);
        }
        self.install_interceptor(&isolate);
    }

    /// Install indexed interceptors
    pub fn set_indexed_property_handler(&self, config: IndexedPropertyHandlerConfiguration) {
        let isolate = api_enter_no_exception!();
        if let Some(otd) = self.template_data().as_object_template_data() {
            otd.set_indexed_handler(config);
        }
        self.install_interceptor(&isolate);
    }

    fn install_interceptor(&self, isolate: &IsolateWrap) {
        let otpl = self.otpl();
        isolate
            .vm()
            .object_template(otpl)
            .set_interceptor(Some(Rc::new(ShimInterceptor { otpl })));
    }

    /// Property installed on every instance
    pub fn set<T>(&self, name: &str, value: Local<T>) {
        let isolate = api_enter_no_exception!();
        isolate
            .vm()
            .object_template(self.otpl())
            .set(name, template_value(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_index_is_canonical() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("42"), Some(42));
        assert_eq!(array_index("042"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("length"), None);
    }
}
