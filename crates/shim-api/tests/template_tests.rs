//! Function templates, object templates and interceptors

use shim_api::object::undefined;
use shim_api::{
    Context, ContextScope, CreateParams, FunctionCallbackInfo, HandleScope,
    IndexedPropertyHandlerConfiguration, IsolateScope, IsolateWrap, Local,
    NamedPropertyHandlerConfiguration, PropertyCallbackInfo, TryCatch, types,
};
use std::cell::Cell;
use std::rc::Rc;

thread_local! {
    static CALLS: Cell<usize> = const { Cell::new(0) };
}

fn calls() -> usize {
    CALLS.with(|c| c.get())
}

fn isolate() -> (Rc<IsolateWrap>, IsolateScope) {
    CALLS.with(|c| c.set(0));
    let isolate = IsolateWrap::new(CreateParams::default());
    let entered = IsolateScope::new(&isolate);
    (isolate, entered)
}

fn number(isolate: &IsolateWrap, value: f64) -> Local<types::Value> {
    types::Number::new(isolate, value).as_value()
}

fn string(isolate: &IsolateWrap, text: &str) -> Local<types::Value> {
    types::String::new_from_utf8(isolate, text).unwrap().as_value()
}

fn add(info: &FunctionCallbackInfo) {
    CALLS.with(|c| c.set(c.get() + 1));
    let sum: f64 = (0..info.length())
        .filter_map(|i| info.get(i).number_value())
        .sum();
    info.get_return_value().set_double(sum);
}

fn point(info: &FunctionCallbackInfo) {
    CALLS.with(|c| c.set(c.get() + 1));
    assert!(info.is_construct_call());
    info.this().set_internal_field(0, info.get(0));
}

fn read_x(info: &FunctionCallbackInfo) {
    CALLS.with(|c| c.set(c.get() + 1));
    info.get_return_value().set(info.holder().get_internal_field(0));
}

fn echo_data(info: &FunctionCallbackInfo) {
    info.get_return_value().set(info.data());
}

#[test]
fn test_call_host_function() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::FunctionTemplate::new(&isolate, Some(add));
    let function = template.get_function(context).unwrap();
    let args = [number(&isolate, 1.0), number(&isolate, 2.5)];
    let result = function
        .call(context, undefined(&isolate).as_value(), &args)
        .unwrap();
    assert_eq!(result.number_value(), Some(3.5));
    assert_eq!(calls(), 1);
    assert_eq!(isolate.call_depth(), 0);
}

#[test]
fn test_get_function_is_cached_per_context() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let other = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::FunctionTemplate::new(&isolate, Some(add));
    let first = template.get_function(context).unwrap();
    let second = template.get_function(context).unwrap();
    assert!(first.as_value().strict_equals(second.as_value()));

    let first_data = first.cast::<types::Object>().extra_data().unwrap();
    let second_data = second.cast::<types::Object>().extra_data().unwrap();
    assert!(Rc::ptr_eq(&first_data, &second_data));
    assert!(first_data.is_instance_data());
    assert!(first_data.object_data().is_some());

    let elsewhere = template.get_function(other).unwrap();
    assert!(!first.as_value().strict_equals(elsewhere.as_value()));
}

#[test]
fn test_function_name_and_data() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::FunctionTemplate::new(&isolate, Some(add));
    template.set_class_name(types::String::new_from_utf8(&isolate, "Adder").unwrap());
    let function = template.get_function(context).unwrap();
    assert_eq!(
        function.get_name().cast::<types::String>().to_rust_string(),
        "Adder"
    );
    function.set_name(types::String::new_from_utf8(&isolate, "sum").unwrap());
    assert_eq!(
        function.get_name().cast::<types::String>().to_rust_string(),
        "sum"
    );

    let data = string(&isolate, "payload");
    let echo = types::Function::new(context, echo_data, Some(data), 0).unwrap();
    let result = echo
        .call(context, undefined(&isolate).as_value(), &[])
        .unwrap();
    assert_eq!(result.cast::<types::String>().to_rust_string(), "payload");
}

#[test]
fn test_constructor_instances() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::FunctionTemplate::new(&isolate, Some(point));
    template.instance_template().set_internal_field_count(1);
    template
        .prototype_template()
        .set("kind", string(&isolate, "point"));
    let constructor = template.get_function(context).unwrap();

    let instance = constructor
        .new_instance(context, &[number(&isolate, 7.0)])
        .unwrap();
    assert_eq!(calls(), 1);
    assert_eq!(instance.internal_field_count(), 1);
    assert_eq!(instance.get_internal_field(0).number_value(), Some(7.0));

    let kind = instance.get(context, string(&isolate, "kind")).unwrap();
    assert_eq!(kind.cast::<types::String>().to_rust_string(), "point");

    assert!(template.has_instance(instance.as_value()));
    assert!(!template.has_instance(constructor.as_value()));
    assert!(!template.has_instance(types::Object::new(&isolate).as_value()));
    assert!(!template.has_instance(number(&isolate, 1.0)));
}

#[test]
fn test_inherit() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let parent = types::FunctionTemplate::new(&isolate, None);
    parent.prototype_template().set("base", number(&isolate, 1.0));
    let child = types::FunctionTemplate::new(&isolate, None);
    child.inherit(parent);

    let instance = child
        .get_function(context)
        .unwrap()
        .new_instance(context, &[])
        .unwrap();
    assert!(child.has_instance(instance.as_value()));
    assert!(parent.has_instance(instance.as_value()));

    let base = instance.get(context, string(&isolate, "base")).unwrap();
    assert_eq!(base.number_value(), Some(1.0));

    let unrelated = types::FunctionTemplate::new(&isolate, None);
    assert!(!unrelated.has_instance(instance.as_value()));
}

#[test]
fn test_signature_mismatch_throws_illegal_invocation() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let class = types::FunctionTemplate::new(&isolate, Some(point));
    class.instance_template().set_internal_field_count(1);
    let signature = types::Signature::new(&isolate, class);
    let getter = types::FunctionTemplate::new_full(&isolate, Some(read_x), None, Some(signature), 0)
        .get_function(context)
        .unwrap();

    let instance = class
        .get_function(context)
        .unwrap()
        .new_instance(context, &[number(&isolate, 5.0)])
        .unwrap();
    let value = getter.call(context, instance.as_value(), &[]).unwrap();
    assert_eq!(value.number_value(), Some(5.0));
    assert_eq!(calls(), 2);

    let try_catch = TryCatch::new(&isolate);
    let stranger = types::Object::new(&isolate);
    assert!(getter.call(context, stranger.as_value(), &[]).is_none());
    assert_eq!(calls(), 2);
    assert!(try_catch.has_caught());
    let message = try_catch.message().unwrap();
    assert!(message.get().contains("Illegal invocation"));
    assert!(try_catch.exception().unwrap().is_native_error());
}

#[test]
fn test_holder_found_on_prototype_chain() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let class = types::FunctionTemplate::new(&isolate, Some(point));
    class.instance_template().set_internal_field_count(1);
    let signature = types::Signature::new(&isolate, class);
    let getter = types::FunctionTemplate::new_full(&isolate, Some(read_x), None, Some(signature), 0)
        .get_function(context)
        .unwrap();

    let instance = class
        .get_function(context)
        .unwrap()
        .new_instance(context, &[number(&isolate, 9.0)])
        .unwrap();
    let derived = types::Object::new(&isolate);
    assert_eq!(derived.set_prototype(context, instance.as_value()), Some(true));

    let value = getter.call(context, derived.as_value(), &[]).unwrap();
    assert_eq!(value.number_value(), Some(9.0));
}

fn named_getter(key: Local<types::String>, info: &PropertyCallbackInfo) {
    let key = key.to_rust_string();
    if let Some(rest) = key.strip_prefix('x') {
        let text = format!("intercepted:{rest}");
        let value = types::String::new_from_utf8(info.get_isolate(), &text).unwrap();
        info.get_return_value().set(value);
    }
}

fn named_setter(key: Local<types::String>, value: Local<types::Value>, info: &PropertyCallbackInfo) {
    if key.to_rust_string() == "locked" {
        assert!(value.is_number());
        CALLS.with(|c| c.set(c.get() + 1));
        info.get_return_value().set_bool(true);
    }
}

fn indexed_getter(index: u32, info: &PropertyCallbackInfo) {
    info.get_return_value().set_double(f64::from(index) * 2.0);
}

#[test]
fn test_named_interceptor() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::ObjectTemplate::new(&isolate, None);
    template.set_handler(
        NamedPropertyHandlerConfiguration::new()
            .getter(named_getter)
            .setter(named_setter),
    );
    let object = template.new_instance(context).unwrap();

    let hit = object.get(context, string(&isolate, "xyz")).unwrap();
    assert_eq!(hit.cast::<types::String>().to_rust_string(), "intercepted:yz");

    object.set(context, string(&isolate, "plain"), number(&isolate, 1.0));
    let miss = object.get(context, string(&isolate, "plain")).unwrap();
    assert_eq!(miss.number_value(), Some(1.0));

    object.set(context, string(&isolate, "locked"), number(&isolate, 2.0));
    assert_eq!(calls(), 1);
    assert_eq!(object.has(context, string(&isolate, "locked")), Some(false));
}

#[test]
fn test_indexed_interceptor() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::ObjectTemplate::new(&isolate, None);
    template.set_indexed_property_handler(
        IndexedPropertyHandlerConfiguration::new().getter(indexed_getter),
    );
    let object = template.new_instance(context).unwrap();

    assert_eq!(object.get_index(context, 21).unwrap().number_value(), Some(42.0));
    let named = object.get(context, string(&isolate, "name")).unwrap();
    assert!(named.is_undefined());
}

#[test]
fn test_template_properties() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::FunctionTemplate::new(&isolate, Some(add));
    template.set("version", number(&isolate, 3.0));
    let function = template.get_function(context).unwrap();
    let version = function
        .cast::<types::Object>()
        .get(context, string(&isolate, "version"))
        .unwrap();
    assert_eq!(version.number_value(), Some(3.0));

    let object_template = types::ObjectTemplate::new(&isolate, None);
    object_template.set("answer", number(&isolate, 42.0));
    let object = object_template.new_instance(context).unwrap();
    let answer = object.get(context, string(&isolate, "answer")).unwrap();
    assert_eq!(answer.number_value(), Some(42.0));
}

#[test]
fn test_callback_without_return_value_is_undefined() {
    fn silent(_: &FunctionCallbackInfo) {}

    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let function = types::Function::new(context, silent, None, 0).unwrap();
    let result = function
        .call(context, undefined(&isolate).as_value(), &[])
        .unwrap();
    assert!(result.is_undefined());
}
