//! Handle kinds, primitives and object internals

use shim_api::object::{null, undefined};
use shim_api::{
    Context, ContextScope, CreateParams, HandleKind, HandleScope, IsolateScope, IsolateWrap,
    types,
};
use std::rc::Rc;

fn isolate() -> (Rc<IsolateWrap>, IsolateScope) {
    let isolate = IsolateWrap::new(CreateParams::default());
    let entered = IsolateScope::new(&isolate);
    (isolate, entered)
}

#[test]
fn test_wrap_kinds() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);

    let context = Context::new(&isolate, None);
    assert_eq!(context.value_wrap().kind(), HandleKind::Context);

    let number = types::Number::new(&isolate, 1.5);
    assert_eq!(number.value_wrap().kind(), HandleKind::JsValue);
    assert!(number.value_wrap().is_valid());

    let template = types::FunctionTemplate::new(&isolate, None);
    assert_eq!(template.value_wrap().kind(), HandleKind::FunctionTemplate);
    let instance = template.instance_template();
    assert_eq!(instance.value_wrap().kind(), HandleKind::ObjectTemplate);
}

#[test]
#[should_panic(expected = "handle kind mismatch")]
fn test_value_of_context_handle_aborts() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _ = context.value_wrap().value();
}

#[test]
fn test_primitives() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);

    assert!(undefined(&isolate).as_value().is_undefined());
    assert!(null(&isolate).as_value().is_null());
    assert!(null(&isolate).as_value().is_null_or_undefined());

    let yes = types::Boolean::new(&isolate, true);
    assert!(yes.value());
    assert!(yes.as_value().is_true());

    let n = types::Number::new(&isolate, -7.0);
    assert_eq!(n.value(), -7.0);
    assert!(n.as_value().is_int32());
    assert_eq!(n.as_value().int32_value(), Some(-7));

    let fraction = types::Number::new(&isolate, 0.5).as_value();
    assert!(fraction.is_number());
    assert!(!fraction.is_int32());
}

#[test]
fn test_strings() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);

    let empty = types::String::new_from_utf8(&isolate, "").unwrap();
    assert_eq!(empty, types::String::empty(&isolate));

    let latin = types::String::new_from_utf8(&isolate, "café").unwrap();
    assert_eq!(latin.length(), 4);
    assert_eq!(latin.utf8_length(), 5);
    assert!(latin.is_one_byte());

    let wide = types::String::new_from_utf8(&isolate, "한글").unwrap();
    assert_eq!(wide.length(), 2);
    assert!(!wide.is_one_byte());
    assert_eq!(wide.to_rust_string(), "한글");
}

#[test]
fn test_object_properties() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let object = types::Object::new(&isolate);
    let key = types::String::new_from_utf8(&isolate, "answer").unwrap().as_value();
    let value = types::Number::new(&isolate, 42.0).as_value();

    assert_eq!(object.set(context, key, value), Some(true));
    assert_eq!(object.has(context, key), Some(true));
    let read = object.get(context, key).unwrap();
    assert_eq!(read.number_value(), Some(42.0));

    let names: Vec<String> = object
        .get_own_property_names()
        .iter()
        .map(|name| name.to_rust_string())
        .collect();
    assert_eq!(names, vec!["answer".to_string()]);

    assert_eq!(object.delete(context, key), Some(true));
    assert_eq!(object.has(context, key), Some(false));
    assert!(object.get(context, key).unwrap().is_undefined());
}

#[test]
fn test_internal_fields() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::ObjectTemplate::new(&isolate, None);
    template.set_internal_field_count(2);
    assert_eq!(template.internal_field_count(), 2);

    let object = template.new_instance(context).unwrap();
    assert_eq!(object.internal_field_count(), 2);
    assert!(object.get_internal_field(0).is_undefined());

    let value = types::Number::new(&isolate, 3.0).as_value();
    object.set_internal_field(1, value);
    assert_eq!(object.get_internal_field(1).number_value(), Some(3.0));

    let mut slot = 0u64;
    let pointer = (&mut slot as *mut u64).cast();
    object.set_aligned_pointer_in_internal_field(0, pointer);
    assert_eq!(object.get_aligned_pointer_from_internal_field(0), pointer);
}

#[test]
fn test_out_of_bounds_internal_field_is_ignored() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::ObjectTemplate::new(&isolate, None);
    template.set_internal_field_count(1);
    let object = template.new_instance(context).unwrap();

    let value = types::Number::new(&isolate, 1.0).as_value();
    object.set_internal_field(5, value);
    object.set_internal_field(-1, value);
    assert!(object.get_internal_field(5).is_undefined());
    assert!(object.get_internal_field(0).is_undefined());
    assert!(object.get_aligned_pointer_from_internal_field(5).is_null());
}

#[test]
fn test_internal_field_count_fixed_after_instantiation() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);
    let _context_scope = ContextScope::new(context);

    let template = types::ObjectTemplate::new(&isolate, None);
    template.set_internal_field_count(1);
    let _ = template.new_instance(context).unwrap();
    template.set_internal_field_count(4);
    assert_eq!(template.internal_field_count(), 1);
}

#[test]
fn test_embedder_data() {
    let (isolate, _entered) = isolate();
    let _scope = HandleScope::new(&isolate);
    let context = Context::new(&isolate, None);

    assert!(context.get_embedder_data(3).is_undefined());
    let value = types::String::new_from_utf8(&isolate, "slot").unwrap().as_value();
    context.set_embedder_data(3, value);
    assert_eq!(
        context
            .get_embedder_data(3)
            .cast::<types::String>()
            .to_rust_string(),
        "slot"
    );
    assert!(context.get_aligned_pointer_from_embedder_data(0).is_null());
}
