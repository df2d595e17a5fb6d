//! Template instantiation

use shim_vm::{
    Evaluator, ExecutionState, GcRef, GcTraceable, PropertyInterceptor, TemplateValue, Value,
    VmInstance,
};
use std::cell::Cell;
use std::rc::Rc;

struct Tag(&'static str);
impl GcTraceable for Tag {}

fn tag_of(vm: &VmInstance, object: GcRef) -> Option<&'static str> {
    let extra = vm.object(object).extra()?;
    extra.into_any().downcast::<Tag>().ok().map(|t| t.0)
}

#[test]
fn test_function_instantiated_once_per_context() {
    let vm = VmInstance::default();
    let ftpl = vm.new_function_template("Widget", 0, |_, _| Ok(Value::Undefined));
    let first_ctx = vm.create_context(None);
    let second_ctx = vm.create_context(None);

    let a = vm.instantiate_function_template(first_ctx, ftpl);
    let b = vm.instantiate_function_template(first_ctx, ftpl);
    let c = vm.instantiate_function_template(second_ctx, ftpl);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_template_extra_is_copied_to_function() {
    let vm = VmInstance::default();
    let ctx = vm.create_context(None);
    let ftpl = vm.new_function_template("Widget", 0, |_, _| Ok(Value::Undefined));
    vm.function_template(ftpl).set_extra(Some(Rc::new(Tag("ftpl"))));

    let function = vm.instantiate_function_template(ctx, ftpl);
    assert_eq!(tag_of(&vm, function), Some("ftpl"));
    assert_eq!(vm.object(function).template(), Some(ftpl));
}

#[test]
fn test_construct_uses_instance_template() {
    let vm = VmInstance::default();
    let ctx = vm.create_context(None);
    let ftpl = vm.new_function_template("Widget", 0, |_, _| Ok(Value::Undefined));
    let template = vm.function_template(ftpl);
    let instance_template = vm.object_template(template.instance_template());
    instance_template.set("kind", TemplateValue::Value(Value::from("widget")));
    instance_template.set_extra(Some(Rc::new(Tag("instance"))));
    vm.object_template(template.prototype_template())
        .set("shared", TemplateValue::Value(Value::from(true)));

    let function = vm.instantiate_function_template(ctx, ftpl);
    let result = Evaluator::execute(&vm, ctx, |state| {
        let instance = state.construct(&Value::Object(function), &[])?;
        assert_eq!(state.get(&instance, "kind")?, Value::from("widget"));
        assert_eq!(state.get(&instance, "shared")?, Value::from(true));
        Ok(instance)
    });
    let instance = result.value().and_then(Value::as_object).unwrap();
    assert_eq!(tag_of(&vm, instance), Some("instance"));
    assert!(instance_template.is_instantiated());
}

#[test]
fn test_parent_template_prototype_chain() {
    let vm = VmInstance::default();
    let ctx = vm.create_context(None);
    let base = vm.new_function_template("Base", 0, |_, _| Ok(Value::Undefined));
    vm.object_template(vm.function_template(base).prototype_template())
        .set("greet", TemplateValue::Value(Value::from("hello")));
    let derived = vm.new_function_template("Derived", 0, |_, _| Ok(Value::Undefined));
    vm.function_template(derived).set_parent(Some(base));

    let function = vm.instantiate_function_template(ctx, derived);
    let result = Evaluator::execute(&vm, ctx, |state| {
        let instance = state.construct(&Value::Object(function), &[])?;
        state.get(&instance, "greet")
    });
    assert_eq!(result.value(), Some(&Value::from("hello")));
}

#[test]
fn test_nested_templates_on_object_template() {
    let vm = VmInstance::default();
    let ctx = vm.create_context(None);
    let method = vm.new_function_template("method", 0, |_, _| Ok(Value::from(7)));
    let inner = vm.new_object_template(None);
    vm.object_template(inner)
        .set("flag", TemplateValue::Value(Value::from(1)));
    let outer = vm.new_object_template(None);
    let outer_template = vm.object_template(outer);
    outer_template.set("method", TemplateValue::FunctionTemplate(method));
    outer_template.set("inner", TemplateValue::ObjectTemplate(inner));

    let object = vm.instantiate_object_template(ctx, outer);
    let result = Evaluator::execute(&vm, ctx, |state| {
        let target = Value::Object(object);
        let method = state.get(&target, "method")?;
        let called = state.call(&method, target.clone(), &[])?;
        let inner = state.get(&target, "inner")?;
        let flag = state.get(&inner, "flag")?;
        Ok(Value::from(called.as_number().unwrap_or(0.0) + flag.as_number().unwrap_or(0.0)))
    });
    assert_eq!(result.value(), Some(&Value::from(8)));
}

struct CountingInterceptor {
    reads: Cell<u32>,
}

impl PropertyInterceptor for CountingInterceptor {
    fn get(
        &self,
        _state: &mut ExecutionState<'_>,
        _receiver: GcRef,
        key: &str,
    ) -> Option<Result<Value, Value>> {
        self.reads.set(self.reads.get() + 1);
        (key == "magic").then(|| Ok(Value::from(42)))
    }

    fn set(
        &self,
        _state: &mut ExecutionState<'_>,
        _receiver: GcRef,
        key: &str,
        _value: &Value,
    ) -> Option<Result<(), Value>> {
        (key == "readonly").then_some(Ok(()))
    }
}

#[test]
fn test_interceptor_copied_from_template() {
    let vm = VmInstance::default();
    let ctx = vm.create_context(None);
    let interceptor = Rc::new(CountingInterceptor { reads: Cell::new(0) });
    let otpl = vm.new_object_template(None);
    vm.object_template(otpl)
        .set_interceptor(Some(interceptor.clone()));

    let object = vm.instantiate_object_template(ctx, otpl);
    let result = Evaluator::execute(&vm, ctx, |state| {
        let target = Value::Object(object);
        state.set(&target, "readonly", Value::from(1))?;
        state.set(&target, "plain", Value::from(2))?;
        let magic = state.get(&target, "magic")?;
        let plain = state.get(&target, "plain")?;
        let readonly = state.get(&target, "readonly")?;
        assert!(readonly.is_undefined());
        Ok(Value::from(magic.as_number().unwrap_or(0.0) + plain.as_number().unwrap_or(0.0)))
    });
    assert_eq!(result.value(), Some(&Value::from(44)));
    assert_eq!(interceptor.reads.get(), 3);
}

#[test]
fn test_global_template_shapes_global() {
    let vm = VmInstance::default();
    let global_template = vm.new_object_template(None);
    vm.object_template(global_template)
        .set("version", TemplateValue::Value(Value::from("1.0")));
    let ctx = vm.create_context(Some(global_template));
    let global = vm.context_data(ctx).global();
    assert_eq!(vm.object(global).get_own("version"), Some(Value::from("1.0")));
    assert_eq!(
        vm.object(global).get_own("globalThis"),
        Some(Value::Object(global))
    );
}
