//! Execution state handed to native functions and script bodies.

use crate::context::Context;
use crate::error::VmError;
use crate::function::CallInfo;
use crate::object::JsObject;
use crate::template::FunctionTemplate;
use crate::value::Value;
use crate::vm::{Frame, VmInstance};
use shim_gc::GcRef;
use std::rc::Rc;

/// The running realm plus access to the VM.
///
/// Every engine operation that can run user code goes through here so
/// frames, call-depth limits and stack capture stay consistent.
pub struct ExecutionState<'vm> {
    vm: &'vm VmInstance,
    context: GcRef,
}

impl<'vm> ExecutionState<'vm> {
    /// State for running in `context`
    pub fn new(vm: &'vm VmInstance, context: GcRef) -> Self {
        Self { vm, context }
    }

    /// Owning VM
    pub fn vm(&self) -> &'vm VmInstance {
        self.vm
    }

    /// Current realm cell
    pub fn context(&self) -> GcRef {
        self.context
    }

    /// Current realm
    pub fn context_data(&self) -> Rc<Context> {
        self.vm.context_data(self.context)
    }

    /// Global object of the current realm
    pub fn global(&self) -> GcRef {
        self.context_data().global()
    }

    /// Shorthand for [`VmInstance::object`]
    pub fn object(&self, r: GcRef) -> Rc<JsObject> {
        self.vm.object(r)
    }

    /// Fresh ordinary object
    pub fn new_object(&self) -> GcRef {
        self.vm.new_object(self.context)
    }

    /// Error object ready to be thrown
    pub fn new_error(&self, err: &VmError) -> Value {
        Value::Object(self.vm.error_from(self.context, err))
    }

    /// Materialize `err` as the value to put in `Err(..)`
    pub fn throw(&self, err: VmError) -> Value {
        self.new_error(&err)
    }

    fn require_object(
        &self,
        target: &Value,
        key: &str,
        (verb, gerund): (&str, &str),
    ) -> Result<Option<GcRef>, Value> {
        match target {
            Value::Object(r) => Ok(Some(*r)),
            v if v.is_nullish() => Err(self.throw(VmError::type_error(format!(
                "Cannot {verb} properties of {} ({gerund} '{key}')",
                self.vm.display_string(v)
            )))),
            _ => Ok(None),
        }
    }

    /// `target[key]`, consulting interceptors along the prototype chain
    pub fn get(&mut self, target: &Value, key: &str) -> Result<Value, Value> {
        let Some(object) = self.require_object(target, key, ("read", "reading"))? else {
            if let (Value::String(s), "length") = (target, key) {
                return Ok(Value::from(s.chars().count() as u32));
            }
            return Ok(Value::Undefined);
        };

        let mut current = Some(object);
        while let Some(r) = current {
            let obj = self.vm.object(r);
            if let Some(interceptor) = obj.interceptor() {
                if let Some(result) = interceptor.get(self, r, key) {
                    return result;
                }
            }
            if let Some(value) = obj.get_own(key) {
                return Ok(value);
            }
            current = obj.prototype();
        }
        Ok(Value::Undefined)
    }

    /// `target[key] = value`
    pub fn set(&mut self, target: &Value, key: &str, value: Value) -> Result<(), Value> {
        let Some(object) = self.require_object(target, key, ("set", "setting"))? else {
            return Ok(());
        };
        let obj = self.vm.object(object);
        if let Some(interceptor) = obj.interceptor() {
            if let Some(result) = interceptor.set(self, object, key, &value) {
                return result;
            }
        }
        obj.set_own(key, value);
        Ok(())
    }

    /// `key in target` for objects, ignoring interceptors
    pub fn has_property(&self, target: GcRef, key: &str) -> bool {
        self.vm.lookup(target, key).is_some()
    }

    /// `delete target[key]`
    pub fn delete(&self, target: GcRef, key: &str) -> bool {
        self.vm.object(target).delete_own(key)
    }

    /// Invoke `callee`
    pub fn call(&mut self, callee: &Value, this: Value, args: &[Value]) -> Result<Value, Value> {
        self.invoke(callee, this, args, None)
    }

    /// `new callee(...args)`.
    ///
    /// The receiver is created from the constructor's instance template when
    /// it came from a function template, otherwise it is an ordinary object
    /// inheriting from `callee.prototype`. A non-object return value is
    /// replaced by the receiver.
    pub fn construct(&mut self, callee: &Value, args: &[Value]) -> Result<Value, Value> {
        let target = callee
            .as_object()
            .and_then(|r| self.vm.try_object(r).map(|obj| (r, obj)))
            .filter(|(_, obj)| obj.as_function().is_some_and(|f| f.is_constructor));
        let Some((function, obj)) = target else {
            return Err(self.throw(VmError::type_error(format!(
                "{} is not a constructor",
                self.vm.display_string(callee)
            ))));
        };

        let template = obj
            .template()
            .filter(|t| self.vm.heap().get::<FunctionTemplate>(*t).is_some());
        let receiver = match template {
            Some(ftpl) => {
                let instance_template = self.vm.function_template(ftpl).instance_template();
                self.vm.instantiate_object_template(self.context, instance_template)
            }
            None => {
                let proto = obj
                    .get_own("prototype")
                    .and_then(|v| v.as_object())
                    .unwrap_or_else(|| self.context_data().object_prototype());
                let receiver = self.new_object();
                self.vm.object(receiver).set_prototype(Some(proto));
                receiver
            }
        };

        let result = self.invoke(callee, Value::Object(receiver), args, Some(function))?;
        Ok(if result.is_object() {
            result
        } else {
            Value::Object(receiver)
        })
    }

    fn invoke(
        &mut self,
        callee: &Value,
        this: Value,
        args: &[Value],
        new_target: Option<GcRef>,
    ) -> Result<Value, Value> {
        let function = callee
            .as_object()
            .and_then(|r| self.vm.try_object(r)?.as_function().cloned().map(|f| (r, f)));
        let Some((callee_ref, kind)) = function else {
            return Err(self.throw(VmError::type_error(format!(
                "{} is not a function",
                self.vm.display_string(callee)
            ))));
        };

        if self.vm.frame_depth() >= self.vm.config().max_call_depth {
            return Err(self.throw(VmError::range_error("Maximum call stack size exceeded")));
        }

        let mark = self.vm.push_roots(
            std::iter::once(callee.clone())
                .chain(std::iter::once(this.clone()))
                .chain(args.iter().cloned()),
        );
        self.vm
            .push_frame(Frame::native(kind.name.clone(), new_target.is_some()));

        let info = CallInfo {
            callee: callee_ref,
            this,
            args: args.to_vec(),
            new_target,
        };
        let result = (kind.native)(self, &info);
        if result.is_err() {
            self.vm.capture_if_unset();
        }

        self.vm.pop_frame();
        self.vm.truncate_roots(mark);
        result
    }

    /// Run `f` inside an engine try region.
    ///
    /// While inside, thrown values count as catchable. A thrown value that
    /// reaches the end of the region is returned as `Err` and its captured
    /// stack is discarded.
    pub fn try_catch<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, Value>,
    ) -> Result<R, Value> {
        self.vm.enter_try();
        let result = f(self);
        self.vm.exit_try();
        if result.is_err() {
            self.vm.clear_captured_stack();
        }
        result
    }

    /// Whether an engine try region is active
    pub fn is_on_try(&self) -> bool {
        self.vm.is_on_try()
    }

    /// Record the source position of the innermost frame
    pub fn set_location(&self, line: i32, column: i32) {
        self.vm.set_location(line, column);
    }

    /// Run a compiled script in this realm
    pub fn run_script(&mut self, script: GcRef) -> Result<Value, Value> {
        let script = self.vm.script(script);
        if self.vm.frame_depth() >= self.vm.config().max_call_depth {
            return Err(self.throw(VmError::range_error("Maximum call stack size exceeded")));
        }
        self.vm
            .push_frame(Frame::script(script.src_name(), script.source()));
        let body = script.body();
        let result = body(self);
        if result.is_err() {
            self.vm.capture_if_unset();
        }
        self.vm.pop_frame();
        result
    }

    /// `String(value)` without running user code
    pub fn to_display_string(&self, value: &Value) -> String {
        self.vm.display_string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_primitive_string_length() {
        let vm = VmInstance::default();
        let ctx = vm.create_context(None);
        let mut state = ExecutionState::new(&vm, ctx);
        let len = state.get(&Value::from("héllo"), "length").unwrap();
        assert_eq!(len, Value::from(5));
    }

    #[test]
    fn test_read_from_undefined_throws_type_error() {
        let vm = VmInstance::default();
        let ctx = vm.create_context(None);
        let mut state = ExecutionState::new(&vm, ctx);
        let thrown = state.get(&Value::Undefined, "x").unwrap_err();
        let r = thrown.as_object().unwrap();
        assert_eq!(vm.object(r).error_kind(), Some(ErrorKind::TypeError));
    }

    #[test]
    fn test_call_depth_limit() {
        let vm = VmInstance::default();
        let ctx = vm.create_context(None);
        let recurse = vm.new_function(
            ctx,
            "recurse",
            0,
            |state, info| state.call(&Value::Object(info.callee), Value::Undefined, &[]),
            false,
        );
        let mut state = ExecutionState::new(&vm, ctx);
        let thrown = state
            .call(&Value::Object(recurse), Value::Undefined, &[])
            .unwrap_err();
        assert_eq!(
            vm.display_string(&thrown),
            "RangeError: Maximum call stack size exceeded"
        );
        assert_eq!(vm.frame_depth(), 0);
    }

    #[test]
    fn test_construct_plain_function() {
        let vm = VmInstance::default();
        let ctx = vm.create_context(None);
        let point = vm.new_function(
            ctx,
            "Point",
            0,
            |state, info| {
                state.set(&info.this, "x", Value::from(3))?;
                Ok(Value::Undefined)
            },
            true,
        );
        let mut state = ExecutionState::new(&vm, ctx);
        let instance = state.construct(&Value::Object(point), &[]).unwrap();
        assert_eq!(state.get(&instance, "x").unwrap(), Value::from(3));
        let ctor = state.get(&instance, "constructor").unwrap();
        assert_eq!(ctor, Value::Object(point));
    }
}
