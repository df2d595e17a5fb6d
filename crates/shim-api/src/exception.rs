//! Exception bridge.
//!
//! Engine failures surface as thrown values. Where one goes depends on how
//! deep in host callbacks the isolate is:
//!
//! - **Outside callbacks** the value becomes the pending exception and is
//!   reported right away: handed to a `TryCatch` opened at the same depth,
//!   or to the message listeners.
//! - **Inside a callback** the value is scheduled. A `TryCatch` opened inside
//!   the same callback takes it immediately; otherwise it is rethrown into
//!   the engine when the callback returns, so JS `try` blocks and outer
//!   `TryCatch`es see it.

use crate::extra_data::{ExceptionObjectData, ExtraData, get_extra_data, set_extra_data};
use crate::flags::{FlagType, Flags};
use crate::handle_scope::{HandleScope, HandleScopeKind};
use crate::isolate::IsolateWrap;
use crate::local::{Local, MaybeLocal};
use crate::message::Message;
use crate::types;
use shim_vm::{ErrorKind, StackTraceData, Value as JsValue};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// State of one registered `TryCatch`
#[derive(Debug)]
pub struct TryCatchData {
    id: u64,
    call_depth: u32,
    exception: RefCell<Option<JsValue>>,
    message: RefCell<Option<Rc<Message>>>,
    is_verbose: Cell<bool>,
    capture_message: Cell<bool>,
    rethrow: Cell<bool>,
    has_terminated: Cell<bool>,
}

impl TryCatchData {
    fn new(id: u64, call_depth: u32) -> Self {
        Self {
            id,
            call_depth,
            exception: RefCell::new(None),
            message: RefCell::new(None),
            is_verbose: Cell::new(false),
            capture_message: Cell::new(true),
            rethrow: Cell::new(false),
            has_terminated: Cell::new(false),
        }
    }

    /// Host callback depth the handler was opened at
    pub fn call_depth(&self) -> u32 {
        self.call_depth
    }

    /// Caught value
    pub fn exception_value(&self) -> Option<JsValue> {
        self.exception.borrow().clone()
    }

    /// Whether caught exceptions are still reported to listeners
    pub fn is_verbose(&self) -> bool {
        self.is_verbose.get()
    }
}

impl IsolateWrap {
    // ---- handler stack ----

    fn push_try_catch(&self) -> Rc<TryCatchData> {
        let id = self.next_scope_id.get();
        self.next_scope_id.set(id + 1);
        let data = Rc::new(TryCatchData::new(id, self.call_depth()));
        self.try_catches.borrow_mut().push(data.clone());
        data
    }

    fn pop_try_catch(&self, expected: &TryCatchData) {
        let mut handlers = self.try_catches.borrow_mut();
        match handlers.last() {
            Some(top) if top.id == expected.id => {
                handlers.pop();
            }
            _ => fatal!("TryCatch {} is not the innermost handler", expected.id),
        }
    }

    /// Whether any `TryCatch` is registered
    pub fn has_try_catch(&self) -> bool {
        !self.try_catches.borrow().is_empty()
    }

    fn top_try_catch(&self) -> Option<Rc<TryCatchData>> {
        self.try_catches.borrow().last().cloned()
    }

    fn top_try_catch_at_current_depth(&self) -> Option<Rc<TryCatchData>> {
        self.top_try_catch()
            .filter(|handler| handler.call_depth == self.call_depth())
    }

    // ---- pending and scheduled slots ----

    /// Whether an exception is pending
    pub fn has_pending_exception(&self) -> bool {
        self.pending_exception.borrow().is_some()
    }

    /// Whether an exception is waiting for the current callback to return
    pub fn has_scheduled_exception(&self) -> bool {
        self.scheduled_exception.borrow().is_some()
    }

    /// Message of the pending exception
    pub fn pending_message(&self) -> Option<Rc<Message>> {
        self.pending_message.borrow().clone()
    }

    /// Make `exception` pending together with a message.
    ///
    /// An object thrown for the first time gets its frames attached as
    /// exception data; a rethrown object keeps the frames of its first
    /// throw. Objects already carrying other extra data are left alone.
    pub fn set_pending_exception_and_message(
        &self,
        exception: JsValue,
        frames: Vec<StackTraceData>,
    ) {
        let vm = self.vm();
        let frames: Rc<[StackTraceData]> = match exception.as_object() {
            Some(object) => match get_extra_data(vm, object) {
                None => {
                    let data = ExceptionObjectData::new(frames);
                    let shared = data.shared_frames();
                    set_extra_data(vm, object, Rc::new(ExtraData::Exception(data)));
                    shared
                }
                Some(extra) => match extra.as_exception_data() {
                    Some(data) => data.shared_frames(),
                    None => {
                        tracing::warn!(
                            target: "shim::exception",
                            ?object,
                            "thrown object already carries extra data"
                        );
                        frames.into()
                    }
                },
            },
            None => frames.into(),
        };
        let message = Message::new(&vm.display_string(&exception), frames);
        *self.pending_exception.borrow_mut() = Some(exception);
        *self.pending_message.borrow_mut() = Some(Rc::new(message));
    }

    /// Drop the pending exception and its message
    pub fn clear_pending_exception_and_message(&self) {
        self.pending_exception.borrow_mut().take();
        self.pending_message.borrow_mut().take();
    }

    /// Hand the pending exception to the innermost `TryCatch`.
    ///
    /// Only a handler opened at the current callback depth qualifies, and
    /// only while it holds no exception yet. Clears the pending slot on
    /// success.
    pub fn propagate_pending_exception_to_external_try_catch(&self) -> bool {
        let Some(handler) = self.top_try_catch_at_current_depth() else {
            return false;
        };
        if handler.exception.borrow().is_some() {
            return false;
        }
        let Some(exception) = self.pending_exception.borrow_mut().take() else {
            return false;
        };
        let message = self.pending_message.borrow_mut().take();
        *handler.exception.borrow_mut() = Some(exception);
        if handler.capture_message.get() {
            *handler.message.borrow_mut() = message;
        }
        true
    }

    /// Deliver the pending exception.
    ///
    /// It goes to a `TryCatch` when one can take it; listeners are notified
    /// when `is_verbose`, when the handler is verbose, or when there is no
    /// handler at this depth.
    pub fn report_pending_messages(&self, is_verbose: bool) {
        let exception = self.pending_exception.borrow().clone();
        let message = self.pending_message.borrow().clone();
        let delivered = self.propagate_pending_exception_to_external_try_catch();

        let handler = self.top_try_catch_at_current_depth();
        let should_report = handler.as_ref().is_none_or(|h| h.is_verbose());
        self.clear_pending_exception_and_message();

        let (Some(exception), Some(message)) = (exception, message) else {
            return;
        };
        let scheduled_matches = self
            .scheduled_exception
            .borrow()
            .as_ref()
            .is_some_and(|s| s.strict_equals(&exception));
        if scheduled_matches {
            self.scheduled_exception.borrow_mut().take();
        }
        if !(is_verbose || should_report) {
            if !delivered {
                tracing::warn!(
                    target: "shim::exception",
                    "exception dropped, the TryCatch already holds one: {}",
                    message.get()
                );
            }
            return;
        }
        if handler.is_none() && Flags::is(FlagType::AbortOnUncaughtException) {
            fatal!("{}", message.get());
        }
        self.notify_message_listeners(&message, exception);
    }

    fn notify_message_listeners(&self, message: &Message, exception: JsValue) {
        let listeners = self.message_listeners.borrow().clone();
        if listeners.is_empty() {
            tracing::warn!(target: "shim::exception", "{}", message.get());
            return;
        }
        let _scope = HandleScope::with_kind(self, HandleScopeKind::Internal);
        let exception: Local<types::Value> = self.new_value(exception);
        for listener in listeners {
            listener(message, exception);
        }
    }

    /// Register a listener for reported exceptions
    pub fn add_message_listener(&self, listener: impl Fn(&Message, Local<types::Value>) + 'static) {
        self.message_listeners.borrow_mut().push(Rc::new(listener));
    }

    /// Drop every message listener
    pub fn remove_message_listeners(&self) {
        self.message_listeners.borrow_mut().clear();
    }

    /// Throw from inside a host callback.
    ///
    /// The value becomes both pending and scheduled. A `TryCatch` opened
    /// inside the same callback takes it at once; the scheduled copy then
    /// survives only if something was already pending.
    pub fn schedule_throw(&self, exception: JsValue, frames: Vec<StackTraceData>) {
        trace_call!("EXCEPTION", depth = self.call_depth(), "schedule_throw");
        let rethrow = self.has_pending_exception();
        self.set_pending_exception_and_message(exception.clone(), frames);
        *self.scheduled_exception.borrow_mut() = Some(exception);
        if self.propagate_pending_exception_to_external_try_catch() {
            self.clear_pending_exception_and_message();
            if !rethrow {
                self.scheduled_exception.borrow_mut().take();
            }
        }
    }

    /// After a host callback returns: hand a scheduled exception back to
    /// the engine when something can catch it there, otherwise report it.
    pub fn throw_error_if_has_exception(&self) -> Result<(), JsValue> {
        let Some(exception) = self.scheduled_exception.borrow_mut().take() else {
            return Ok(());
        };
        if self.vm().is_on_try() || self.has_try_catch() {
            self.clear_pending_exception_and_message();
            return Err(exception);
        }
        if !self.has_pending_exception() {
            let frames = self.frames_of(&exception);
            self.set_pending_exception_and_message(exception, frames);
        }
        self.report_pending_messages(false);
        Ok(())
    }

    fn frames_of(&self, exception: &JsValue) -> Vec<StackTraceData> {
        exception
            .as_object()
            .and_then(|object| get_extra_data(self.vm(), object))
            .and_then(|extra| extra.as_exception_data().map(|d| d.frames().to_vec()))
            .unwrap_or_default()
    }

    /// Route a value thrown by the engine
    pub fn handle_exception(&self, exception: JsValue, frames: Vec<StackTraceData>) {
        if self.is_execution_terminating() {
            self.mark_terminated();
            return;
        }
        if self.call_depth() > 0 {
            self.schedule_throw(exception, frames);
        } else {
            self.set_pending_exception_and_message(exception, frames);
            self.report_pending_messages(false);
        }
    }

    /// Unwind for termination: nothing stays pending and the innermost
    /// handler reports that execution cannot continue.
    pub(crate) fn mark_terminated(&self) {
        self.clear_pending_exception_and_message();
        self.scheduled_exception.borrow_mut().take();
        if let Some(handler) = self.top_try_catch() {
            handler.exception.borrow_mut().take();
            handler.message.borrow_mut().take();
            handler.has_terminated.set(true);
        }
    }

    /// `isolate->ThrowException(value)`; returns `undefined`
    pub fn throw_exception(&self, exception: Local<types::Value>) -> Local<types::Value> {
        trace_call!("EXCEPTION", "throw_exception");
        let value = exception.value_wrap().value();
        let frames = self.vm().capture_stack_trace();
        self.handle_exception(value, frames);
        Local::from_wrap(self.slots().undefined)
    }

    fn rethrow_exception(&self, exception: JsValue, message: Option<Rc<Message>>) {
        let frames = message.map(|m| m.get_stack_trace().to_vec()).unwrap_or_default();
        self.handle_exception(exception, frames);
    }
}

/// Catches exceptions raised at the call depth it was opened at
#[must_use = "the handler is unregistered when dropped"]
pub struct TryCatch {
    isolate: Rc<IsolateWrap>,
    data: Rc<TryCatchData>,
}

impl TryCatch {
    /// Register a handler on `isolate`
    pub fn new(isolate: &IsolateWrap) -> Self {
        trace_call!("EXCEPTION", "TryCatch::new");
        Self {
            isolate: isolate.rc(),
            data: isolate.push_try_catch(),
        }
    }

    /// Whether an exception was caught
    pub fn has_caught(&self) -> bool {
        self.data.exception.borrow().is_some()
    }

    /// The caught value
    pub fn exception(&self) -> MaybeLocal<types::Value> {
        let value = self.data.exception_value()?;
        Some(self.isolate.new_value(value))
    }

    /// Message of the caught exception
    pub fn message(&self) -> Option<Rc<Message>> {
        self.data.message.borrow().clone()
    }

    /// `stack` property of the caught exception
    pub fn stack_trace(&self) -> MaybeLocal<types::Value> {
        let object = self.data.exception_value()?.as_object()?;
        let stack = self.isolate.vm().lookup(object, "stack")?;
        Some(self.isolate.new_value(stack))
    }

    /// Forget the caught exception
    pub fn reset(&self) {
        self.data.exception.borrow_mut().take();
        self.data.message.borrow_mut().take();
        self.data.rethrow.set(false);
    }

    /// Throw the caught exception again once this handler is dropped.
    /// Returns `undefined`.
    pub fn rethrow(&self) -> Local<types::Value> {
        self.data.rethrow.set(true);
        Local::from_wrap(self.isolate.slots().undefined)
    }

    /// Report caught exceptions to listeners as well
    pub fn set_verbose(&self, verbose: bool) {
        self.data.is_verbose.set(verbose);
    }

    /// Whether caught exceptions are reported to listeners as well
    pub fn is_verbose(&self) -> bool {
        self.data.is_verbose.get()
    }

    /// Keep the message of caught exceptions (default: true)
    pub fn set_capture_message(&self, capture: bool) {
        self.data.capture_message.set(capture);
    }

    /// False once execution was terminated
    pub fn can_continue(&self) -> bool {
        !self.data.has_terminated.get()
    }

    /// Whether execution was terminated while this handler was innermost
    pub fn has_terminated(&self) -> bool {
        self.data.has_terminated.get()
    }
}

impl Drop for TryCatch {
    fn drop(&mut self) {
        self.isolate.pop_try_catch(&self.data);
        if self.data.rethrow.get() {
            let exception = self.data.exception.borrow_mut().take();
            let message = self.data.message.borrow_mut().take();
            if let Some(exception) = exception {
                self.isolate.rethrow_exception(exception, message);
            }
        }
    }
}

impl std::fmt::Debug for TryCatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TryCatch")
            .field("id", &self.data.id)
            .field("has_caught", &self.has_caught())
            .finish()
    }
}

impl types::Exception {
    fn create(kind: ErrorKind, message: Local<types::String>) -> Local<types::Value> {
        let isolate = api_enter_no_exception!();
        let vm = isolate.vm();
        let text = vm.display_string(&message.value_wrap().value());
        let error = vm.new_error(isolate.engine_context_or_pure(), kind, &text);
        isolate.new_value(JsValue::Object(error))
    }

    /// `new Error(message)`
    pub fn error(message: Local<types::String>) -> Local<types::Value> {
        Self::create(ErrorKind::Error, message)
    }

    /// `new TypeError(message)`
    pub fn type_error(message: Local<types::String>) -> Local<types::Value> {
        Self::create(ErrorKind::TypeError, message)
    }

    /// `new RangeError(message)`
    pub fn range_error(message: Local<types::String>) -> Local<types::Value> {
        Self::create(ErrorKind::RangeError, message)
    }

    /// `new ReferenceError(message)`
    pub fn reference_error(message: Local<types::String>) -> Local<types::Value> {
        Self::create(ErrorKind::ReferenceError, message)
    }

    /// `new SyntaxError(message)`
    pub fn syntax_error(message: Local<types::String>) -> Local<types::Value> {
        Self::create(ErrorKind::SyntaxError, message)
    }

    /// Message for `exception` located at its first throw, or at the
    /// current stack when it was never thrown
    pub fn create_message(exception: Local<types::Value>) -> Rc<Message> {
        let isolate = api_enter_no_exception!();
        let vm = isolate.vm();
        let value = exception.value_wrap().value();
        let frames: Rc<[StackTraceData]> = match Self::get_stack_trace(exception) {
            Some(frames) => frames,
            None => vm.capture_stack_trace().into(),
        };
        Rc::new(Message::new(&vm.display_string(&value), frames))
    }

    /// Frames captured when `exception` was first thrown
    pub fn get_stack_trace(exception: Local<types::Value>) -> Option<Rc<[StackTraceData]>> {
        let isolate = api_enter_no_exception!();
        let object = exception.value_wrap().value().as_object()?;
        let extra = get_extra_data(isolate.vm(), object)?;
        extra.as_exception_data().map(|d| d.shared_frames())
    }
}
