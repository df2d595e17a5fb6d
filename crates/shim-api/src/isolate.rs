//! Isolates.
//!
//! An isolate owns one engine VM and every stack the embedding API keeps
//! per thread of execution: handle scopes, entered contexts, `TryCatch`
//! handlers and the pending/scheduled exception slots.
//!
//! # Thread model
//!
//! - **`IsolateWrap` is neither `Send` nor `Sync`**: it lives on the thread
//!   that created it. The current isolate is a thread-local set by
//!   [`IsolateWrap::enter`].
//! - **`IsolateHandle` is `Send + Sync`**: atomics only, used to request
//!   termination from another thread.
//!
//! ```ignore
//! let isolate = Isolate::new(CreateParams::default());
//! let _entered = IsolateScope::new(&isolate);
//! let scope = HandleScope::new(&isolate);
//! let context = Context::new(&isolate, None);
//! ```

use crate::allocator::{ArrayBufferAllocator, ArrayBufferAllocatorDecorator, DefaultAllocator};
use crate::exception::TryCatchData;
use crate::flags::Flags;
use crate::global_handles::GlobalHandles;
use crate::handle::ValueWrap;
use crate::handle_scope::HandleScopeWrap;
use crate::local::Local;
use crate::message::{Message, MessageCallback};
use shim_gc::{CollectStats, GcConfig, GcRef, HeapStats};
use shim_vm::{Value as JsValue, VmConfig, VmInstance};
use std::cell::{Cell, OnceCell, RefCell};
use std::ffi::c_void;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle type the embedding API calls an isolate
pub type Isolate = IsolateWrap;

thread_local! {
    static CURRENT: RefCell<Option<Rc<IsolateWrap>>> = const { RefCell::new(None) };
}

/// Parameters for [`IsolateWrap::initialize`]
#[derive(Clone)]
pub struct CreateParams {
    /// Memory source for ArrayBuffers; the default allocator when unset
    pub array_buffer_allocator: Option<Arc<dyn ArrayBufferAllocator>>,
    /// Frames kept per captured stack (default: 10)
    pub stack_trace_limit: usize,
    /// Maximum nested calls before a RangeError (default: 256)
    pub max_call_depth: usize,
    /// Engine heap configuration
    pub gc: GcConfig,
}

impl Default for CreateParams {
    fn default() -> Self {
        let vm = VmConfig::default();
        Self {
            array_buffer_allocator: None,
            stack_trace_limit: vm.stack_trace_limit,
            max_call_depth: vm.max_call_depth,
            gc: vm.gc,
        }
    }
}

impl std::fmt::Debug for CreateParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateParams")
            .field(
                "array_buffer_allocator",
                &self.array_buffer_allocator.is_some(),
            )
            .field("stack_trace_limit", &self.stack_trace_limit)
            .field("max_call_depth", &self.max_call_depth)
            .field("gc", &self.gc)
            .finish()
    }
}

/// Lifecycle of an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateState {
    /// Allocated, no VM yet
    Uninitialized,
    /// Usable
    Ready,
    /// Torn down
    Disposed,
}

/// Thread-safe handle to an isolate.
///
/// Contains only atomics, so it is `Send + Sync`.
#[derive(Debug, Clone, Default)]
pub struct IsolateHandle {
    terminating: Arc<AtomicBool>,
}

impl IsolateHandle {
    /// Request termination. Running host code finishes; every later API
    /// entry returns an empty result until cancelled.
    pub fn terminate_execution(&self) {
        self.terminating.store(true, Ordering::Release);
    }

    /// Withdraw a termination request
    pub fn cancel_terminate_execution(&self) {
        self.terminating.store(false, Ordering::Release);
    }

    /// Whether termination has been requested
    pub fn is_execution_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }
}

/// Values every isolate keeps rooted for its whole lifetime
#[derive(Debug, Clone, Copy)]
pub(crate) struct GlobalSlots {
    pub(crate) undefined: GcRef,
    pub(crate) null: GcRef,
    pub(crate) true_value: GcRef,
    pub(crate) false_value: GcRef,
    pub(crate) empty_string: GcRef,
}

impl GlobalSlots {
    fn roots(&self) -> [GcRef; 5] {
        [
            self.undefined,
            self.null,
            self.true_value,
            self.false_value,
            self.empty_string,
        ]
    }
}

/// One engine VM plus the embedding API's per-isolate state
pub struct IsolateWrap {
    self_ref: Weak<IsolateWrap>,
    state: Cell<IsolateState>,
    vm: OnceCell<VmInstance>,
    allocator: OnceCell<Arc<ArrayBufferAllocatorDecorator>>,
    slots: OnceCell<GlobalSlots>,
    pure_context: OnceCell<GcRef>,
    handle: IsolateHandle,
    global_handles: GlobalHandles,
    eternals: RefCell<Vec<GcRef>>,
    data_slots: RefCell<Vec<*mut c_void>>,
    pub(crate) handle_scopes: RefCell<Vec<Rc<HandleScopeWrap>>>,
    pub(crate) next_scope_id: Cell<u64>,
    pub(crate) contexts: RefCell<Vec<GcRef>>,
    pub(crate) pending_exception: RefCell<Option<JsValue>>,
    pub(crate) scheduled_exception: RefCell<Option<JsValue>>,
    pub(crate) pending_message: RefCell<Option<Rc<Message>>>,
    pub(crate) try_catches: RefCell<Vec<Rc<TryCatchData>>>,
    pub(crate) message_listeners: RefCell<Vec<MessageCallback>>,
    call_depth: Cell<u32>,
}

impl IsolateWrap {
    /// Allocate and initialize
    pub fn new(params: CreateParams) -> Rc<Self> {
        let isolate = Self::allocate();
        isolate.initialize(params);
        isolate
    }

    /// Allocate without a VM
    pub fn allocate() -> Rc<Self> {
        Rc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            state: Cell::new(IsolateState::Uninitialized),
            vm: OnceCell::new(),
            allocator: OnceCell::new(),
            slots: OnceCell::new(),
            pure_context: OnceCell::new(),
            handle: IsolateHandle::default(),
            global_handles: GlobalHandles::new(self_ref.clone()),
            eternals: RefCell::new(Vec::new()),
            data_slots: RefCell::new(Vec::new()),
            handle_scopes: RefCell::new(Vec::new()),
            next_scope_id: Cell::new(1),
            contexts: RefCell::new(Vec::new()),
            pending_exception: RefCell::new(None),
            scheduled_exception: RefCell::new(None),
            pending_message: RefCell::new(None),
            try_catches: RefCell::new(Vec::new()),
            message_listeners: RefCell::new(Vec::new()),
            call_depth: Cell::new(0),
        })
    }

    /// Create the VM, install the allocator, the compile-only context and
    /// the global value slots. Aborts unless the isolate is uninitialized.
    pub fn initialize(&self, params: CreateParams) {
        trace_call!("ISOLATE", ?params, "initialize");
        shim_check!(
            self.state.get() == IsolateState::Uninitialized,
            "isolate initialized twice"
        );

        let config = VmConfig {
            stack_trace_limit: params.stack_trace_limit,
            max_call_depth: params.max_call_depth,
            gc: params.gc,
        };
        let vm = self.vm.get_or_init(|| VmInstance::new(config));

        let inner = params
            .array_buffer_allocator
            .unwrap_or_else(|| Arc::new(DefaultAllocator));
        let _ = self
            .allocator
            .set(Arc::new(ArrayBufferAllocatorDecorator::new(inner)));

        let _ = self.pure_context.set(vm.create_context(None));

        let heap = vm.heap();
        let slot = |value: JsValue| heap.allocate(ValueWrap::create_value(value));
        let _ = self.slots.set(GlobalSlots {
            undefined: slot(JsValue::Undefined),
            null: slot(JsValue::Null),
            true_value: slot(JsValue::Boolean(true)),
            false_value: slot(JsValue::Boolean(false)),
            empty_string: slot(JsValue::string("")),
        });

        self.state.set(IsolateState::Ready);
        tracing::debug!(target: "shim::isolate", "isolate ready");
    }

    /// Lifecycle state
    pub fn state(&self) -> IsolateState {
        self.state.get()
    }

    /// Strong reference to this isolate
    pub fn rc(&self) -> Rc<Self> {
        match self.self_ref.upgrade() {
            Some(isolate) => isolate,
            None => shim_unreachable!("isolate used during its own drop"),
        }
    }

    /// Weak reference to this isolate
    pub fn downgrade(&self) -> Weak<Self> {
        self.self_ref.clone()
    }

    /// The engine VM. Aborts unless the isolate is ready.
    pub fn vm(&self) -> &VmInstance {
        shim_check!(
            self.state.get() == IsolateState::Ready,
            "isolate is {:?}",
            self.state.get()
        );
        match self.vm.get() {
            Some(vm) => vm,
            None => shim_unreachable!("ready isolate without a VM"),
        }
    }

    /// Allocator installed at initialization
    pub fn array_buffer_allocator(&self) -> Arc<ArrayBufferAllocatorDecorator> {
        match self.allocator.get() {
            Some(allocator) => allocator.clone(),
            None => fatal!("isolate has no array buffer allocator"),
        }
    }

    pub(crate) fn slots(&self) -> GlobalSlots {
        match self.slots.get() {
            Some(slots) => *slots,
            None => fatal!("isolate has no global slots"),
        }
    }

    /// Engine context used where no context is entered
    pub(crate) fn pure_context(&self) -> GcRef {
        match self.pure_context.get() {
            Some(ctx) => *ctx,
            None => fatal!("isolate has no pure context"),
        }
    }

    // ---- current isolate ----

    /// Isolate entered on this thread
    pub fn current() -> Option<Rc<Self>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Isolate entered on this thread; aborts when there is none
    pub fn current_or_fatal() -> Rc<Self> {
        match Self::current() {
            Some(isolate) => isolate,
            None => fatal!("no isolate entered on this thread"),
        }
    }

    /// Whether this isolate is entered on this thread
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|c| std::ptr::eq(Rc::as_ptr(c), self))
        })
    }

    /// Make this the current isolate. Entering the current isolate again
    /// is a no-op; entering while another isolate is current aborts.
    pub fn enter(&self) {
        trace_call!("ISOLATE", "enter");
        if self.is_current() {
            return;
        }
        shim_check!(
            Self::current().is_none(),
            "another isolate is entered on this thread"
        );
        let me = self.rc();
        CURRENT.with(|current| *current.borrow_mut() = Some(me));
    }

    /// Leave this isolate. Aborts unless it is current.
    pub fn exit(&self) {
        trace_call!("ISOLATE", "exit");
        shim_check!(self.is_current(), "exiting an isolate that is not current");
        CURRENT.with(|current| current.borrow_mut().take());
    }

    // ---- termination ----

    /// Cross-thread handle
    pub fn thread_safe_handle(&self) -> IsolateHandle {
        self.handle.clone()
    }

    /// Request termination from the isolate thread
    pub fn terminate_execution(&self) {
        self.handle.terminate_execution();
    }

    /// Withdraw a termination request
    pub fn cancel_terminate_execution(&self) {
        self.handle.cancel_terminate_execution();
    }

    /// Whether termination has been requested
    pub fn is_execution_terminating(&self) -> bool {
        self.handle.is_execution_terminating()
    }

    // ---- handles ----

    /// The wrap cell at `r`. Aborts when `r` is stale.
    pub fn value_wrap(&self, r: GcRef) -> Rc<ValueWrap> {
        match self.vm().heap().get::<ValueWrap>(r) {
            Some(wrap) => wrap,
            None => fatal!("handle {r:?} does not refer to a live wrap"),
        }
    }

    /// Allocate `wrap` and record it in the top handle scope
    pub fn new_local<T>(&self, wrap: ValueWrap) -> Local<T> {
        let r = self.vm().heap().allocate(wrap);
        self.add_handle_to_current_scope(r);
        Local::from_wrap(r)
    }

    /// Wrap an engine value in a new local
    pub fn new_value<T>(&self, value: JsValue) -> Local<T> {
        self.new_local(ValueWrap::create_value(value))
    }

    /// Persistent handle table
    pub fn global_handles(&self) -> &GlobalHandles {
        &self.global_handles
    }

    /// Root `wrap` forever; returns its eternal index
    pub fn set_eternal(&self, wrap: GcRef) -> usize {
        let mut eternals = self.eternals.borrow_mut();
        eternals.push(wrap);
        eternals.len() - 1
    }

    /// Wrap stored at eternal `index`
    pub fn get_eternal(&self, index: usize) -> Option<GcRef> {
        self.eternals.borrow().get(index).copied()
    }

    // ---- embedder data ----

    /// Store an embedder pointer in isolate slot `slot`
    pub fn set_data(&self, slot: usize, data: *mut c_void) {
        let mut slots = self.data_slots.borrow_mut();
        if slots.len() <= slot {
            slots.resize(slot + 1, std::ptr::null_mut());
        }
        slots[slot] = data;
    }

    /// Embedder pointer in isolate slot `slot`, null when unset
    pub fn get_data(&self, slot: usize) -> *mut c_void {
        self.data_slots
            .borrow()
            .get(slot)
            .copied()
            .unwrap_or(std::ptr::null_mut())
    }

    // ---- host callback depth ----

    /// Host callbacks currently on the stack
    pub fn call_depth(&self) -> u32 {
        self.call_depth.get()
    }

    pub(crate) fn increment_call_depth(&self) {
        self.call_depth.set(self.call_depth.get() + 1);
    }

    pub(crate) fn decrement_call_depth(&self) {
        self.call_depth.set(self.call_depth.get().saturating_sub(1));
    }

    // ---- collection ----

    fn gather_roots(&self) -> Vec<GcRef> {
        let mut roots = Vec::new();
        for scope in self.handle_scopes.borrow().iter() {
            roots.extend(scope.handles());
        }
        roots.extend(self.global_handles.strong_roots());
        roots.extend(self.eternals.borrow().iter().copied());
        roots.extend(self.contexts.borrow().iter().copied());
        roots.extend(self.slots().roots());
        roots.push(self.pure_context());
        for slot in [&self.pending_exception, &self.scheduled_exception] {
            if let Some(r) = slot.borrow().as_ref().and_then(JsValue::as_object) {
                roots.push(r);
            }
        }
        for handler in self.try_catches.borrow().iter() {
            if let Some(r) = handler.exception_value().and_then(|v| v.as_object()) {
                roots.push(r);
            }
        }
        roots
    }

    /// Full collection. Everything not reachable from a handle scope, a
    /// strong persistent handle, an eternal, an entered context or a
    /// pending exception is reclaimed, and weak callbacks run.
    pub fn collect_garbage(&self) -> CollectStats {
        trace_call!("GC", "collect_garbage");
        let roots = self.gather_roots();
        let stats = self.vm().collect_garbage(&roots);
        if Flags::is_trace_gc_enabled() {
            tracing::info!(
                target: "shim::gc",
                reclaimed = stats.reclaimed,
                live = stats.live,
                weak = self.global_handles.weak_count(),
                "gc"
            );
        }
        stats
    }

    /// Same as a full collection
    pub fn low_memory_notification(&self) {
        self.collect_garbage();
    }

    /// Heap counters
    pub fn get_heap_statistics(&self) -> HeapStats {
        self.vm().heap().stats()
    }

    /// Not supported; logged and ignored
    pub fn set_stack_limit(&self, _limit: usize) {
        api_unimplemented!("Isolate::SetStackLimit", ())
    }

    /// Not supported; returns 0
    pub fn adjust_amount_of_external_allocated_memory(&self, _change: i64) -> i64 {
        api_unimplemented!("Isolate::AdjustAmountOfExternalAllocatedMemory", 0)
    }

    /// Tear down: drop every table and release every engine cell without
    /// running weak callbacks. Aborts while the isolate is entered.
    pub fn dispose(&self) {
        trace_call!("ISOLATE", "dispose");
        shim_check!(!self.is_current(), "disposing an entered isolate");
        if self.state.get() != IsolateState::Ready {
            return;
        }
        self.release();
    }

    fn release(&self) {
        let Some(vm) = self.vm.get() else {
            return;
        };
        if !self.handle_scopes.borrow().is_empty() {
            tracing::warn!(target: "shim::isolate", "disposing with open handle scopes");
        }
        self.global_handles.dispose(vm.heap());
        self.handle_scopes.borrow_mut().clear();
        self.contexts.borrow_mut().clear();
        self.eternals.borrow_mut().clear();
        self.try_catches.borrow_mut().clear();
        self.message_listeners.borrow_mut().clear();
        self.pending_exception.borrow_mut().take();
        self.scheduled_exception.borrow_mut().take();
        self.pending_message.borrow_mut().take();
        let released = vm.heap().dealloc_all();
        self.state.set(IsolateState::Disposed);
        tracing::debug!(target: "shim::isolate", released, "isolate disposed");
    }
}

impl Drop for IsolateWrap {
    fn drop(&mut self) {
        if self.state.get() == IsolateState::Ready {
            self.release();
        }
    }
}

impl std::fmt::Debug for IsolateWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolateWrap")
            .field("state", &self.state.get())
            .field("handle_scopes", &self.handle_scopes.borrow().len())
            .field("contexts", &self.contexts.borrow().len())
            .field("call_depth", &self.call_depth.get())
            .finish()
    }
}

/// Enters an isolate for its lifetime
#[must_use = "the isolate is exited when the scope is dropped"]
pub struct IsolateScope {
    isolate: Rc<IsolateWrap>,
    entered: bool,
}

impl IsolateScope {
    /// Enter `isolate`. A scope opened on the current isolate leaves it
    /// entered on drop.
    pub fn new(isolate: &IsolateWrap) -> Self {
        let entered = !isolate.is_current();
        isolate.enter();
        Self {
            isolate: isolate.rc(),
            entered,
        }
    }
}

impl Drop for IsolateScope {
    fn drop(&mut self) {
        if self.entered {
            self.isolate.exit();
        }
    }
}
