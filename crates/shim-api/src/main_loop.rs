//! Main-loop integration.
//!
//! The host owns the real event loop. This module gives it a per-thread
//! task queue to pump with [`MainLoop::run_once`], a cross-thread
//! [`Waker`], and the process-wide wakeup hook the delayed GC timer uses.

use crate::gc_strategy::GcStrategy;
use crate::isolate::IsolateWrap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

thread_local! {
    static ENABLED: Cell<bool> = const { Cell::new(false) };
}

type WakeupHandler = Arc<dyn Fn() + Send + Sync>;

static WAKEUP_HANDLER: LazyLock<RwLock<Option<WakeupHandler>>> =
    LazyLock::new(|| RwLock::new(None));

/// Mark this thread as running an integrated main loop
pub fn enable() {
    ENABLED.with(|enabled| enabled.set(true));
}

/// Whether [`enable`] ran on this thread
pub fn is_enabled() -> bool {
    ENABLED.with(|enabled| enabled.get())
}

/// Install the hook that wakes the host's main loop
pub fn set_wakeup_mainloop_once_handler(handler: impl Fn() + Send + Sync + 'static) {
    *WAKEUP_HANDLER.write() = Some(Arc::new(handler));
}

/// Remove the wakeup hook
pub fn clear_wakeup_mainloop_once_handler() {
    WAKEUP_HANDLER.write().take();
}

/// Wake the host's main loop once. Callable from any thread; does nothing
/// when no hook is installed.
pub fn wakeup_mainloop_once() {
    let handler = WAKEUP_HANDLER.read().clone();
    match handler {
        Some(handler) => handler(),
        None => tracing::trace!(target: "shim::main_loop", "wakeup without handler"),
    }
}

enum LoopEvent {
    Wake,
    Task(Box<dyn FnOnce() + Send>),
}

/// Cross-thread handle to a [`MainLoop`]
#[derive(Clone)]
pub struct Waker {
    sender: Sender<LoopEvent>,
}

impl Waker {
    /// Wake the loop if it is waiting
    pub fn wake(&self) {
        let _ = self.sender.send(LoopEvent::Wake);
    }

    /// Queue `task` to run on the loop's thread
    pub fn post_task(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.sender.send(LoopEvent::Task(Box::new(task)));
    }
}

impl std::fmt::Debug for Waker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waker").finish_non_exhaustive()
    }
}

/// Task queue and GC hook for one isolate thread
pub struct MainLoop {
    isolate: Rc<IsolateWrap>,
    tasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    sender: Sender<LoopEvent>,
    receiver: Receiver<LoopEvent>,
    gc_strategy: Option<Box<dyn GcStrategy>>,
}

impl MainLoop {
    /// Loop for `isolate`, collecting according to `gc_strategy`
    pub fn new(isolate: &IsolateWrap, gc_strategy: Option<Box<dyn GcStrategy>>) -> Self {
        enable();
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            isolate: isolate.rc(),
            tasks: RefCell::new(VecDeque::new()),
            sender,
            receiver,
            gc_strategy,
        }
    }

    /// Cross-thread handle
    pub fn waker(&self) -> Waker {
        Waker {
            sender: self.sender.clone(),
        }
    }

    /// Queue `task` from the loop's own thread
    pub fn post_task(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    fn drain_events(&self) {
        for event in self.receiver.try_iter() {
            if let LoopEvent::Task(task) = event {
                self.tasks.borrow_mut().push_back(task);
            }
        }
    }

    /// Whether tasks are queued
    pub fn has_more_tasks(&self) -> bool {
        self.drain_events();
        !self.tasks.borrow().is_empty()
    }

    /// Run the tasks queued so far, then the GC hook. Returns whether
    /// more tasks are waiting.
    pub fn run_once(&self) -> bool {
        self.drain_events();
        let batch: Vec<_> = self.tasks.borrow_mut().drain(..).collect();
        tracing::trace!(target: "shim::main_loop", tasks = batch.len(), "run_once");
        for task in batch {
            task();
        }
        self.on_prepare();
        self.has_more_tasks()
    }

    /// GC hook; runs before the loop blocks
    pub fn on_prepare(&self) {
        if let Some(strategy) = &self.gc_strategy {
            strategy.handle(&self.isolate);
        }
    }

    /// Block until woken, a task arrives, or `timeout` passes. Returns
    /// false on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(LoopEvent::Task(task)) => {
                self.tasks.borrow_mut().push_back(task);
                true
            }
            Ok(LoopEvent::Wake) => true,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("tasks", &self.tasks.borrow().len())
            .field("has_gc_strategy", &self.gc_strategy.is_some())
            .finish()
    }
}
