//! Persistent handle bookkeeping.
//!
//! A wrap tracked here is either strong (a counted GC root) or weak (a
//! node block whose finalizer fires when the collector reclaims the wrap),
//! never both.
//!
//! ```text
//! Untracked --create--> Strong(1) --create--> Strong(n+1)
//! Strong(n) --destroy--> Strong(n-1) | Untracked
//! Strong(n) --make_weak--> Weak(n) --clear_weakness--> Strong(n)
//! Weak(n) --collector reclaims wrap--> callback --> Untracked
//! ```

use crate::isolate::IsolateWrap;
use rustc_hash::FxHashMap;
use shim_gc::{FinalizerId, GcRef, Heap};
use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::{Rc, Weak};

/// Host callback for a reclaimed weak handle
pub type WeakCallback = fn(&WeakCallbackInfo);

/// Arguments of a [`WeakCallback`]
#[derive(Debug)]
pub struct WeakCallbackInfo {
    isolate: Weak<IsolateWrap>,
    parameter: *mut c_void,
    embedder_fields: [*mut c_void; 2],
}

impl WeakCallbackInfo {
    /// Owning isolate, unless it is already gone
    pub fn get_isolate(&self) -> Option<Rc<IsolateWrap>> {
        self.isolate.upgrade()
    }

    /// Pointer given to `make_weak`
    pub fn get_parameter(&self) -> *mut c_void {
        self.parameter
    }

    /// Embedder field `index` (0 or 1); always null here
    pub fn get_internal_field(&self, index: usize) -> *mut c_void {
        self.embedder_fields
            .get(index)
            .copied()
            .unwrap_or(std::ptr::null_mut())
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    parameter: *mut c_void,
    callback: WeakCallback,
}

#[derive(Debug)]
struct NodeBlock {
    usage_count: usize,
    node: Node,
    finalizer: FinalizerId,
}

#[derive(Debug, Default)]
struct WeakHandler {
    blocks: RefCell<FxHashMap<GcRef, NodeBlock>>,
}

/// Tracking state of one wrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalHandleState {
    /// Not a persistent handle
    Untracked,
    /// Rooted, with this many registrations
    Strong(usize),
    /// Finalizer pending, with this many registrations
    Weak(usize),
}

/// Strong and weak persistent handle tables of one isolate
#[derive(Debug)]
pub struct GlobalHandles {
    isolate: Weak<IsolateWrap>,
    strong: RefCell<FxHashMap<GcRef, usize>>,
    weak: Rc<WeakHandler>,
}

impl GlobalHandles {
    /// Empty tables
    pub fn new(isolate: Weak<IsolateWrap>) -> Self {
        Self {
            isolate,
            strong: RefCell::new(FxHashMap::default()),
            weak: Rc::new(WeakHandler::default()),
        }
    }

    /// Register one more persistent handle on `wrap`
    pub fn create(&self, wrap: GcRef) {
        trace_call!("GLOBAL", ?wrap, "create");
        if let Some(block) = self.weak.blocks.borrow_mut().get_mut(&wrap) {
            block.usage_count += 1;
            tracing::warn!(
                target: "shim::global",
                ?wrap,
                count = block.usage_count,
                "persistent created on a weak handle"
            );
            return;
        }
        let mut strong = self.strong.borrow_mut();
        let count = strong.entry(wrap).or_insert(0);
        *count += 1;
        if *count > 1 {
            tracing::warn!(
                target: "shim::global",
                ?wrap,
                count = *count,
                "possible multiple persistent registration"
            );
        }
    }

    /// Drop one registration. False when `wrap` is untracked.
    pub fn destroy(&self, heap: &Heap, wrap: GcRef) -> bool {
        trace_call!("GLOBAL", ?wrap, "destroy");
        {
            let mut strong = self.strong.borrow_mut();
            if let Some(count) = strong.get_mut(&wrap) {
                *count -= 1;
                if *count == 0 {
                    strong.remove(&wrap);
                }
                return true;
            }
        }

        let mut blocks = self.weak.blocks.borrow_mut();
        let Some(block) = blocks.get_mut(&wrap) else {
            return false;
        };
        block.usage_count -= 1;
        if block.usage_count == 0 {
            let finalizer = block.finalizer;
            blocks.remove(&wrap);
            heap.unregister_finalizer(wrap, finalizer);
        }
        true
    }

    /// Turn a strong entry weak. False when `wrap` is untracked, already
    /// weak, or no longer a live cell.
    pub fn make_weak(
        &self,
        heap: &Heap,
        wrap: GcRef,
        parameter: *mut c_void,
        callback: WeakCallback,
    ) -> bool {
        trace_call!("GLOBAL", ?wrap, "make_weak");
        let Some(count) = self.strong.borrow().get(&wrap).copied() else {
            return false;
        };

        let handler = Rc::downgrade(&self.weak);
        let isolate = self.isolate.clone();
        let finalizer = heap.register_finalizer(wrap, move |target| {
            let Some(handler) = handler.upgrade() else {
                return;
            };
            let Some(block) = handler.blocks.borrow_mut().remove(&target) else {
                return;
            };
            let info = WeakCallbackInfo {
                isolate,
                parameter: block.node.parameter,
                embedder_fields: [std::ptr::null_mut(); 2],
            };
            (block.node.callback)(&info);
        });
        let Some(finalizer) = finalizer else {
            return false;
        };

        self.strong.borrow_mut().remove(&wrap);
        self.weak.blocks.borrow_mut().insert(
            wrap,
            NodeBlock {
                usage_count: count,
                node: Node {
                    parameter,
                    callback,
                },
                finalizer,
            },
        );
        true
    }

    /// Turn a weak entry strong again, keeping its count. Returns the
    /// parameter given to `make_weak`, or `None` when `wrap` is not weak.
    pub fn clear_weakness(&self, heap: &Heap, wrap: GcRef) -> Option<*mut c_void> {
        trace_call!("GLOBAL", ?wrap, "clear_weakness");
        let block = self.weak.blocks.borrow_mut().remove(&wrap)?;
        heap.unregister_finalizer(wrap, block.finalizer);
        self.strong.borrow_mut().insert(wrap, block.usage_count);
        Some(block.node.parameter)
    }

    /// Current state of `wrap`
    pub fn state(&self, wrap: GcRef) -> GlobalHandleState {
        if let Some(count) = self.strong.borrow().get(&wrap) {
            return GlobalHandleState::Strong(*count);
        }
        match self.weak.blocks.borrow().get(&wrap) {
            Some(block) => GlobalHandleState::Weak(block.usage_count),
            None => GlobalHandleState::Untracked,
        }
    }

    /// Whether `wrap` is weak
    pub fn is_weak(&self, wrap: GcRef) -> bool {
        self.weak.blocks.borrow().contains_key(&wrap)
    }

    /// Number of strongly held wraps
    pub fn handles_count(&self) -> usize {
        self.strong.borrow().len()
    }

    /// Number of weakly held wraps
    pub fn weak_count(&self) -> usize {
        self.weak.blocks.borrow().len()
    }

    /// Strong wraps, for the root set
    pub fn strong_roots(&self) -> Vec<GcRef> {
        self.strong.borrow().keys().copied().collect()
    }

    /// Forget every handle without running weak callbacks
    pub fn dispose(&self, heap: &Heap) {
        self.strong.borrow_mut().clear();
        let blocks = std::mem::take(&mut *self.weak.blocks.borrow_mut());
        for (wrap, block) in blocks {
            heap.unregister_finalizer(wrap, block.finalizer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &WeakCallbackInfo) {}

    #[test]
    fn test_weak_requires_strong() {
        let heap = Heap::new();
        let handles = GlobalHandles::new(Weak::new());
        let wrap = heap.allocate(1i32);
        assert!(!handles.make_weak(&heap, wrap, std::ptr::null_mut(), noop));
        handles.create(wrap);
        assert!(handles.make_weak(&heap, wrap, std::ptr::null_mut(), noop));
        assert!(!handles.make_weak(&heap, wrap, std::ptr::null_mut(), noop));
        assert_eq!(heap.finalizer_count(wrap), 1);
    }

    #[test]
    fn test_dispose_unregisters_finalizers() {
        let heap = Heap::new();
        let handles = GlobalHandles::new(Weak::new());
        let wrap = heap.allocate(1i32);
        handles.create(wrap);
        handles.make_weak(&heap, wrap, std::ptr::null_mut(), noop);
        handles.dispose(&heap);
        assert_eq!(heap.finalizer_count(wrap), 0);
        assert_eq!(handles.state(wrap), GlobalHandleState::Untracked);
    }
}
