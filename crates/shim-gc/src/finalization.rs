//! Finalizer registrations keyed by cell.
//!
//! A finalizer does not keep its cell alive. When a sweep reclaims the cell,
//! its finalizers are moved out of the table and handed back to the heap,
//! which runs them once the sweep is complete.

use crate::object::GcRef;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;

/// Callback run when its cell is reclaimed
pub type Finalizer = Box<dyn FnOnce(GcRef)>;

/// Handle returned by [`crate::Heap::register_finalizer`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizerId(u64);

struct Registration {
    id: FinalizerId,
    callback: Finalizer,
}

/// Per-heap finalizer table
pub(crate) struct FinalizerTable {
    entries: RefCell<FxHashMap<GcRef, Vec<Registration>>>,
    next_id: Cell<u64>,
}

impl FinalizerTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(FxHashMap::default()),
            next_id: Cell::new(1),
        }
    }

    pub(crate) fn register(&self, target: GcRef, callback: Finalizer) -> FinalizerId {
        let id = FinalizerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries
            .borrow_mut()
            .entry(target)
            .or_default()
            .push(Registration { id, callback });
        id
    }

    /// Returns true if the registration existed.
    pub(crate) fn unregister(&self, target: GcRef, id: FinalizerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(list) = entries.get_mut(&target) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            entries.remove(&target);
        }
        removed
    }

    pub(crate) fn count_for(&self, target: GcRef) -> usize {
        self.entries.borrow().get(&target).map_or(0, Vec::len)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().values().map(Vec::len).sum()
    }

    /// Moves the finalizers of every dead cell out of the table, in
    /// registration order per cell.
    pub(crate) fn take_dead(&self, dead: &[GcRef]) -> Vec<(GcRef, Finalizer)> {
        let mut entries = self.entries.borrow_mut();
        let mut out = Vec::new();
        for target in dead {
            if let Some(list) = entries.remove(target) {
                out.extend(list.into_iter().map(|r| (*target, r.callback)));
            }
        }
        out
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl fmt::Debug for FinalizerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerTable")
            .field("registrations", &self.len())
            .finish()
    }
}
