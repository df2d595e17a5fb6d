//! Heap of traced cells with explicit-root mark/sweep.

use crate::finalization::{FinalizerId, FinalizerTable};
use crate::object::{GcRef, MarkColor};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Trait for values stored in the heap.
///
/// `trace` reports every cell this value keeps alive. Values that hold no
/// references keep the default empty implementation.
pub trait GcTraceable: 'static {
    /// Report outgoing references
    fn trace(&self, _tracer: &mut dyn FnMut(GcRef)) {}
}

/// Object-safe view of a cell, adding `Any` conversion for typed reads.
trait GcCell: GcTraceable {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
    fn type_name(&self) -> &'static str;
}

impl<T: GcTraceable> GcCell for T {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Heap configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Slots reserved up front (default: 1024)
    pub initial_capacity: usize,
    /// Allocations since the last collection after which
    /// [`Heap::should_gc`] reports true (default: 10_000)
    pub gc_threshold: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            gc_threshold: 10_000,
        }
    }
}

/// Result of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Cells reclaimed by the sweep
    pub reclaimed: usize,
    /// Finalizers invoked after the sweep
    pub finalized: usize,
    /// Cells still live after the sweep
    pub live: usize,
}

/// Cumulative heap statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    /// Live cells
    pub allocation_count: usize,
    /// Cells allocated over the heap lifetime
    pub total_allocated: usize,
    /// Completed collections
    pub collection_count: usize,
    /// Cells reclaimed by the last collection
    pub last_reclaimed: usize,
    /// Sum of all pause times
    pub total_pause_time: Duration,
}

struct Slot {
    generation: u32,
    mark: MarkColor,
    cell: Option<Rc<dyn GcCell>>,
}

/// Single-threaded heap.
///
/// The heap never collects implicitly; [`Heap::collect`] is the only entry
/// to a collection and must be given every root the caller knows about.
pub struct Heap {
    config: GcConfig,
    slots: RefCell<Vec<Slot>>,
    free: RefCell<Vec<u32>>,
    finalizers: FinalizerTable,
    collecting: Cell<bool>,
    live: Cell<usize>,
    since_last_gc: Cell<usize>,
    total_allocated: Cell<usize>,
    collection_count: Cell<usize>,
    last_reclaimed: Cell<usize>,
    total_pause: Cell<Duration>,
}

impl Heap {
    /// Create a heap with default config
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create a heap with custom config
    pub fn with_config(config: GcConfig) -> Self {
        Self {
            slots: RefCell::new(Vec::with_capacity(config.initial_capacity)),
            free: RefCell::new(Vec::new()),
            finalizers: FinalizerTable::new(),
            collecting: Cell::new(false),
            live: Cell::new(0),
            since_last_gc: Cell::new(0),
            total_allocated: Cell::new(0),
            collection_count: Cell::new(0),
            last_reclaimed: Cell::new(0),
            total_pause: Cell::new(Duration::ZERO),
            config,
        }
    }

    /// Get config
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Move `value` into a new cell
    pub fn allocate<T: GcTraceable>(&self, value: T) -> GcRef {
        let cell: Rc<dyn GcCell> = Rc::new(value);
        let mut slots = self.slots.borrow_mut();
        let r = match self.free.borrow_mut().pop() {
            Some(index) => {
                let slot = &mut slots[index as usize];
                slot.cell = Some(cell);
                slot.mark = MarkColor::White;
                GcRef::new(index, slot.generation)
            }
            None => {
                let index = slots.len() as u32;
                slots.push(Slot {
                    generation: 0,
                    mark: MarkColor::White,
                    cell: Some(cell),
                });
                GcRef::new(index, 0)
            }
        };
        self.live.set(self.live.get() + 1);
        self.since_last_gc.set(self.since_last_gc.get() + 1);
        self.total_allocated.set(self.total_allocated.get() + 1);
        r
    }

    fn cell(&self, r: GcRef) -> Option<Rc<dyn GcCell>> {
        let slots = self.slots.borrow();
        let slot = slots.get(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        slot.cell.clone()
    }

    /// Typed read of a cell. `None` if the cell was reclaimed or holds
    /// another type.
    pub fn get<T: GcTraceable>(&self, r: GcRef) -> Option<Rc<T>> {
        self.cell(r)?.into_any().downcast::<T>().ok()
    }

    /// Whether `r` still resolves to a live cell
    pub fn is_alive(&self, r: GcRef) -> bool {
        self.cell(r).is_some()
    }

    /// Type name of the value stored at `r`, for diagnostics
    pub fn type_name(&self, r: GcRef) -> Option<&'static str> {
        self.cell(r).map(|c| c.type_name())
    }

    /// Live cell count
    pub fn allocation_count(&self) -> usize {
        self.live.get()
    }

    /// Whether enough allocations happened since the last collection
    pub fn should_gc(&self) -> bool {
        self.since_last_gc.get() >= self.config.gc_threshold
    }

    /// Whether a collection is running on this heap
    pub fn is_collecting(&self) -> bool {
        self.collecting.get()
    }

    /// Cumulative statistics
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocation_count: self.live.get(),
            total_allocated: self.total_allocated.get(),
            collection_count: self.collection_count.get(),
            last_reclaimed: self.last_reclaimed.get(),
            total_pause_time: self.total_pause.get(),
        }
    }

    /// Register `callback` to run once `target` is reclaimed.
    ///
    /// Returns `None` if `target` is not a live cell.
    pub fn register_finalizer(
        &self,
        target: GcRef,
        callback: impl FnOnce(GcRef) + 'static,
    ) -> Option<FinalizerId> {
        if !self.is_alive(target) {
            return None;
        }
        Some(self.finalizers.register(target, Box::new(callback)))
    }

    /// Drop a registration made by [`Heap::register_finalizer`]
    pub fn unregister_finalizer(&self, target: GcRef, id: FinalizerId) -> bool {
        self.finalizers.unregister(target, id)
    }

    /// Finalizers currently registered for `target`
    pub fn finalizer_count(&self, target: GcRef) -> usize {
        self.finalizers.count_for(target)
    }

    /// Perform a full mark/sweep collection.
    ///
    /// Everything not reachable from `roots` is reclaimed. Finalizers of
    /// reclaimed cells run after the sweep; the cells themselves are dropped
    /// after their finalizers. A collection requested from inside a
    /// finalizer is skipped.
    pub fn collect(&self, roots: &[GcRef]) -> CollectStats {
        if self.collecting.replace(true) {
            #[cfg(feature = "gc_logging")]
            tracing::debug!(target: "shim::gc", "nested collection skipped");
            return CollectStats::default();
        }
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "shim::gc",
            roots = roots.len(),
            objects = self.live.get(),
            "GC cycle starting"
        );

        // Phase 1: Reset all marks to white
        for slot in self.slots.borrow_mut().iter_mut() {
            slot.mark = MarkColor::White;
        }

        // Phase 2: Mark from roots
        self.mark(roots);

        // Phase 3: Sweep unmarked cells
        let (dead_refs, dead_cells) = self.sweep();
        let reclaimed = dead_refs.len();

        // Phase 4: Finalize, then release the cell memory
        let pending = self.finalizers.take_dead(&dead_refs);
        let finalized = pending.len();
        for (target, callback) in pending {
            callback(target);
        }
        drop(dead_cells);

        let elapsed = start.elapsed();
        self.collection_count.set(self.collection_count.get() + 1);
        self.last_reclaimed.set(reclaimed);
        self.total_pause.set(self.total_pause.get() + elapsed);
        self.since_last_gc.set(0);
        self.collecting.set(false);

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "shim::gc",
            collection = self.collection_count.get(),
            reclaimed,
            finalized,
            pause_us = elapsed.as_micros() as u64,
            live_objects = self.live.get(),
            "GC cycle complete"
        );

        CollectStats {
            reclaimed,
            finalized,
            live: self.live.get(),
        }
    }

    fn mark(&self, roots: &[GcRef]) {
        let mut worklist: Vec<GcRef> = roots.to_vec();
        while let Some(r) = worklist.pop() {
            let cell = {
                let mut slots = self.slots.borrow_mut();
                let Some(slot) = slots.get_mut(r.index() as usize) else {
                    continue;
                };
                if slot.generation != r.generation() || slot.mark == MarkColor::Black {
                    continue;
                }
                let Some(cell) = slot.cell.clone() else {
                    continue;
                };
                slot.mark = MarkColor::Black;
                cell
            };
            // Slots are not borrowed while tracing
            cell.trace(&mut |child| worklist.push(child));
        }
    }

    fn sweep(&self) -> (Vec<GcRef>, Vec<Rc<dyn GcCell>>) {
        let mut slots = self.slots.borrow_mut();
        let mut free = self.free.borrow_mut();
        let mut dead_refs = Vec::new();
        let mut dead_cells = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.mark != MarkColor::White {
                continue;
            }
            if let Some(cell) = slot.cell.take() {
                dead_refs.push(GcRef::new(index as u32, slot.generation));
                dead_cells.push(cell);
                slot.generation = slot.generation.wrapping_add(1);
                free.push(index as u32);
            }
        }
        self.live.set(self.live.get() - dead_refs.len());
        (dead_refs, dead_cells)
    }

    /// Drop every cell without running finalizers. Returns the number of
    /// cells released.
    pub fn dealloc_all(&self) -> usize {
        self.finalizers.clear();
        let cells: Vec<Rc<dyn GcCell>> = {
            let mut slots = self.slots.borrow_mut();
            let mut free = self.free.borrow_mut();
            let mut out = Vec::new();
            for (index, slot) in slots.iter_mut().enumerate() {
                if let Some(cell) = slot.cell.take() {
                    out.push(cell);
                    slot.generation = slot.generation.wrapping_add(1);
                    free.push(index as u32);
                }
            }
            out
        };
        let released = cells.len();
        self.live.set(0);
        drop(cells);
        released
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.live.get())
            .field("finalizers", &self.finalizers)
            .field("collections", &self.collection_count.get())
            .finish()
    }
}

impl GcTraceable for () {}
impl GcTraceable for bool {}
impl GcTraceable for i32 {}
impl GcTraceable for i64 {}
impl GcTraceable for f64 {}
impl GcTraceable for String {}

impl GcTraceable for GcRef {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        tracer(*self);
    }
}

impl<T: GcTraceable> GcTraceable for Vec<T> {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        for item in self {
            item.trace(tracer);
        }
    }
}

impl<T: GcTraceable> GcTraceable for Option<T> {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        if let Some(item) = self {
            item.trace(tracer);
        }
    }
}

impl<T: GcTraceable> GcTraceable for RefCell<T> {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        self.borrow().trace(tracer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_creation() {
        let heap = Heap::new();
        assert_eq!(heap.allocation_count(), 0);
        assert!(!heap.should_gc());
    }

    #[test]
    fn test_typed_read() {
        let heap = Heap::new();
        let r = heap.allocate(42i32);
        assert_eq!(heap.get::<i32>(r).as_deref(), Some(&42));
        assert!(heap.get::<String>(r).is_none());
        assert_eq!(heap.type_name(r), Some("i32"));
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let heap = Heap::new();
        let first = heap.allocate(1i32);
        heap.collect(&[]);
        let second = heap.allocate(2i32);
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(heap.get::<i32>(first).is_none());
        assert_eq!(heap.get::<i32>(second).as_deref(), Some(&2));
    }

    #[test]
    fn test_should_gc_threshold() {
        let heap = Heap::with_config(GcConfig {
            initial_capacity: 4,
            gc_threshold: 2,
        });
        heap.allocate(1i32);
        assert!(!heap.should_gc());
        heap.allocate(2i32);
        assert!(heap.should_gc());
        heap.collect(&[]);
        assert!(!heap.should_gc());
    }
}
