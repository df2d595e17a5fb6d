//! GC correctness tests
//!
//! These tests verify that the explicit-root mark/sweep heap reclaims
//! unreachable cells and runs finalizers at the right time.

use shim_gc::{GcRef, GcTraceable, Heap};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Simple test object for GC testing
struct TestObject {
    value: i32,
    /// Optional reference to another cell
    reference: Cell<Option<GcRef>>,
}

impl TestObject {
    fn new(value: i32) -> Self {
        Self {
            value,
            reference: Cell::new(None),
        }
    }
}

impl GcTraceable for TestObject {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        if let Some(r) = self.reference.get() {
            tracer(r);
        }
    }
}

#[test]
fn test_collect_simple_garbage() {
    let heap = Heap::new();
    heap.allocate(TestObject::new(42));
    assert_eq!(heap.allocation_count(), 1);

    let stats = heap.collect(&[]);

    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.live, 0);
    assert_eq!(heap.allocation_count(), 0);
}

#[test]
fn test_rooted_object_survives() {
    let heap = Heap::new();
    let root = heap.allocate(TestObject::new(7));

    let stats = heap.collect(&[root]);

    assert_eq!(stats.reclaimed, 0);
    assert_eq!(heap.get::<TestObject>(root).map(|o| o.value), Some(7));
}

#[test]
fn test_reachable_through_trace_survives() {
    let heap = Heap::new();
    let root = heap.allocate(TestObject::new(1));
    let child = heap.allocate(TestObject::new(2));
    let orphan = heap.allocate(TestObject::new(3));
    heap.get::<TestObject>(root)
        .unwrap()
        .reference
        .set(Some(child));

    let stats = heap.collect(&[root]);

    assert_eq!(stats.reclaimed, 1);
    assert!(heap.is_alive(child));
    assert!(!heap.is_alive(orphan));
}

#[test]
fn test_circular_references_collected() {
    let heap = Heap::new();
    let a = heap.allocate(TestObject::new(1));
    let b = heap.allocate(TestObject::new(2));
    heap.get::<TestObject>(a).unwrap().reference.set(Some(b));
    heap.get::<TestObject>(b).unwrap().reference.set(Some(a));

    let stats = heap.collect(&[]);

    assert_eq!(stats.reclaimed, 2);
    assert_eq!(heap.allocation_count(), 0);
}

#[test]
fn test_finalizer_runs_only_when_reclaimed() {
    let heap = Heap::new();
    let target = heap.allocate(TestObject::new(5));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    heap.register_finalizer(target, move |r| sink.borrow_mut().push(r))
        .expect("live target");

    heap.collect(&[target]);
    assert!(seen.borrow().is_empty());

    let stats = heap.collect(&[]);
    assert_eq!(stats.finalized, 1);
    assert_eq!(*seen.borrow(), vec![target]);
    assert_eq!(heap.finalizer_count(target), 0);
}

#[test]
fn test_unregistered_finalizer_does_not_run() {
    let heap = Heap::new();
    let target = heap.allocate(TestObject::new(5));
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    let id = heap
        .register_finalizer(target, move |_| counter.set(counter.get() + 1))
        .expect("live target");

    assert!(heap.unregister_finalizer(target, id));
    heap.collect(&[]);

    assert_eq!(hits.get(), 0);
}

#[test]
fn test_finalizer_sees_cell_already_unreachable() {
    let heap = Rc::new(Heap::new());
    let target = heap.allocate(TestObject::new(9));
    let observed = Rc::new(Cell::new(true));
    let (h, o) = (heap.clone(), observed.clone());
    heap.register_finalizer(target, move |r| o.set(h.is_alive(r)));

    heap.collect(&[]);

    assert!(!observed.get());
}

#[test]
fn test_nested_collect_from_finalizer_is_skipped() {
    let heap = Rc::new(Heap::new());
    let target = heap.allocate(TestObject::new(1));
    let nested = Rc::new(Cell::new(None));
    let (h, n) = (heap.clone(), nested.clone());
    heap.register_finalizer(target, move |_| n.set(Some(h.collect(&[]))));

    heap.collect(&[]);

    assert_eq!(nested.get(), Some(Default::default()));
    assert_eq!(heap.stats().collection_count, 1);
}

#[test]
fn test_register_finalizer_on_dead_ref_fails() {
    let heap = Heap::new();
    let target = heap.allocate(TestObject::new(1));
    heap.collect(&[]);
    assert!(heap.register_finalizer(target, |_| {}).is_none());
}

#[test]
fn test_dealloc_all_skips_finalizers() {
    let heap = Heap::new();
    let target = heap.allocate(TestObject::new(1));
    let hits = Rc::new(Cell::new(0));
    let counter = hits.clone();
    heap.register_finalizer(target, move |_| counter.set(counter.get() + 1));

    assert_eq!(heap.dealloc_all(), 1);
    assert_eq!(hits.get(), 0);
    assert_eq!(heap.allocation_count(), 0);
}
