//! Realms

use crate::error::ErrorKind;
use shim_gc::{GcRef, GcTraceable};
use std::cell::Cell;

/// A realm: global object plus the intrinsic prototypes the VM needs.
#[derive(Debug)]
pub struct Context {
    id: u64,
    global: Cell<GcRef>,
    object_prototype: GcRef,
    function_prototype: GcRef,
    array_buffer_prototype: GcRef,
    error_prototypes: [GcRef; ErrorKind::ALL.len()],
}

impl Context {
    pub(crate) fn new(
        id: u64,
        global: GcRef,
        object_prototype: GcRef,
        function_prototype: GcRef,
        array_buffer_prototype: GcRef,
        error_prototypes: [GcRef; ErrorKind::ALL.len()],
    ) -> Self {
        Self {
            id,
            global: Cell::new(global),
            object_prototype,
            function_prototype,
            array_buffer_prototype,
            error_prototypes,
        }
    }

    /// Unique id within the VM
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Global object
    pub fn global(&self) -> GcRef {
        self.global.get()
    }

    pub(crate) fn set_global(&self, global: GcRef) {
        self.global.set(global);
    }

    /// `Object.prototype`
    pub fn object_prototype(&self) -> GcRef {
        self.object_prototype
    }

    /// `Function.prototype`
    pub fn function_prototype(&self) -> GcRef {
        self.function_prototype
    }

    /// `ArrayBuffer.prototype`
    pub fn array_buffer_prototype(&self) -> GcRef {
        self.array_buffer_prototype
    }

    /// Prototype of the given native error constructor
    pub fn error_prototype(&self, kind: ErrorKind) -> GcRef {
        self.error_prototypes[kind as usize]
    }
}

impl GcTraceable for Context {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        tracer(self.global.get());
        tracer(self.object_prototype);
        tracer(self.function_prototype);
        tracer(self.array_buffer_prototype);
        for proto in self.error_prototypes {
            tracer(proto);
        }
    }
}
