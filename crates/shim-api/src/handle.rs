//! Handle wraps.
//!
//! Every handle the embedder sees points at a [`ValueWrap`] cell in the
//! engine heap. A wrap references exactly one thing (an engine value, a
//! context, a script or a template) and never owns the referent's lifetime;
//! the collector decides that through ordinary tracing.

use shim_gc::{GcRef, GcTraceable};
use shim_vm::{ExtraSlot, Value as JsValue};
use std::cell::RefCell;
use std::rc::Rc;

/// What a wrap refers to.
///
/// Kinds ordered at or above [`HandleKind::ExtraDataPresent`] may carry
/// per-handle extra data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HandleKind {
    /// A [`crate::context::ContextWrap`] cell
    Context = 0,
    /// An engine object template
    ObjectTemplate = 1,
    /// An engine function template
    FunctionTemplate = 2,
    /// Boundary: kinds from here on accept extra data
    ExtraDataPresent = 3,
    /// An engine value
    JsValue = 4,
    /// A compiled script
    Script = 5,
    /// Boundary: nothing valid from here on
    NotPresent = 6,
}

#[derive(Debug, Clone)]
enum HolderPtr {
    Value(JsValue),
    Cell(GcRef),
}

impl HolderPtr {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        match self {
            HolderPtr::Value(v) => v.trace(tracer),
            HolderPtr::Cell(r) => tracer(*r),
        }
    }
}

enum Holder {
    Plain(HolderPtr),
    Extended {
        holder: HolderPtr,
        extra: Vec<Rc<dyn ExtraSlot>>,
    },
}

impl Holder {
    fn ptr(&self) -> &HolderPtr {
        match self {
            Holder::Plain(ptr) | Holder::Extended { holder: ptr, .. } => ptr,
        }
    }
}

/// The heap cell behind every handle
pub struct ValueWrap {
    kind: HandleKind,
    holder: RefCell<Holder>,
}

impl ValueWrap {
    fn new(kind: HandleKind, ptr: HolderPtr) -> Self {
        Self {
            kind,
            holder: RefCell::new(Holder::Plain(ptr)),
        }
    }

    /// Wrap an engine value
    pub fn create_value(value: JsValue) -> Self {
        Self::new(HandleKind::JsValue, HolderPtr::Value(value))
    }

    /// Wrap a context cell
    pub fn create_context(context: GcRef) -> Self {
        Self::new(HandleKind::Context, HolderPtr::Cell(context))
    }

    /// Wrap a script cell
    pub fn create_script(script: GcRef) -> Self {
        Self::new(HandleKind::Script, HolderPtr::Cell(script))
    }

    /// Wrap an engine function template
    pub fn create_function_template(ftpl: GcRef) -> Self {
        Self::new(HandleKind::FunctionTemplate, HolderPtr::Cell(ftpl))
    }

    /// Wrap an engine object template
    pub fn create_object_template(otpl: GcRef) -> Self {
        Self::new(HandleKind::ObjectTemplate, HolderPtr::Cell(otpl))
    }

    /// Kind tag
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Whether the tag names a real referent
    pub fn is_valid(&self) -> bool {
        self.kind < HandleKind::NotPresent
    }

    fn cell(&self, expected: HandleKind) -> GcRef {
        if self.kind != expected {
            fatal!("handle kind mismatch: expected {expected:?}, found {:?}", self.kind);
        }
        match self.holder.borrow().ptr() {
            HolderPtr::Cell(r) => *r,
            HolderPtr::Value(_) => shim_unreachable!("{expected:?} wrap holds a value"),
        }
    }

    /// The engine value. Aborts unless this is a value wrap.
    pub fn value(&self) -> JsValue {
        if self.kind != HandleKind::JsValue {
            fatal!("handle kind mismatch: expected JsValue, found {:?}", self.kind);
        }
        match self.holder.borrow().ptr() {
            HolderPtr::Value(v) => v.clone(),
            HolderPtr::Cell(_) => shim_unreachable!("value wrap holds a cell"),
        }
    }

    /// The context cell. Aborts unless this is a context wrap.
    pub fn context(&self) -> GcRef {
        self.cell(HandleKind::Context)
    }

    /// The script cell. Aborts unless this is a script wrap.
    pub fn script(&self) -> GcRef {
        self.cell(HandleKind::Script)
    }

    /// The engine function template. Aborts unless this is one.
    pub fn ftpl(&self) -> GcRef {
        self.cell(HandleKind::FunctionTemplate)
    }

    /// The engine object template. Aborts unless this is one.
    pub fn otpl(&self) -> GcRef {
        self.cell(HandleKind::ObjectTemplate)
    }

    /// Attach per-handle extra data, replacing any previous extra.
    ///
    /// Aborts for kinds below [`HandleKind::ExtraDataPresent`].
    pub fn set_extra(&self, extra: Vec<Rc<dyn ExtraSlot>>) {
        shim_check!(
            self.kind >= HandleKind::ExtraDataPresent,
            "{:?} handles cannot carry extra data",
            self.kind
        );
        let mut holder = self.holder.borrow_mut();
        let ptr = holder.ptr().clone();
        *holder = Holder::Extended { holder: ptr, extra };
    }

    /// Typed read of extra slot `index`
    pub fn get_extra<E: 'static>(&self, index: usize) -> Option<Rc<E>> {
        match &*self.holder.borrow() {
            Holder::Extended { extra, .. } => extra
                .get(index)
                .cloned()
                .and_then(|slot| slot.into_any().downcast::<E>().ok()),
            Holder::Plain(_) => None,
        }
    }

    /// Number of extra slots
    pub fn extra_len(&self) -> usize {
        match &*self.holder.borrow() {
            Holder::Extended { extra, .. } => extra.len(),
            Holder::Plain(_) => 0,
        }
    }
}

impl GcTraceable for ValueWrap {
    fn trace(&self, tracer: &mut dyn FnMut(GcRef)) {
        let holder = self.holder.borrow();
        holder.ptr().trace(tracer);
        if let Holder::Extended { extra, .. } = &*holder {
            for slot in extra {
                slot.trace(tracer);
            }
        }
    }
}

impl std::fmt::Debug for ValueWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueWrap")
            .field("kind", &self.kind)
            .field("holder", self.holder.borrow().ptr())
            .field("extra", &self.extra_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Note(&'static str);
    impl GcTraceable for Note {}

    #[test]
    fn test_kind_order() {
        assert!(HandleKind::Context < HandleKind::ExtraDataPresent);
        assert!(HandleKind::FunctionTemplate < HandleKind::ExtraDataPresent);
        assert!(HandleKind::JsValue > HandleKind::ExtraDataPresent);
        assert!(HandleKind::Script < HandleKind::NotPresent);
    }

    #[test]
    fn test_value_extra_round_trip() {
        let wrap = ValueWrap::create_value(JsValue::from(1));
        assert_eq!(wrap.extra_len(), 0);
        wrap.set_extra(vec![Rc::new(Note("a")), Rc::new(Note("b"))]);
        assert_eq!(wrap.get_extra::<Note>(1).map(|n| n.0), Some("b"));
        assert!(wrap.get_extra::<Note>(2).is_none());
        assert!(wrap.get_extra::<String>(0).is_none());
        assert_eq!(wrap.value(), JsValue::from(1));
    }

    #[test]
    #[should_panic(expected = "handle kind mismatch")]
    fn test_value_on_template_wrap_aborts() {
        let wrap = ValueWrap::create_object_template(shim_gc::Heap::new().allocate(()));
        let _ = wrap.value();
    }

    #[test]
    #[should_panic(expected = "cannot carry extra data")]
    fn test_extra_on_context_wrap_aborts() {
        let wrap = ValueWrap::create_context(shim_gc::Heap::new().allocate(()));
        wrap.set_extra(Vec::new());
    }
}
