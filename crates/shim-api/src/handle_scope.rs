//! Handle scopes.
//!
//! Scopes form a strict LIFO stack per isolate. Every new local is recorded
//! in the top scope and stays rooted until that scope is popped, unless it
//! was escaped into the next-enclosing scope.

use crate::isolate::IsolateWrap;
use crate::local::Local;
use shim_gc::GcRef;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// What a scope allows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleScopeKind {
    /// Ordinary scope
    Normal,
    /// Scope that can hand one handle to its parent
    Escapable,
    /// No handle may be created while it is on top
    Sealed,
    /// Opened by the shim around host callbacks
    Internal,
}

/// One entry of the handle scope stack
#[derive(Debug)]
pub struct HandleScopeWrap {
    id: u64,
    kind: HandleScopeKind,
    handles: RefCell<Vec<GcRef>>,
}

impl HandleScopeWrap {
    /// Stack-unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Scope kind
    pub fn kind(&self) -> HandleScopeKind {
        self.kind
    }

    /// Wraps recorded here
    pub fn handles(&self) -> Vec<GcRef> {
        self.handles.borrow().clone()
    }

    /// Number of wraps recorded here
    pub fn len(&self) -> usize {
        self.handles.borrow().len()
    }

    /// Whether nothing is recorded here
    pub fn is_empty(&self) -> bool {
        self.handles.borrow().is_empty()
    }

    fn add(&self, wrap: GcRef) {
        self.handles.borrow_mut().push(wrap);
    }

    fn remove(&self, wrap: GcRef) -> bool {
        let mut handles = self.handles.borrow_mut();
        match handles.iter().rposition(|h| *h == wrap) {
            Some(i) => {
                handles.swap_remove(i);
                true
            }
            None => false,
        }
    }
}

impl IsolateWrap {
    /// Push a scope of `kind`
    pub fn push_handle_scope(&self, kind: HandleScopeKind) -> Rc<HandleScopeWrap> {
        let id = self.next_scope_id.get();
        self.next_scope_id.set(id + 1);
        let scope = Rc::new(HandleScopeWrap {
            id,
            kind,
            handles: RefCell::new(Vec::new()),
        });
        self.handle_scopes.borrow_mut().push(scope.clone());
        trace_call!("SCOPE", scope = id, ?kind, "push");
        scope
    }

    /// Pop `expected`. Aborts when it is not the top scope.
    pub fn pop_handle_scope(&self, expected: &HandleScopeWrap) {
        trace_call!("SCOPE", scope = expected.id, "pop");
        let mut scopes = self.handle_scopes.borrow_mut();
        match scopes.last() {
            Some(top) if top.id == expected.id => {
                scopes.pop();
            }
            Some(top) => fatal!(
                "handle scope {} popped while {} is on top",
                expected.id,
                top.id
            ),
            None => fatal!("handle scope {} popped from an empty stack", expected.id),
        }
    }

    /// Number of open scopes
    pub fn handle_scope_depth(&self) -> usize {
        self.handle_scopes.borrow().len()
    }

    /// Record `wrap` in the top scope. Aborts when there is none or the
    /// top scope is sealed.
    pub fn add_handle_to_current_scope(&self, wrap: GcRef) {
        let scopes = self.handle_scopes.borrow();
        let Some(top) = scopes.last() else {
            fatal!("cannot create a handle without a HandleScope")
        };
        shim_check!(
            top.kind != HandleScopeKind::Sealed,
            "cannot create a handle while a SealHandleScope is on top"
        );
        top.add(wrap);
    }

    /// Move `wrap` from the top (escapable) scope into the one below.
    ///
    /// A wrap not recorded in the top scope is already rooted elsewhere and
    /// is left where it is.
    pub fn escape_handle(&self, wrap: GcRef) -> GcRef {
        trace_call!("SCOPE", ?wrap, "escape");
        let scopes = self.handle_scopes.borrow();
        shim_check!(scopes.len() >= 2, "escape needs an enclosing handle scope");
        let top = &scopes[scopes.len() - 1];
        shim_check!(
            top.kind == HandleScopeKind::Escapable,
            "escape from a {:?} handle scope",
            top.kind
        );
        if top.remove(wrap) {
            scopes[scopes.len() - 2].add(wrap);
        }
        wrap
    }
}

/// RAII scope for locals
#[must_use = "locals are released when the scope is dropped"]
pub struct HandleScope {
    isolate: Rc<IsolateWrap>,
    scope: Rc<HandleScopeWrap>,
}

impl HandleScope {
    /// Open a normal scope
    pub fn new(isolate: &IsolateWrap) -> Self {
        Self::with_kind(isolate, HandleScopeKind::Normal)
    }

    pub(crate) fn with_kind(isolate: &IsolateWrap, kind: HandleScopeKind) -> Self {
        Self {
            isolate: isolate.rc(),
            scope: isolate.push_handle_scope(kind),
        }
    }

    /// The isolate the scope belongs to
    pub fn isolate(&self) -> &Rc<IsolateWrap> {
        &self.isolate
    }

    /// Stack entry behind this scope
    pub fn wrap(&self) -> &Rc<HandleScopeWrap> {
        &self.scope
    }
}

impl Drop for HandleScope {
    fn drop(&mut self) {
        self.isolate.pop_handle_scope(&self.scope);
    }
}

/// Scope that may pass one local to its parent scope
#[must_use = "locals are released when the scope is dropped"]
pub struct EscapableHandleScope {
    inner: HandleScope,
    escaped: Cell<bool>,
}

impl EscapableHandleScope {
    /// Open an escapable scope
    pub fn new(isolate: &IsolateWrap) -> Self {
        Self {
            inner: HandleScope::with_kind(isolate, HandleScopeKind::Escapable),
            escaped: Cell::new(false),
        }
    }

    /// Keep `value` alive in the parent scope. Aborts on a second call.
    pub fn escape<T>(&self, value: Local<T>) -> Local<T> {
        shim_check!(!self.escaped.replace(true), "escape called twice");
        Local::from_wrap(self.inner.isolate.escape_handle(value.wrap_ref()))
    }
}

/// Forbids handle creation while it is the top scope
#[must_use = "the seal is lifted when the scope is dropped"]
pub struct SealHandleScope {
    inner: HandleScope,
}

impl SealHandleScope {
    /// Seal the handle scope stack
    pub fn new(isolate: &IsolateWrap) -> Self {
        Self {
            inner: HandleScope::with_kind(isolate, HandleScopeKind::Sealed),
        }
    }

    /// Stack entry behind this seal
    pub fn wrap(&self) -> &Rc<HandleScopeWrap> {
        self.inner.wrap()
    }
}
