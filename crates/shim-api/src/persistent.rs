//! Persistent and eternal handles

use crate::global_handles::{GlobalHandleState, WeakCallback};
use crate::isolate::{IsolateState, IsolateWrap};
use crate::local::{Local, MaybeLocal};
use shim_gc::GcRef;
use std::cell::Cell;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/// Handle that outlives handle scopes.
///
/// Strong until [`Global::set_weak`]; a weak global keeps nothing alive
/// and becomes empty once the collector reclaims its wrap.
pub struct Global<T> {
    isolate: Weak<IsolateWrap>,
    wrap: Cell<Option<GcRef>>,
    _marker: PhantomData<*const T>,
}

impl<T> Global<T> {
    /// Empty handle
    pub fn empty() -> Self {
        Self {
            isolate: Weak::new(),
            wrap: Cell::new(None),
            _marker: PhantomData,
        }
    }

    /// Persistent handle on the wrap behind `local`
    pub fn new(isolate: &IsolateWrap, local: Local<T>) -> Self {
        let wrap = local.wrap_ref();
        isolate.global_handles().create(wrap);
        Self {
            isolate: isolate.downgrade(),
            wrap: Cell::new(Some(wrap)),
            _marker: PhantomData,
        }
    }

    fn live(&self) -> Option<(Rc<IsolateWrap>, GcRef)> {
        let isolate = self.isolate.upgrade()?;
        if isolate.state() != IsolateState::Ready {
            return None;
        }
        let wrap = self.wrap.get()?;
        isolate.vm().heap().is_alive(wrap).then_some((isolate, wrap))
    }

    /// Whether the handle refers to nothing, or to a reclaimed wrap
    pub fn is_empty(&self) -> bool {
        self.live().is_none()
    }

    /// Local handle in the current scope
    pub fn get(&self) -> MaybeLocal<T> {
        let (isolate, wrap) = self.live()?;
        isolate.add_handle_to_current_scope(wrap);
        Some(Local::from_wrap(wrap))
    }

    /// Stop rooting the wrap. `callback` runs with `parameter` after the
    /// collector reclaims it.
    pub fn set_weak(&self, parameter: *mut c_void, callback: WeakCallback) -> bool {
        let Some((isolate, wrap)) = self.live() else {
            return false;
        };
        isolate
            .global_handles()
            .make_weak(isolate.vm().heap(), wrap, parameter, callback)
    }

    /// Root the wrap again. Returns the parameter given to
    /// [`Global::set_weak`], null when the handle was not weak.
    pub fn clear_weak(&self) -> *mut c_void {
        let Some((isolate, wrap)) = self.live() else {
            return std::ptr::null_mut();
        };
        isolate
            .global_handles()
            .clear_weakness(isolate.vm().heap(), wrap)
            .unwrap_or(std::ptr::null_mut())
    }

    /// Whether the handle is weak
    pub fn is_weak(&self) -> bool {
        self.live()
            .is_some_and(|(isolate, wrap)| isolate.global_handles().is_weak(wrap))
    }

    /// Tracking state of the wrap
    pub fn state(&self) -> GlobalHandleState {
        match self.live() {
            Some((isolate, wrap)) => isolate.global_handles().state(wrap),
            None => GlobalHandleState::Untracked,
        }
    }

    /// Release the handle
    pub fn reset(&self) {
        let Some(wrap) = self.wrap.take() else {
            return;
        };
        let Some(isolate) = self.isolate.upgrade() else {
            return;
        };
        if isolate.state() == IsolateState::Ready {
            isolate.global_handles().destroy(isolate.vm().heap(), wrap);
        }
    }
}

impl<T> Default for Global<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Drop for Global<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T> fmt::Debug for Global<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Global")
            .field("wrap", &self.wrap.get())
            .field("state", &self.state())
            .finish()
    }
}

/// Handle rooted until the isolate is disposed
pub struct Eternal<T> {
    index: Option<usize>,
    _marker: PhantomData<*const T>,
}

impl<T> Eternal<T> {
    /// Root the wrap behind `local` forever
    pub fn new(isolate: &IsolateWrap, local: Local<T>) -> Self {
        Self {
            index: Some(isolate.set_eternal(local.wrap_ref())),
            _marker: PhantomData,
        }
    }

    /// Whether nothing was stored
    pub fn is_empty(&self) -> bool {
        self.index.is_none()
    }

    /// Local handle in the current scope
    pub fn get(&self, isolate: &IsolateWrap) -> MaybeLocal<T> {
        let wrap = isolate.get_eternal(self.index?)?;
        isolate.add_handle_to_current_scope(wrap);
        Some(Local::from_wrap(wrap))
    }
}

impl<T> Default for Eternal<T> {
    fn default() -> Self {
        Self {
            index: None,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Eternal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eternal").field("index", &self.index).finish()
    }
}
