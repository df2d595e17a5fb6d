//! Scoped handles

use crate::handle::ValueWrap;
use crate::types;
use shim_gc::GcRef;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Handle to a [`ValueWrap`] recorded in a handle scope.
///
/// Valid while the scope that recorded it (or the scope it escaped into)
/// is open, or while something else roots the wrap.
pub struct Local<T> {
    wrap: GcRef,
    _marker: PhantomData<*const T>,
}

/// Result of an operation that may leave nothing behind (a thrown exception
/// or a terminating isolate)
pub type MaybeLocal<T> = Option<Local<T>>;

impl<T> Clone for Local<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Local<T> {}

impl<T> PartialEq for Local<T> {
    /// Same wrap, not same value; see [`Local::strict_equals`] for values
    fn eq(&self, other: &Self) -> bool {
        self.wrap == other.wrap
    }
}

impl<T> Eq for Local<T> {}

impl<T> fmt::Debug for Local<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Local<{}>({:?})", std::any::type_name::<T>(), self.wrap)
    }
}

impl<T> Local<T> {
    pub(crate) fn from_wrap(wrap: GcRef) -> Self {
        Self {
            wrap,
            _marker: PhantomData,
        }
    }

    /// Heap cell of the wrap
    pub fn wrap_ref(&self) -> GcRef {
        self.wrap
    }

    /// Reinterpret as another handle type. Unchecked, like the embedding
    /// API's `Cast`; a wrong kind aborts on first use.
    pub fn cast<U>(self) -> Local<U> {
        Local::from_wrap(self.wrap)
    }

    /// Upcast to a plain value handle
    pub fn as_value(self) -> Local<types::Value> {
        self.cast()
    }

    /// The wrap cell in the current isolate's heap
    pub fn value_wrap(&self) -> Rc<ValueWrap> {
        let isolate = api_enter_no_exception!();
        isolate.value_wrap(self.wrap)
    }
}
