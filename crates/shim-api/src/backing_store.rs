//! Backing stores and ArrayBuffers.
//!
//! A [`BackingStoreWrap`] owns the bytes of one or more ArrayBuffers. Every
//! party that needs the bytes kept alive (an ArrayBuffer, or the embedder)
//! holds a [`BackingStoreWrapHolder`]; the bytes go back to their deleter
//! when the last holder drops, on whichever thread that happens.

use crate::allocator::{ArrayBufferAllocator, ArrayBufferAllocatorDecorator};
use crate::error::{Result, ShimError};
use crate::extra_data::{ArrayBufferObjectData, ExtraData, ObjectData, get_extra_data, set_extra_data};
use crate::isolate::IsolateWrap;
use crate::local::Local;
use crate::types;
use parking_lot::Mutex;
use shim_vm::{ArrayBufferContents, Value as JsValue};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering, fence};

/// Whether a backing store may back several buffers across threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedFlag {
    /// One owner at a time
    NotShared,
    /// `SharedArrayBuffer` memory
    Shared,
}

/// Whether new memory is zeroed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializedFlag {
    /// Contents unspecified
    Uninitialized,
    /// All zero
    ZeroInitialized,
}

/// Host callback that takes back memory it handed to a backing store
pub type DeleterCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

enum BufferDeleter {
    Allocator(Arc<ArrayBufferAllocatorDecorator>),
    External(Option<DeleterCallback>),
}

impl BufferDeleter {
    fn free(&mut self, data: Vec<u8>) {
        match self {
            BufferDeleter::Allocator(allocator) => allocator.free(data),
            BufferDeleter::External(deleter) => {
                if let Some(deleter) = deleter.take() {
                    deleter(data);
                }
            }
        }
    }
}

struct Buffer {
    data: Option<Vec<u8>>,
    deleter: BufferDeleter,
}

/// Memory behind ArrayBuffers
pub struct BackingStoreWrap {
    buffer: Mutex<Buffer>,
    byte_length: usize,
    is_shared: bool,
    holders: AtomicUsize,
}

impl BackingStoreWrap {
    /// `byte_length` bytes from `isolate`'s allocator
    pub fn create(
        isolate: &IsolateWrap,
        byte_length: usize,
        shared: SharedFlag,
        initialized: InitializedFlag,
    ) -> Result<Arc<Self>> {
        let allocator = isolate.array_buffer_allocator();
        let data = match initialized {
            InitializedFlag::ZeroInitialized => allocator.allocate(byte_length),
            InitializedFlag::Uninitialized => allocator.allocate_uninitialized(byte_length),
        }
        .ok_or(ShimError::AllocationFailed(byte_length))?;
        Ok(Arc::new(Self::new(
            data,
            shared,
            BufferDeleter::Allocator(allocator),
        )))
    }

    /// Store around memory the embedder allocated. `deleter` gets it back.
    pub fn from_external(data: Vec<u8>, deleter: Option<DeleterCallback>) -> Arc<Self> {
        Arc::new(Self::new(
            data,
            SharedFlag::NotShared,
            BufferDeleter::External(deleter),
        ))
    }

    fn new(data: Vec<u8>, shared: SharedFlag, deleter: BufferDeleter) -> Self {
        Self {
            byte_length: data.len(),
            buffer: Mutex::new(Buffer {
                data: Some(data),
                deleter,
            }),
            is_shared: shared == SharedFlag::Shared,
            holders: AtomicUsize::new(0),
        }
    }

    /// Size in bytes
    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// Whether this is shared memory
    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    /// Whether the memory was already given back
    pub fn is_freed(&self) -> bool {
        self.buffer.lock().data.is_none()
    }

    /// Live holders
    pub fn holder_count(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }

    /// Copy of the bytes; empty once freed
    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.lock().data.clone().unwrap_or_default()
    }

    fn free(&self) {
        let mut buffer = self.buffer.lock();
        if let Some(data) = buffer.data.take() {
            tracing::trace!(target: "shim::backing_store", len = data.len(), "free");
            buffer.deleter.free(data);
        }
    }
}

impl fmt::Debug for BackingStoreWrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingStoreWrap")
            .field("byte_length", &self.byte_length)
            .field("is_shared", &self.is_shared)
            .field("holders", &self.holder_count())
            .finish()
    }
}

/// Counted reference keeping a backing store's bytes alive
pub struct BackingStoreWrapHolder {
    store: Arc<BackingStoreWrap>,
}

impl BackingStoreWrapHolder {
    /// New holder on `store`
    pub fn new(store: Arc<BackingStoreWrap>) -> Self {
        store.holders.fetch_add(1, Ordering::Relaxed);
        Self { store }
    }

    /// The store
    pub fn store(&self) -> &Arc<BackingStoreWrap> {
        &self.store
    }
}

impl Clone for BackingStoreWrapHolder {
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl Drop for BackingStoreWrapHolder {
    fn drop(&mut self) {
        if self.store.holders.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        self.store.free();
    }
}

impl fmt::Debug for BackingStoreWrapHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BackingStoreWrapHolder")
            .field(&self.store)
            .finish()
    }
}

impl ArrayBufferContents for BackingStoreWrapHolder {
    fn byte_length(&self) -> usize {
        self.store.byte_length
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> bool {
        let buffer = self.store.buffer.lock();
        let Some(data) = buffer.data.as_ref() else {
            return false;
        };
        match offset
            .checked_add(out.len())
            .and_then(|end| data.get(offset..end))
        {
            Some(bytes) => {
                out.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    fn write(&self, offset: usize, bytes: &[u8]) -> bool {
        let mut buffer = self.store.buffer.lock();
        let Some(data) = buffer.data.as_mut() else {
            return false;
        };
        match offset
            .checked_add(bytes.len())
            .and_then(|end| data.get_mut(offset..end))
        {
            Some(target) => {
                target.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    fn is_shared(&self) -> bool {
        self.store.is_shared
    }
}

// ---- ArrayBuffer API ----

impl types::ArrayBuffer {
    /// Zeroed buffer of `byte_length` bytes. Aborts when allocation fails.
    pub fn new(isolate: &IsolateWrap, byte_length: usize) -> Local<types::ArrayBuffer> {
        let store = match Self::new_backing_store(isolate, byte_length) {
            Ok(store) => store,
            Err(e) => fatal!("ArrayBuffer allocation failed: {e}"),
        };
        Self::with_backing_store(isolate, &store)
    }

    /// Backing store of `byte_length` zeroed bytes, not yet attached
    pub fn new_backing_store(
        isolate: &IsolateWrap,
        byte_length: usize,
    ) -> Result<BackingStoreWrapHolder> {
        let store = BackingStoreWrap::create(
            isolate,
            byte_length,
            SharedFlag::NotShared,
            InitializedFlag::ZeroInitialized,
        )?;
        Ok(BackingStoreWrapHolder::new(store))
    }

    /// Backing store over embedder memory
    pub fn new_backing_store_from_data(
        data: Vec<u8>,
        deleter: Option<DeleterCallback>,
    ) -> BackingStoreWrapHolder {
        BackingStoreWrapHolder::new(BackingStoreWrap::from_external(data, deleter))
    }

    /// Buffer over `store` in the current context
    pub fn with_backing_store(
        isolate: &IsolateWrap,
        store: &BackingStoreWrapHolder,
    ) -> Local<types::ArrayBuffer> {
        trace_call!("ARRAYBUFFER", len = store.store().byte_length(), "new");
        let vm = isolate.vm();
        let buffer = vm.new_array_buffer(isolate.engine_context_or_pure());
        let holder = Rc::new(store.clone());
        if let Some(object) = vm.object(buffer).as_array_buffer() {
            object.attach(holder.clone());
        }
        set_extra_data(
            vm,
            buffer,
            Rc::new(ExtraData::ArrayBuffer(ArrayBufferObjectData::new(holder))),
        );
        isolate.new_value(JsValue::Object(buffer))
    }
}

impl Local<types::ArrayBuffer> {
    fn buffer(&self) -> shim_gc::GcRef {
        match self.value_wrap().value().as_object() {
            Some(buffer) => buffer,
            None => fatal!("ArrayBuffer handle holds a primitive"),
        }
    }

    /// `byteLength`; 0 once detached
    pub fn byte_length(&self) -> usize {
        let isolate = api_enter_no_exception!();
        isolate
            .vm()
            .object(self.buffer())
            .as_array_buffer()
            .map_or(0, |b| b.byte_length())
    }

    /// A new holder on the attached store
    pub fn get_backing_store(&self) -> Option<BackingStoreWrapHolder> {
        let isolate = api_enter_no_exception!();
        let extra = get_extra_data(isolate.vm(), self.buffer())?;
        match &*extra {
            ExtraData::ArrayBuffer(data) => Some((**data.backing_store()).clone()),
            _ => None,
        }
    }

    /// Drop the memory; the buffer's holder is released
    pub fn detach(&self) {
        let isolate = api_enter_no_exception!();
        let vm = isolate.vm();
        let buffer = self.buffer();
        if let Some(object) = vm.object(buffer).as_array_buffer() {
            object.detach();
        }
        set_extra_data(vm, buffer, Rc::new(ExtraData::Object(ObjectData::new(None))));
    }

    /// Whether [`Local::<types::ArrayBuffer>::detach`] ran
    pub fn was_detached(&self) -> bool {
        let isolate = api_enter_no_exception!();
        isolate
            .vm()
            .object(self.buffer())
            .as_array_buffer()
            .is_none_or(|b| b.is_detached())
    }

    /// Copy of the contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.get_backing_store()
            .map(|holder| holder.store().to_vec())
            .unwrap_or_default()
    }

    /// Overwrite bytes at `offset`; false when out of range or detached
    pub fn write(&self, offset: usize, bytes: &[u8]) -> bool {
        self.get_backing_store()
            .is_some_and(|holder| holder.write(offset, bytes))
    }
}
