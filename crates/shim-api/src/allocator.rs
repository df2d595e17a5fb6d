//! ArrayBuffer memory allocation

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of ArrayBuffer memory.
///
/// Buffers are handed out as owned byte vectors and handed back through
/// [`ArrayBufferAllocator::free`] once the last holder lets go.
pub trait ArrayBufferAllocator: Send + Sync {
    /// `length` zeroed bytes, or `None` when out of memory
    fn allocate(&self, length: usize) -> Option<Vec<u8>>;

    /// `length` bytes with unspecified contents
    fn allocate_uninitialized(&self, length: usize) -> Option<Vec<u8>> {
        self.allocate(length)
    }

    /// Take a buffer back
    fn free(&self, data: Vec<u8>) {
        drop(data);
    }

    /// Grow or shrink `data` to `new_length`, zero-filling new bytes
    fn reallocate(&self, mut data: Vec<u8>, new_length: usize) -> Option<Vec<u8>> {
        if new_length > data.len() {
            data.try_reserve_exact(new_length - data.len()).ok()?;
        }
        data.resize(new_length, 0);
        Some(data)
    }
}

/// Heap-backed allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAllocator;

impl ArrayBufferAllocator for DefaultAllocator {
    fn allocate(&self, length: usize) -> Option<Vec<u8>> {
        let mut data = Vec::new();
        data.try_reserve_exact(length).ok()?;
        data.resize(length, 0);
        Some(data)
    }
}

/// Wraps the embedder's allocator and tracks the bytes it has out
pub struct ArrayBufferAllocatorDecorator {
    inner: Arc<dyn ArrayBufferAllocator>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ArrayBufferAllocatorDecorator {
    /// Decorate `inner`
    pub fn new(inner: Arc<dyn ArrayBufferAllocator>) -> Self {
        Self {
            inner,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// The decorated allocator
    pub fn array_buffer_allocator(&self) -> &Arc<dyn ArrayBufferAllocator> {
        &self.inner
    }

    /// Bytes currently handed out
    pub fn current_memory_size(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Most bytes ever handed out at once
    pub fn peak_memory_size(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    fn grow(&self, length: usize) {
        let current = self.current.fetch_add(length, Ordering::Relaxed) + length;
        self.peak.fetch_max(current, Ordering::Relaxed);
        tracing::trace!(
            target: "shim::allocator",
            current,
            peak = self.peak_memory_size(),
            "malc"
        );
    }

    fn shrink(&self, length: usize) {
        let _ = self
            .current
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(length))
            });
        tracing::trace!(
            target: "shim::allocator",
            current = self.current_memory_size(),
            peak = self.peak_memory_size(),
            "free"
        );
    }

    /// Log the counters
    pub fn print_state(&self) {
        tracing::debug!(
            target: "shim::allocator",
            current = self.current_memory_size(),
            peak = self.peak_memory_size(),
            "stat"
        );
    }
}

impl ArrayBufferAllocator for ArrayBufferAllocatorDecorator {
    fn allocate(&self, length: usize) -> Option<Vec<u8>> {
        let data = self.inner.allocate(length)?;
        self.grow(length);
        Some(data)
    }

    fn allocate_uninitialized(&self, length: usize) -> Option<Vec<u8>> {
        let data = self.inner.allocate_uninitialized(length)?;
        self.grow(length);
        Some(data)
    }

    fn free(&self, data: Vec<u8>) {
        self.shrink(data.len());
        self.inner.free(data);
    }

    fn reallocate(&self, data: Vec<u8>, new_length: usize) -> Option<Vec<u8>> {
        let old_length = data.len();
        let data = self.inner.reallocate(data, new_length)?;
        self.shrink(old_length);
        self.grow(new_length);
        Some(data)
    }
}

impl fmt::Debug for ArrayBufferAllocatorDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayBufferAllocatorDecorator")
            .field("current", &self.current_memory_size())
            .field("peak", &self.peak_memory_size())
            .finish()
    }
}
