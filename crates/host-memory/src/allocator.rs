//! Accounting shared-memory arena

use parking_lot::Mutex;
use plancache_host::{SharedAllocator, ShmHandle};
use std::collections::HashMap;

struct ArenaInner {
    chunks: HashMap<u64, Vec<u8>>,
    next_handle: u64,
    used: usize,
}

/// An in-memory stand-in for the host's process-shared dynamic allocator.
/// A byte capacity can be set to exercise the out-of-shared-memory paths.
pub struct MemoryAllocator {
    capacity: Option<usize>,
    inner: Mutex<ArenaInner>,
}

impl MemoryAllocator {
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Some(capacity))
    }

    fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            inner: Mutex::new(ArenaInner {
                chunks: HashMap::new(),
                next_handle: 1,
                used: 0,
            }),
        }
    }

    /// Bytes currently allocated from the arena.
    pub fn used(&self) -> usize {
        self.inner.lock().used
    }

    /// Number of live allocations.
    pub fn live_chunks(&self) -> usize {
        self.inner.lock().chunks.len()
    }
}

impl SharedAllocator for MemoryAllocator {
    fn alloc(&self, size: usize) -> Option<ShmHandle> {
        let mut inner = self.inner.lock();
        if let Some(capacity) = self.capacity {
            if inner.used + size > capacity {
                return None;
            }
        }
        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.chunks.insert(handle, vec![0; size]);
        inner.used += size;
        Some(ShmHandle(handle))
    }

    fn free(&self, handle: ShmHandle, size: usize) {
        let mut inner = self.inner.lock();
        if inner.chunks.remove(&handle.0).is_some() {
            inner.used = inner.used.saturating_sub(size);
        }
    }

    fn write(&self, handle: ShmHandle, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        if let Some(chunk) = inner.chunks.get_mut(&handle.0) {
            chunk[..bytes.len()].copy_from_slice(bytes);
        }
    }

    fn read(&self, handle: ShmHandle, len: usize) -> Vec<u8> {
        let inner = self.inner.lock();
        match inner.chunks.get(&handle.0) {
            Some(chunk) => chunk[..len.min(chunk.len())].to_vec(),
            None => Vec::new(),
        }
    }
}
