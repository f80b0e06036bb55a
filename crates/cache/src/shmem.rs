//! Shared allocator bridge
//!
//! Wraps the host's process-shared dynamic allocator with byte accounting.
//! Allocation never blocks on the table lock; callers that cannot obtain
//! memory report failure and proceed without caching.

use crate::state::SharedStats;
use plancache_host::{SharedAllocator, ShmHandle};
use std::sync::Arc;

/// A chunk of host shared memory owned by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShmChunk {
    pub handle: ShmHandle,
    pub len: usize,
}

pub(crate) struct ShmemBridge {
    allocator: Arc<dyn SharedAllocator>,
    stats: Arc<SharedStats>,
}

impl ShmemBridge {
    pub fn new(allocator: Arc<dyn SharedAllocator>, stats: Arc<SharedStats>) -> Self {
        Self { allocator, stats }
    }

    /// Copy `bytes` into a fresh shared chunk. `None` when shared memory
    /// is exhausted.
    pub fn store(&self, bytes: &[u8]) -> Option<ShmChunk> {
        let chunk = self.reserve(bytes.len())?;
        self.allocator.write(chunk.handle, bytes);
        Some(chunk)
    }

    /// Allocate without writing; used for capacity the reverse-dependency
    /// index accounts for but fills in place.
    pub fn reserve(&self, len: usize) -> Option<ShmChunk> {
        let handle = self.allocator.alloc(len)?;
        self.stats.add_alloced(len);
        Some(ShmChunk { handle, len })
    }

    /// Copy a chunk's bytes out of shared memory.
    pub fn load(&self, chunk: &ShmChunk) -> Vec<u8> {
        self.allocator.read(chunk.handle, chunk.len)
    }

    pub fn release(&self, chunk: ShmChunk) {
        self.allocator.free(chunk.handle, chunk.len);
        self.stats.sub_alloced(chunk.len);
    }
}
