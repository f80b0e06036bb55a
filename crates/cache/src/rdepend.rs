//! Reverse-dependency index
//!
//! Maps a catalog object to the set of cache keys whose plans depend on
//! it. Buckets are locked individually; the lock ordering is always table
//! lock first, then a bucket here. A registration can be observed before
//! its entry is installed only within the installer's own exclusive table
//! section, so lookups that re-validate keys against the entry table never
//! see a phantom.

use crate::key::{CacheKey, RdependKey};
use crate::shmem::{ShmChunk, ShmemBridge};
use crate::state::SharedStats;
use dashmap::DashMap;
use std::mem;
use std::sync::Arc;

/// Default key-array capacity of a fresh reverse-dependency entry.
const RDEPEND_INIT: usize = 10;

const KEY_SIZE: usize = mem::size_of::<CacheKey>();

#[derive(Debug)]
pub(crate) struct RdependEntry {
    keys: Vec<CacheKey>,
    max_keys: usize,
    /// Shared-memory footprint of the key array, `max_keys` wide.
    reservation: ShmChunk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegisterOutcome {
    Registered,
    /// The per-dependency fan-out cap was hit; the caller must roll back
    /// partial registrations and refuse to cache.
    Overflow,
    /// Shared memory exhausted.
    Oom,
}

pub(crate) struct RdependIndex {
    map: DashMap<RdependKey, RdependEntry>,
    shmem: Arc<ShmemBridge>,
    stats: Arc<SharedStats>,
    rdepend_max: usize,
}

impl RdependIndex {
    pub fn new(shmem: Arc<ShmemBridge>, stats: Arc<SharedStats>, rdepend_max: usize) -> Self {
        Self {
            map: DashMap::new(),
            shmem,
            stats,
            rdepend_max,
        }
    }

    /// Record that the entry identified by `key` depends on `rkey`.
    pub fn register(&self, rkey: RdependKey, key: &CacheKey) -> RegisterOutcome {
        match self.map.entry(rkey) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let max_keys = RDEPEND_INIT.min(self.rdepend_max);
                let reservation = match self.shmem.reserve(max_keys * KEY_SIZE) {
                    Some(chunk) => chunk,
                    None => {
                        tracing::warn!(?rkey, "out of shared memory for reverse dependency");
                        return RegisterOutcome::Oom;
                    }
                };
                vacant.insert(RdependEntry {
                    keys: vec![*key],
                    max_keys,
                    reservation,
                });
                self.stats.rdepend_created();
                RegisterOutcome::Registered
            }
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.keys.contains(key) {
                    return RegisterOutcome::Registered;
                }
                if entry.keys.len() >= self.rdepend_max {
                    tracing::warn!(?rkey, cap = self.rdepend_max, "too many cache entries for dependency");
                    return RegisterOutcome::Overflow;
                }
                if entry.keys.len() >= entry.max_keys {
                    let new_max = (entry.max_keys * 2).min(self.rdepend_max);
                    let new_reservation = match self.shmem.reserve(new_max * KEY_SIZE) {
                        Some(chunk) => chunk,
                        None => {
                            tracing::warn!(?rkey, "out of shared memory growing reverse dependency");
                            return RegisterOutcome::Oom;
                        }
                    };
                    let old = mem::replace(&mut entry.reservation, new_reservation);
                    self.shmem.release(old);
                    entry.max_keys = new_max;
                }
                entry.keys.push(*key);
                RegisterOutcome::Registered
            }
        }
    }

    /// Drop `key` from the dependency's fan-out; removes the dependency
    /// entirely once no keys remain.
    pub fn unregister(&self, rkey: &RdependKey, key: &CacheKey) {
        let emptied = match self.map.get_mut(rkey) {
            Some(mut entry) => {
                entry.keys.retain(|k| k != key);
                entry.keys.is_empty()
            }
            None => false,
        };
        if emptied {
            if let Some((_, entry)) = self.map.remove(rkey) {
                self.shmem.release(entry.reservation);
                self.stats.rdepend_removed();
            }
        }
    }

    /// Copy of the keys currently depending on `rkey`. Callers must
    /// re-validate each against the entry table; entries may have been
    /// evicted after this snapshot was taken.
    pub fn keys_snapshot(&self, rkey: &RdependKey) -> Vec<CacheKey> {
        self.map
            .get(rkey)
            .map(|entry| entry.keys.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, rkey: &RdependKey) -> bool {
        self.map.contains_key(rkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plancache_host::{Oid, SharedAllocator, ShmHandle};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingArena {
        next: AtomicU64,
    }

    impl SharedAllocator for CountingArena {
        fn alloc(&self, _size: usize) -> Option<ShmHandle> {
            Some(ShmHandle(self.next.fetch_add(1, Ordering::Relaxed)))
        }
        fn free(&self, _handle: ShmHandle, _size: usize) {}
        fn write(&self, _handle: ShmHandle, _bytes: &[u8]) {}
        fn read(&self, _handle: ShmHandle, len: usize) -> Vec<u8> {
            vec![0; len]
        }
    }

    fn index(rdepend_max: usize) -> (RdependIndex, Arc<SharedStats>) {
        let stats = Arc::new(SharedStats::new());
        let bridge = Arc::new(ShmemBridge::new(
            Arc::new(CountingArena { next: AtomicU64::new(1) }),
            stats.clone(),
        ));
        (RdependIndex::new(bridge, stats.clone(), rdepend_max), stats)
    }

    fn key(query_id: u64) -> CacheKey {
        CacheKey {
            user_id: None,
            database_id: Oid(1),
            query_id,
            const_id: 0,
        }
    }

    #[test]
    fn register_unregister_round_trip() {
        let (index, stats) = index(50);
        let rkey = RdependKey::relation(Oid(1), Oid(100));

        assert_eq!(index.register(rkey, &key(1)), RegisterOutcome::Registered);
        assert_eq!(index.register(rkey, &key(2)), RegisterOutcome::Registered);
        // Re-registration is a no-op.
        assert_eq!(index.register(rkey, &key(1)), RegisterOutcome::Registered);
        assert_eq!(index.keys_snapshot(&rkey), vec![key(1), key(2)]);
        assert_eq!(stats.snapshot().rdepend_num, 1);

        index.unregister(&rkey, &key(1));
        assert_eq!(index.keys_snapshot(&rkey), vec![key(2)]);
        index.unregister(&rkey, &key(2));
        assert!(!index.contains(&rkey));
        assert_eq!(stats.snapshot().rdepend_num, 0);
        assert_eq!(stats.snapshot().alloced_size, 0);
    }

    #[test]
    fn overflow_at_cap() {
        let (index, _) = index(2);
        let rkey = RdependKey::relation(Oid(1), Oid(100));

        assert_eq!(index.register(rkey, &key(1)), RegisterOutcome::Registered);
        assert_eq!(index.register(rkey, &key(2)), RegisterOutcome::Registered);
        assert_eq!(index.register(rkey, &key(3)), RegisterOutcome::Overflow);
        // The failed registration left the fan-out untouched.
        assert_eq!(index.keys_snapshot(&rkey).len(), 2);
    }

    #[test]
    fn capacity_doubles_up_to_cap() {
        let (index, stats) = index(50);
        let rkey = RdependKey::relation(Oid(1), Oid(100));

        for i in 0..15 {
            assert_eq!(index.register(rkey, &key(i)), RegisterOutcome::Registered);
        }
        // One growth step: 10 -> 20 keys of reservation.
        assert_eq!(stats.snapshot().alloced_size, (20 * KEY_SIZE) as i64);
    }
}
