//! Entry table
//!
//! A keyed table of plan records behind one read/write lock. Structural
//! changes (install, discard, evict) require the write side; lookups and
//! counter updates run under the read side with per-entry mutexes. Lock
//! ordering is table lock, then reverse-dependency bucket, then entry
//! mutex, then the shared-state mutex.

use crate::entry::{EntryStats, PlanEntry, USAGE_INIT};
use crate::eviction;
use crate::key::{CacheKey, RdependKey};
use crate::rdepend::RdependIndex;
use crate::shmem::{ShmChunk, ShmemBridge};
use crate::state::SharedStats;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub(crate) type TableMap = HashMap<CacheKey, PlanEntry>;

/// What to do to the entries depending on a catalog object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum DependencyAction {
    /// Remove the plan blob, keep the entry shell and its counters.
    Discard,
    /// Discard and additionally hold the entry locked against new plans.
    DiscardAndLock,
    /// Remove the entry entirely along with its dependencies.
    Evict,
}

/// Staged shared-memory allocations for one installation, built outside
/// the table lock. Ownership transfers into the entry on success; every
/// failure path must hand the pieces back through `discard_staged`.
pub(crate) struct StagedEntry {
    pub plan: ShmChunk,
    pub rels: Option<ShmChunk>,
    pub num_rels: usize,
    pub rdeps: Option<ShmChunk>,
    pub num_rdeps: usize,
    pub num_const: usize,
    pub plan_time_ms: f64,
    pub generic_cost: f64,
    pub custom_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstallOutcome {
    Installed,
    /// The entry existed; its plan slot was refreshed or left as-is.
    Refreshed,
    /// A locker holds the entry; the staged allocations were rolled back.
    RejectedLocked,
}

pub(crate) struct EntryTable {
    map: RwLock<TableMap>,
    max_entries: usize,
    shmem: Arc<ShmemBridge>,
    rdepend: Arc<RdependIndex>,
    stats: Arc<SharedStats>,
}

impl EntryTable {
    pub fn new(
        max_entries: usize,
        shmem: Arc<ShmemBridge>,
        rdepend: Arc<RdependIndex>,
        stats: Arc<SharedStats>,
    ) -> Self {
        Self {
            map: RwLock::new(HashMap::with_capacity(max_entries)),
            max_entries,
            shmem,
            rdepend,
            stats,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TableMap> {
        self.map.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, TableMap> {
        self.map.write()
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Install a staged plan under `key`. Caller holds the write guard and
    /// has already registered the staged dependencies.
    pub fn install(
        &self,
        map: &mut TableMap,
        key: CacheKey,
        staged: StagedEntry,
    ) -> InstallOutcome {
        // Make space if needed.
        while map.len() >= self.max_entries {
            eviction::evict_pass(self, map);
        }

        match map.entry(key) {
            MapEntry::Vacant(vacant) => {
                vacant.insert(PlanEntry {
                    plan: Some(staged.plan),
                    rels: staged.rels,
                    num_rels: staged.num_rels,
                    rdeps: staged.rdeps,
                    num_rdeps: staged.num_rdeps,
                    num_const: staged.num_const,
                    plan_time_ms: staged.plan_time_ms,
                    generic_cost: staged.generic_cost,
                    discard_counter: 0,
                    lockers: AtomicU32::new(0),
                    stats: Mutex::new(EntryStats {
                        bypass: 0,
                        usage: USAGE_INIT,
                        total_custom_cost: staged.custom_cost,
                        num_custom_plans: 1,
                    }),
                });
                InstallOutcome::Installed
            }
            MapEntry::Occupied(mut occupied) => {
                // Another backend raced us, or the plan was discarded and
                // we are re-populating the shell.
                let entry = occupied.get_mut();
                if entry.plan.is_none() {
                    if entry.is_locked() {
                        // A concurrent schema change holds the entry; hand
                        // every staged allocation and registration back.
                        self.shmem.release(staged.plan);
                        self.discard_staged(&key, staged);
                        return InstallOutcome::RejectedLocked;
                    }
                    entry.plan = Some(staged.plan);
                } else {
                    // Lost the race to a concurrent install; keep the
                    // winner's plan but reconcile the dependency arrays.
                    self.shmem.release(staged.plan);
                }

                self.reconcile_dependencies(&key, entry, staged);
                InstallOutcome::Refreshed
            }
        }
    }

    /// Swap an entry's dependency arrays for the staged ones, unregistering
    /// anything no longer referenced.
    fn reconcile_dependencies(&self, key: &CacheKey, entry: &mut PlanEntry, staged: StagedEntry) {
        let new_rels: Vec<plancache_host::Oid> = match &staged.rels {
            Some(chunk) => bincode::deserialize(&self.shmem.load(chunk)).unwrap_or_default(),
            None => Vec::new(),
        };
        if let Some(old_chunk) = entry.rels.take() {
            let old: Vec<plancache_host::Oid> =
                bincode::deserialize(&self.shmem.load(&old_chunk)).unwrap_or_default();
            for oid in old {
                if !new_rels.contains(&oid) {
                    self.rdepend
                        .unregister(&RdependKey::relation(key.database_id, oid), key);
                }
            }
            self.shmem.release(old_chunk);
        }
        entry.rels = staged.rels;
        entry.num_rels = staged.num_rels;

        let new_rdeps: Vec<RdependKey> = match &staged.rdeps {
            Some(chunk) => bincode::deserialize(&self.shmem.load(chunk)).unwrap_or_default(),
            None => Vec::new(),
        };
        if let Some(old_chunk) = entry.rdeps.take() {
            let old: Vec<RdependKey> =
                bincode::deserialize(&self.shmem.load(&old_chunk)).unwrap_or_default();
            for rkey in old {
                if !new_rdeps.contains(&rkey) {
                    self.rdepend.unregister(&rkey, key);
                }
            }
            self.shmem.release(old_chunk);
        }
        entry.rdeps = staged.rdeps;
        entry.num_rdeps = staged.num_rdeps;
    }

    /// Roll back a staged installation whose plan chunk is already gone:
    /// unregister its dependencies and free the arrays.
    pub fn discard_staged(&self, key: &CacheKey, staged: StagedEntry) {
        if let Some(chunk) = staged.rels {
            let rels: Vec<plancache_host::Oid> =
                bincode::deserialize(&self.shmem.load(&chunk)).unwrap_or_default();
            for oid in rels {
                self.rdepend
                    .unregister(&RdependKey::relation(key.database_id, oid), key);
            }
            self.shmem.release(chunk);
        }
        if let Some(chunk) = staged.rdeps {
            let rdeps: Vec<RdependKey> =
                bincode::deserialize(&self.shmem.load(&chunk)).unwrap_or_default();
            for rkey in rdeps {
                self.rdepend.unregister(&rkey, key);
            }
            self.shmem.release(chunk);
        }
    }

    /// Remove an entry's plan blob, keeping the shell and its dependency
    /// arrays so it re-populates efficiently on its next planning.
    pub fn discard(&self, map: &mut TableMap, key: &CacheKey) {
        if let Some(entry) = map.get_mut(key) {
            if let Some(chunk) = entry.plan.take() {
                self.shmem.release(chunk);
                entry.discard_counter += 1;
            }
        }
    }

    /// Remove an entry entirely: free every owned allocation and
    /// unregister every dependency.
    pub fn evict(&self, map: &mut TableMap, key: &CacheKey) {
        let Some(entry) = map.remove(key) else {
            return;
        };
        for oid in entry.relation_ids(&self.shmem) {
            self.rdepend
                .unregister(&RdependKey::relation(key.database_id, oid), key);
        }
        for rkey in entry.rdepend_keys(&self.shmem) {
            self.rdepend.unregister(&rkey, key);
        }
        if let Some(chunk) = entry.plan {
            self.shmem.release(chunk);
        }
        if let Some(chunk) = entry.rels {
            self.shmem.release(chunk);
        }
        if let Some(chunk) = entry.rdeps {
            self.shmem.release(chunk);
        }
    }

    /// Apply `action` to every entry depending on `rkey`. Caller holds the
    /// write guard.
    pub fn apply_dependency_action(
        &self,
        map: &mut TableMap,
        rkey: &RdependKey,
        action: DependencyAction,
    ) {
        // Work on a copy: eviction below mutates the fan-out we iterate.
        let keys = self.rdepend.keys_snapshot(rkey);
        for key in keys {
            if !map.contains_key(&key) {
                continue;
            }
            match action {
                DependencyAction::Discard => self.discard(map, &key),
                DependencyAction::DiscardAndLock => {
                    if let Some(entry) = map.get(&key) {
                        entry.lockers.fetch_add(1, Ordering::AcqRel);
                    }
                    self.discard(map, &key);
                }
                DependencyAction::Evict => self.evict(map, &key),
            }
        }
    }

    /// Release the lock taken by `DiscardAndLock` on every entry depending
    /// on `rkey`. Runs under the read guard once execution completed.
    pub fn unlock_dependents(&self, map: &TableMap, rkey: &RdependKey) {
        for key in self.rdepend.keys_snapshot(rkey) {
            if let Some(entry) = map.get(&key) {
                let prev = entry.lockers.fetch_sub(1, Ordering::AcqRel);
                debug_assert!(prev > 0);
            }
        }
    }

}
