//! Cache entry record

use crate::key::RdependKey;
use crate::shmem::{ShmChunk, ShmemBridge};
use parking_lot::Mutex;
use plancache_host::Oid;
use std::sync::atomic::{AtomicU32, Ordering};

/// Initial usage of a freshly installed entry.
pub(crate) const USAGE_INIT: f64 = 1.0;

/// Counters mutated on every lookup, guarded by the entry mutex only.
#[derive(Debug, Clone)]
pub(crate) struct EntryStats {
    /// Times the cached plan was used in lieu of planning.
    pub bypass: i64,
    /// Eviction weight; ages under the decay factor on every pass.
    pub usage: f64,
    pub total_custom_cost: f64,
    pub num_custom_plans: i64,
}

/// Resident record for one cache key.
///
/// Field discipline: `plan`, `rels`, `rdeps` and `discard_counter` are
/// mutated only under the exclusive table lock; `stats` only under the
/// entry mutex; `lockers` is read lock-free and mutated around concurrent
/// utility execution.
pub(crate) struct PlanEntry {
    /// Serialized generic plan; `None` once discarded.
    pub plan: Option<ShmChunk>,
    /// Relation ids the plan depends on, as a shared-memory array.
    pub rels: Option<ShmChunk>,
    pub num_rels: usize,
    /// Non-relation dependencies, as a shared-memory array.
    pub rdeps: Option<ShmChunk>,
    pub num_rdeps: usize,
    /// Constant literals in the source query.
    pub num_const: usize,
    /// Host-measured cost of the first generic planning, in ms.
    pub plan_time_ms: f64,
    /// Estimated total cost of the stored generic plan.
    pub generic_cost: f64,
    /// Monotonic; bumped on every plan invalidation. Readers that saw a
    /// value must re-verify it after re-acquiring the table lock.
    pub discard_counter: i64,
    /// While non-zero the entry must not accept a new plan and presents
    /// as a miss to lookups.
    pub lockers: AtomicU32,
    pub stats: Mutex<EntryStats>,
}

impl PlanEntry {
    pub fn is_locked(&self) -> bool {
        self.lockers.load(Ordering::Acquire) != 0
    }

    /// Decide whether to use the cached plan, maintaining the bypass and
    /// usage counters. The second flag tells the caller to accumulate
    /// custom-plan statistics after planning.
    pub fn choose_cached_plan(&self, threshold: i64) -> (bool, bool) {
        let mut stats = self.stats.lock();
        if stats.num_custom_plans >= threshold {
            let avg = stats.total_custom_cost / stats.num_custom_plans as f64;
            let use_cached = self.generic_cost < avg;
            if use_cached {
                stats.bypass += 1;
                stats.usage += self.plan_time_ms;
            }
            (use_cached, false)
        } else {
            // Not enough custom plans yet; keep the entry warm so it does
            // not get evicted before it had a chance to prove itself.
            stats.usage += self.plan_time_ms;
            (false, true)
        }
    }

    pub fn relation_ids(&self, shmem: &ShmemBridge) -> Vec<Oid> {
        match &self.rels {
            Some(chunk) => bincode::deserialize(&shmem.load(chunk)).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn rdepend_keys(&self, shmem: &ShmemBridge) -> Vec<RdependKey> {
        match &self.rdeps {
            Some(chunk) => bincode::deserialize(&shmem.load(chunk)).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}
