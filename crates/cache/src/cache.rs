//! Cache assembly and administrative surface

use crate::config::Config;
use crate::error::{Error, Result};
use crate::key::{CacheKey, RdependKey};
use crate::rdepend::RdependIndex;
use crate::shmem::ShmemBridge;
use crate::state::SharedStats;
use crate::table::EntryTable;
use chrono::{DateTime, Utc};
use plancache_host::{Host, Oid};
use std::sync::Arc;

/// The shared plan cache. One instance stands in for the process-shared
/// state every backend of a database host attaches to.
pub struct SharedPlanCache {
    pub(crate) config: Config,
    pub(crate) host: Host,
    pub(crate) stats: Arc<SharedStats>,
    pub(crate) shmem: Arc<ShmemBridge>,
    pub(crate) rdepend: Arc<RdependIndex>,
    pub(crate) table: EntryTable,
}

/// Global statistics of the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheInfo {
    /// Number of reverse-dependency entries being tracked.
    pub rdepend_num: i64,
    /// Shared-allocator bytes currently held on behalf of the cache.
    pub alloced_size: i64,
    /// Number of eviction passes since the last reset.
    pub dealloc: i64,
    pub stats_reset: DateTime<Utc>,
}

/// Observable state of one entry, for the listing surface.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
    pub user_id: Option<Oid>,
    pub database_id: Oid,
    pub query_id: u64,
    pub const_id: u32,
    pub num_const: usize,
    pub bypass: i64,
    /// Serialized plan length; zero once the plan was discarded.
    pub plan_len: usize,
    pub plan_time_ms: f64,
    pub total_custom_cost: f64,
    pub num_custom_plans: i64,
    pub generic_cost: f64,
    pub num_rels: usize,
    pub num_rdeps: usize,
    pub discard_counter: i64,
    pub lockers: u32,
    pub usage: f64,
    /// Referenced relation ids, when requested.
    pub relations: Option<Vec<Oid>>,
}

impl SharedPlanCache {
    pub fn new(config: Config, host: Host) -> Self {
        let config = config.sanitized();
        let stats = Arc::new(SharedStats::new());
        let shmem = Arc::new(ShmemBridge::new(host.allocator.clone(), stats.clone()));
        let rdepend = Arc::new(RdependIndex::new(
            shmem.clone(),
            stats.clone(),
            config.rdepend_max,
        ));
        let table = EntryTable::new(
            config.max_entries,
            shmem.clone(),
            rdepend.clone(),
            stats.clone(),
        );
        Self {
            config,
            host,
            stats,
            shmem,
            rdepend,
            table,
        }
    }

    /// Guard for embedders exposing the administrative surface: maps the
    /// not-yet-attached state to a caller-visible error instead of a
    /// silent no-op.
    pub fn attached(cache: Option<&SharedPlanCache>) -> Result<&SharedPlanCache> {
        cache.ok_or(Error::NotInitialized)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry matching the given components; with none given,
    /// everything goes. Global statistics start over when the cache ends
    /// up empty.
    ///
    /// There is no exact-key fast path even with every component given:
    /// the key's `const_id` is not part of the reset interface, so one
    /// (user, database, query) triple can cover several entries.
    pub fn reset(&self, user: Option<Oid>, db: Option<Oid>, query_id: u64) {
        let mut map = self.table.write();
        let num_entries = map.len();

        let victims: Vec<CacheKey> = map
            .keys()
            .filter(|key| {
                (user.is_none() || key.user_id == user)
                    && (db.is_none() || Some(key.database_id) == db)
                    && (query_id == 0 || key.query_id == query_id)
            })
            .copied()
            .collect();

        let removed = victims.len();
        for key in victims {
            self.table.evict(&mut map, &key);
        }

        if removed == num_entries {
            self.stats.reset();
        }
    }

    pub fn info(&self) -> CacheInfo {
        let snapshot = self.stats.snapshot();
        CacheInfo {
            rdepend_num: snapshot.rdepend_num,
            alloced_size: snapshot.alloced_size,
            dealloc: snapshot.dealloc,
            stats_reset: snapshot.stats_reset,
        }
    }

    /// Median usage recorded by the last eviction pass.
    pub fn median_usage(&self) -> f64 {
        self.stats.median_usage()
    }

    /// Whether any entry depends on the given relation.
    pub fn has_relation_dependency(&self, db: Oid, relid: Oid) -> bool {
        self.rdepend.contains(&RdependKey::relation(db, relid))
    }

    /// Per-entry observable state. With `relation` given, only entries
    /// depending on it are listed, resolved through the reverse-dependency
    /// index instead of a full scan.
    pub fn entries(
        &self,
        db: Option<Oid>,
        relation: Option<Oid>,
        with_rels: bool,
    ) -> Vec<EntrySnapshot> {
        let map = self.table.read();

        let keys: Vec<CacheKey> = match relation {
            Some(relid) => {
                // Default to the current database, like the host's
                // administrative functions do.
                let db = db.unwrap_or(self.host.database);
                self.rdepend.keys_snapshot(&RdependKey::relation(db, relid))
            }
            None => map
                .keys()
                .filter(|key| db.is_none() || Some(key.database_id) == db)
                .copied()
                .collect(),
        };

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(entry) = map.get(&key) else {
                continue;
            };
            let (bypass, usage, total_custom_cost, num_custom_plans) = {
                let stats = entry.stats.lock();
                (
                    stats.bypass,
                    stats.usage,
                    stats.total_custom_cost,
                    stats.num_custom_plans,
                )
            };
            out.push(EntrySnapshot {
                user_id: key.user_id,
                database_id: key.database_id,
                query_id: key.query_id,
                const_id: key.const_id,
                num_const: entry.num_const,
                bypass,
                plan_len: entry.plan.map(|chunk| chunk.len).unwrap_or(0),
                plan_time_ms: entry.plan_time_ms,
                total_custom_cost,
                num_custom_plans,
                generic_cost: entry.generic_cost,
                num_rels: entry.num_rels,
                num_rdeps: entry.num_rdeps,
                discard_counter: entry.discard_counter,
                lockers: entry.lockers.load(std::sync::atomic::Ordering::Acquire),
                usage,
                relations: if with_rels && entry.num_rels > 0 {
                    Some(entry.relation_ids(&self.shmem))
                } else {
                    None
                },
            });
        }
        out
    }
}
