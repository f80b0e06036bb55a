//! Planner interceptor
//!
//! Wraps the host planner: looks the fingerprint up in the entry table,
//! arbitrates generic-vs-custom cost, returns the cached generic plan when
//! it wins, and installs a freshly built generic plan on a qualifying
//! miss. Every internal failure degrades to planning without the cache.

use crate::cache::SharedPlanCache;
use crate::error::Result;
use crate::fingerprint;
use crate::key::{CacheKey, RdependKey};
use crate::rdepend::RegisterOutcome;
use crate::session::Session;
use crate::table::{DependencyAction, StagedEntry};
use plancache_host::cost::{CPU_OPERATOR_COST, PLANCACHE_THRESHOLD};
use plancache_host::{
    CatalogClass, Params, Planner, PlannedStatement, Query, RelationLocks, Syscache,
};
use std::time::Instant;

impl SharedPlanCache {
    /// Plan a query, serving the cached generic plan when it is valid and
    /// cheaper than the custom average.
    pub fn plan(
        &self,
        session: &Session,
        query: &Query,
        params: Option<&Params>,
    ) -> Result<PlannedStatement> {
        if !self.config.enabled
            || query.query_id == 0
            || (params.is_none() && !self.config.cache_all)
            || query.is_utility()
        {
            return Ok(self.host.planner.plan(query, params)?);
        }

        let fp = match fingerprint::build(&self.host, session, query, &self.config) {
            Some(fp) => fp,
            None => return Ok(self.host.planner.plan(query, params)?),
        };
        let key = fp.key;

        let mut entry_present = false;
        let mut accum_custom_stats = false;
        // The cached plan is deserialized from a copy of the blob taken
        // under the shared lock; validity is re-checked afterwards.
        let mut candidate: Option<(PlannedStatement, i64)> = None;
        {
            let map = self.table.read();
            if let Some(entry) = map.get(&key) {
                if let Some(chunk) = entry.plan {
                    entry_present = true;
                    let discard = entry.discard_counter;
                    let (use_cached, accum) = entry.choose_cached_plan(self.config.threshold);
                    accum_custom_stats = accum;
                    if use_cached {
                        let blob = self.shmem.load(&chunk);
                        drop(map);
                        match bincode::deserialize::<PlannedStatement>(&blob) {
                            Ok(stmt) => candidate = Some((stmt, discard)),
                            Err(err) => {
                                tracing::warn!(%err, "cached plan failed to deserialize");
                            }
                        }
                    }
                }
                // A discarded plan leaves the shell in place; fall through
                // and let the miss path save a fresh one.
            }
        }

        if let Some((mut stmt, discard)) = candidate {
            // Take the locks execution needs. We never open the objects,
            // so this succeeds even if a relation was dropped meanwhile;
            // the re-probe below catches that case.
            self.acquire_executor_locks(&stmt);

            let mut bypass = 0;
            let valid = {
                let map = self.table.read();
                match map.get(&key) {
                    Some(entry) if entry.plan.is_some() && entry.discard_counter == discard => {
                        bypass = entry.stats.lock().bypass;
                        true
                    }
                    _ => false,
                }
            };

            if valid {
                self.adjust_cached_cost(&mut stmt, bypass);
                return Ok(stmt);
            }

            // A racing invalidation beat us; plan freshly and let the
            // store path repopulate the entry.
            tracing::debug!(query_id = key.query_id, "cached plan went stale during lookup");
            entry_present = false;
            accum_custom_stats = false;
        }

        let started = if entry_present { None } else { Some(Instant::now()) };
        let result = self.host.planner.plan(query, params)?;

        if let Some(started) = started {
            let plan_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            if plan_time_ms >= self.config.min_plan_time_ms
                && !self.config.read_only
                && !session.is_cache_read_only()
            {
                // The custom plan is only used for cost accounting; the
                // stored plan is a generic one, built without parameters.
                match self.host.planner.plan(query, None) {
                    Ok(generic) => {
                        self.cache_plan(query, &result, &generic, &key, plan_time_ms, fp.num_const)
                    }
                    Err(err) => {
                        tracing::debug!(%err, "generic planning failed, not caching");
                    }
                }
            }
        } else if accum_custom_stats {
            self.accumulate_custom_plan(&key, cached_plan_cost(&result, true));
        }

        Ok(result)
    }

    fn acquire_executor_locks(&self, stmt: &PlannedStatement) {
        for pr in &stmt.range_table {
            self.host.locks.lock_relation(pr.relid, pr.lock_mode);
        }
    }

    /// Nullify the host plan cache's heuristics so it prefers our shared
    /// generic plan over building its own: shave off the additive margin
    /// it grants custom plans, scaled by how often we expect to win.
    fn adjust_cached_cost(&self, stmt: &mut PlannedStatement, bypass: i64) {
        let threshold = self.config.threshold;

        // With a threshold at least as high as the host's we can never
        // beat its arbitration; hand the plan back untouched.
        if threshold >= PLANCACHE_THRESHOLD {
            return;
        }

        let nb_rels = stmt.range_table.len() as f64;
        let total_diff = (1000.0 * CPU_OPERATOR_COST * (nb_rels + 1.0)) * PLANCACHE_THRESHOLD as f64;
        let mut diff = total_diff / (PLANCACHE_THRESHOLD - threshold) as f64;
        diff += 0.01;

        if self.config.disable_plan_cache {
            if bypass > PLANCACHE_THRESHOLD - threshold {
                // Stable use demonstrated; a frankly negative cost reads
                // better than an ever-growing adjustment.
                diff = stmt.plan.total_cost * 2.0;
            } else {
                diff += stmt.plan.total_cost * 2.0 * threshold as f64;
            }
        }

        stmt.plan.total_cost -= diff;
        if !self.config.disable_plan_cache && stmt.plan.total_cost <= 0.0 {
            stmt.plan.total_cost = 0.001;
        }
    }

    /// Fold one more custom planning into the entry's running average.
    /// The threshold may have been crossed by the time we get the entry
    /// mutex; the extra data point is kept regardless.
    fn accumulate_custom_plan(&self, key: &CacheKey, custom_cost: f64) {
        let map = self.table.read();
        if let Some(entry) = map.get(key) {
            let mut stats = entry.stats.lock();
            stats.total_custom_cost += custom_cost;
            stats.num_custom_plans += 1;
        }
    }

    /// Stage the generic plan and its dependency arrays in shared memory,
    /// register the reverse dependencies, and install the entry. Any
    /// failure rolls everything back and skips caching.
    fn cache_plan(
        &self,
        query: &Query,
        custom: &PlannedStatement,
        generic: &PlannedStatement,
        key: &CacheKey,
        plan_time_ms: f64,
        num_const: usize,
    ) {
        let blob = match bincode::serialize(generic) {
            Ok(blob) => blob,
            Err(err) => {
                tracing::warn!(%err, "plan serialization failed");
                return;
            }
        };
        let plan_chunk = match self.shmem.store(&blob) {
            Some(chunk) => chunk,
            None => {
                tracing::warn!(query_id = key.query_id, "out of shared memory, plan not cached");
                return;
            }
        };

        let rels = generic.relation_ids();
        let rels_chunk = if rels.is_empty() {
            None
        } else {
            let encoded = match bincode::serialize(&rels) {
                Ok(encoded) => encoded,
                Err(_) => {
                    self.shmem.release(plan_chunk);
                    return;
                }
            };
            match self.shmem.store(&encoded) {
                Some(chunk) => Some(chunk),
                None => {
                    self.shmem.release(plan_chunk);
                    return;
                }
            }
        };

        // Non-relation dependencies: items extracted from the analyzed
        // query, unioned with the ones the planner attached to the plan.
        let mut rdeps: Vec<RdependKey> = Vec::new();
        let query_items = self.host.syscache.query_invalidation_items(query);
        for item in query_items.into_iter().chain(generic.inval_items.iter().copied()) {
            if item.class == CatalogClass::Relation {
                continue;
            }
            let rkey = RdependKey {
                database_id: key.database_id,
                class: item.class,
                object_id: item.hash,
            };
            if !rdeps.contains(&rkey) {
                rdeps.push(rkey);
            }
        }
        let rdeps_chunk = if rdeps.is_empty() {
            None
        } else {
            let encoded = match bincode::serialize(&rdeps) {
                Ok(encoded) => encoded,
                Err(_) => {
                    if let Some(chunk) = rels_chunk {
                        self.shmem.release(chunk);
                    }
                    self.shmem.release(plan_chunk);
                    return;
                }
            };
            match self.shmem.store(&encoded) {
                Some(chunk) => Some(chunk),
                None => {
                    if let Some(chunk) = rels_chunk {
                        self.shmem.release(chunk);
                    }
                    self.shmem.release(plan_chunk);
                    return;
                }
            }
        };

        let mut map = self.table.write();

        let mut failed: Option<(RegisterOutcome, RdependKey)> = None;
        let mut registered_rels = 0;
        for oid in &rels {
            let rkey = RdependKey::relation(key.database_id, *oid);
            match self.rdepend.register(rkey, key) {
                RegisterOutcome::Registered => registered_rels += 1,
                outcome => {
                    failed = Some((outcome, rkey));
                    break;
                }
            }
        }
        let mut registered_rdeps = 0;
        if failed.is_none() {
            for rkey in &rdeps {
                match self.rdepend.register(*rkey, key) {
                    RegisterOutcome::Registered => registered_rdeps += 1,
                    outcome => {
                        failed = Some((outcome, *rkey));
                        break;
                    }
                }
            }
        }

        if let Some((outcome, failed_rkey)) = failed {
            for oid in rels.iter().take(registered_rels) {
                self.rdepend
                    .unregister(&RdependKey::relation(key.database_id, *oid), key);
            }
            for rkey in rdeps.iter().take(registered_rdeps) {
                self.rdepend.unregister(rkey, key);
            }
            if let Some(chunk) = rels_chunk {
                self.shmem.release(chunk);
            }
            if let Some(chunk) = rdeps_chunk {
                self.shmem.release(chunk);
            }
            self.shmem.release(plan_chunk);

            if outcome == RegisterOutcome::Overflow {
                // A dependency past its fan-out cap stops being tracked;
                // evict everything referencing it rather than serving
                // plans we could no longer invalidate.
                self.table
                    .apply_dependency_action(&mut map, &failed_rkey, DependencyAction::Evict);
            }
            return;
        }

        let staged = StagedEntry {
            plan: plan_chunk,
            rels: rels_chunk,
            num_rels: rels.len(),
            rdeps: rdeps_chunk,
            num_rdeps: rdeps.len(),
            num_const,
            plan_time_ms,
            generic_cost: cached_plan_cost(generic, false),
            custom_cost: cached_plan_cost(custom, true),
        };
        self.table.install(&mut map, *key, staged);
    }
}

/// Estimated cost of a plan. With `include_planner`, a crude estimate of
/// the planning effort (scaled by the finished plan's range-table size)
/// is added, the way the host's own plan cache accounts for custom plans.
pub(crate) fn cached_plan_cost(stmt: &PlannedStatement, include_planner: bool) -> f64 {
    let mut result = stmt.plan.total_cost;
    if include_planner {
        let nrelations = stmt.range_table.len() as f64;
        result += 1000.0 * CPU_OPERATOR_COST * (nrelations + 1.0);
    }
    result
}
