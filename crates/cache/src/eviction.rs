//! Eviction engine
//!
//! Usage-weighted approximate-LRU: every pass decays all usage values,
//! records the median, then evicts the lowest-usage fraction. Successful
//! cache uses add the entry's planning time to its usage, so plans that
//! were expensive to build are retained preferentially.

use crate::table::{EntryTable, TableMap};
use std::cmp::Ordering;

/// Decay applied to every entry's usage on each pass.
const USAGE_DECREASE_FACTOR: f64 = 0.99;

/// Fraction of entries freed at once, percent.
const USAGE_DEALLOC_PERCENT: usize = 5;

/// Deallocate the least-used entries. Caller holds the write guard.
pub(crate) fn evict_pass(table: &EntryTable, map: &mut TableMap) {
    let mut by_usage: Vec<_> = map
        .iter()
        .map(|(key, entry)| {
            let mut stats = entry.stats.lock();
            stats.usage *= USAGE_DECREASE_FACTOR;
            (*key, stats.usage)
        })
        .collect();

    by_usage.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    // The median includes the entries about to be zapped; it is only ever
    // an approximation.
    if let Some((_, median)) = by_usage.get(by_usage.len() / 2) {
        table.stats().set_median_usage(*median);
    }

    let nvictims = (by_usage.len() * USAGE_DEALLOC_PERCENT)
        .div_ceil(100)
        .max(10)
        .min(by_usage.len());

    tracing::debug!(victims = nvictims, entries = by_usage.len(), "eviction pass");

    for (key, _) in by_usage.into_iter().take(nvictims) {
        table.evict(map, &key);
    }

    table.stats().bump_dealloc();
}
