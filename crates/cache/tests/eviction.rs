//! Eviction pressure and reverse-dependency overflow

mod common;

use common::{setup_with, DB};
use plancache::Config;

#[test]
fn install_past_capacity_triggers_an_eviction_pass() {
    let ctx = setup_with(Config {
        max_entries: 5,
        min_plan_time_ms: 0.0,
        ..Config::default()
    });

    let mut rels = Vec::new();
    for i in 0..6 {
        rels.push(ctx.host.catalog.add_table(format!("t{i}")));
    }

    for (i, relid) in rels.iter().enumerate() {
        ctx.plan_times(&ctx.select(200 + i as u64, &[*relid], &[]), 1);
    }

    // The sixth install found the table full: one pass evicted
    // max(10, ceil(5% of 5)) entries, capped at the 5 resident ones, so
    // only the newcomer survives.
    assert_eq!(ctx.cache.len(), 1);
    let survivors = ctx.cache.entries(None, None, false);
    assert_eq!(survivors[0].query_id, 205);
    assert_eq!(ctx.cache.info().dealloc, 1);

    // Every evicted entry dropped its reverse dependencies with it.
    for relid in &rels[..5] {
        assert!(!ctx.cache.has_relation_dependency(DB, *relid));
    }
    assert!(ctx.cache.has_relation_dependency(DB, rels[5]));
}

#[test]
fn eviction_pass_decays_usage_and_records_the_median() {
    let ctx = setup_with(Config {
        max_entries: 3,
        min_plan_time_ms: 0.0,
        ..Config::default()
    });
    let t = ctx.host.catalog.add_table("t");

    for i in 0..3 {
        ctx.plan_times(&ctx.select(210 + i, &[t], &[]), 1);
    }
    let before = ctx.cache.median_usage();

    // Fourth install forces a pass.
    ctx.plan_times(&ctx.select(213, &[t], &[]), 1);
    assert_eq!(ctx.cache.info().dealloc, 1);
    assert_ne!(ctx.cache.median_usage(), before, "median recomputed");
}

#[test]
fn rdepend_overflow_refuses_the_install_and_clears_the_fanout() {
    let ctx = setup_with(Config {
        rdepend_max: 2,
        min_plan_time_ms: 0.0,
        ..Config::default()
    });
    let t = ctx.host.catalog.add_table("t");

    ctx.plan_times(&ctx.select(220, &[t], &[]), 1);
    ctx.plan_times(&ctx.select(221, &[t], &[]), 1);
    assert_eq!(ctx.cache.len(), 2);

    // A third entry would push the fan-out past the cap: the install is
    // refused, and every entry referencing the dependency is preemptively
    // evicted rather than tracked past it.
    ctx.plan_times(&ctx.select(222, &[t], &[]), 1);

    assert!(
        ctx.snapshot_for(222).is_none(),
        "overflowing install must not create an entry"
    );
    assert!(ctx.cache.is_empty());
    assert!(
        !ctx.cache.has_relation_dependency(DB, t),
        "no dangling fan-out"
    );
    // Nothing staged leaked into the shared arena.
    assert_eq!(ctx.cache.info().alloced_size, 0);
    assert_eq!(ctx.host.allocator.used(), 0);
}

#[test]
fn out_of_shared_memory_skips_the_install() {
    let ctx = {
        use plancache::{SharedPlanCache, Session};
        use plancache_host_memory::{MemoryAllocator, MemoryHost};
        use std::sync::Arc;

        let host = MemoryHost::new(DB);
        // Room for nothing: every allocation fails.
        let mut bundle = host.host();
        bundle.allocator = Arc::new(MemoryAllocator::with_capacity(8));
        let cache = Arc::new(SharedPlanCache::new(
            Config {
                min_plan_time_ms: 0.0,
                ..Config::default()
            },
            bundle,
        ));
        common::TestContext {
            host,
            cache,
            session: Session::new(common::USER),
        }
    };

    let t = ctx.host.catalog.add_table("t");
    let query = ctx.select(230, &[t], &[]);
    // The user query never fails because the cache could not store.
    ctx.plan_times(&query, 3);
    assert!(ctx.cache.is_empty());
    assert_eq!(ctx.cache.info().alloced_size, 0);
}
