//! Cached-plan arbitration over repeated preparations

mod common;

use common::setup_test;
use plancache_host::cost::{CPU_OPERATOR_COST, PLANCACHE_THRESHOLD};
use plancache_host::Oid;

#[test]
fn fifth_invocation_bypasses_the_planner() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    let query = ctx.select(42, &[t], &[]);

    // First invocation installs, the next three accumulate custom stats.
    ctx.plan_times(&query, 4);

    let snap = ctx.snapshot_for(42).expect("entry installed");
    assert_eq!(snap.bypass, 0);
    assert_eq!(snap.num_custom_plans, 4);
    assert!(snap.plan_len > 0);

    // Threshold reached: the generic plan is cheaper than the custom
    // average (which carries the planner-effort surcharge), so the cached
    // plan wins.
    let result = ctx
        .cache
        .plan(&ctx.session, &query, Some(&ctx.params()))
        .unwrap();

    let snap = ctx.snapshot_for(42).unwrap();
    assert!(snap.bypass > 0, "cached plan should have been used");
    assert_eq!(snap.num_custom_plans, 4);

    // The returned cost was shaved by at least the host plan cache's
    // additive margin so that downstream layer prefers our plan.
    let margin = 1000.0 * CPU_OPERATOR_COST * (result.range_table.len() + 1) as f64
        * PLANCACHE_THRESHOLD as f64;
    assert!(
        result.plan.total_cost <= snap.generic_cost - margin,
        "total_cost {} not reduced from generic {} by margin {}",
        result.plan.total_cost,
        snap.generic_cost,
        margin
    );
    assert!(result.plan.total_cost > 0.0);
}

#[test]
fn cached_use_takes_executor_locks() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    let query = ctx.select(43, &[t], &[]);

    ctx.plan_times(&query, 4);
    ctx.host.locks.clear();

    ctx.cache
        .plan(&ctx.session, &query, Some(&ctx.params()))
        .unwrap();

    let acquired = ctx.host.locks.acquisitions();
    assert!(
        acquired.iter().any(|(oid, _)| *oid == t),
        "executor lock on the scanned relation expected, got {acquired:?}"
    );
}

#[test]
fn generic_plan_that_stays_expensive_is_not_used() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    // Make the generic plan wildly worse than any custom plan.
    ctx.host.planner.set_generic_surcharge(10_000.0);
    let query = ctx.select(44, &[t], &[]);

    ctx.plan_times(&query, 10);

    let snap = ctx.snapshot_for(44).unwrap();
    assert_eq!(snap.bypass, 0, "expensive generic plan must never win");
    assert!(snap.num_custom_plans >= 4);
}

#[test]
fn unparameterized_queries_are_not_cached() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    let query = ctx.select(45, &[t], &[]);

    for _ in 0..3 {
        ctx.cache.plan(&ctx.session, &query, None).unwrap();
    }
    assert!(ctx.cache.is_empty());
}

#[test]
fn zero_query_id_bypasses_the_cache() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    let query = ctx.select(0, &[t], &[]);

    ctx.plan_times(&query, 3);
    assert!(ctx.cache.is_empty());
}

#[test]
fn short_planning_is_not_worth_caching() {
    let ctx = common::setup_with(plancache::Config {
        min_plan_time_ms: 1_000.0,
        ..plancache::Config::default()
    });
    let t = ctx.host.catalog.add_table("t");
    let query = ctx.select(46, &[t], &[]);

    ctx.plan_times(&query, 3);
    assert!(ctx.cache.is_empty());
}

#[test]
fn disabled_cache_delegates() {
    let ctx = common::setup_with(plancache::Config {
        enabled: false,
        min_plan_time_ms: 0.0,
        ..plancache::Config::default()
    });
    let t = ctx.host.catalog.add_table("t");
    let query = ctx.select(47, &[t], &[]);

    ctx.plan_times(&query, 3);
    assert!(ctx.cache.is_empty());
}

#[test]
fn read_only_stores_nothing() {
    let ro = common::setup_with(plancache::Config {
        read_only: true,
        min_plan_time_ms: 0.0,
        ..plancache::Config::default()
    });
    let t = ro.host.catalog.add_table("t");
    let query = ro.select(48, &[t], &[]);
    ro.plan_times(&query, 3);
    assert!(ro.cache.is_empty());
}

#[test]
fn distinct_literals_get_distinct_entries() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");

    ctx.plan_times(&ctx.select(49, &[t], &["1"]), 1);
    ctx.plan_times(&ctx.select(49, &[t], &["2"]), 1);

    assert_eq!(ctx.cache.len(), 2, "const_id must discriminate literals");
    let snaps = ctx.cache.entries(Some(common::DB), None, false);
    assert_eq!(snaps.len(), 2);
    assert_ne!(snaps[0].const_id, snaps[1].const_id);
    assert!(snaps.iter().all(|s| s.num_const == 1));
}

#[test]
fn missing_relation_surfaces_host_error() {
    let ctx = setup_test();
    let query = ctx.select(50, &[Oid(9999)], &[]);
    let err = ctx
        .cache
        .plan(&ctx.session, &query, Some(&ctx.params()))
        .unwrap_err();
    assert!(matches!(err, plancache::Error::Host(_)));
}
