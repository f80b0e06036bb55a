//! Cacheability rejection policy and fingerprint discrimination

mod common;

use common::{select_query, setup_test};
use plancache::{Config, Session};
use plancache_host::{
    CommandKind, Expr, LockMode, Oid, Query, RangeTableEntry, RangeTableKind, TargetEntry,
};

#[test]
fn temp_table_references_are_never_cached() {
    let ctx = setup_test();
    let temp = ctx.host.catalog.add_temp_table("scratch");
    let query = ctx.select(60, &[temp], &[]);

    ctx.plan_times(&query, 3);
    assert!(ctx.cache.is_empty());
}

#[test]
fn simple_views_are_cacheable_but_rule_bearing_relations_are_not() {
    let ctx = setup_test();
    let simple = ctx.host.catalog.add_view("v1", 1);
    let rewritten = ctx.host.catalog.add_view("v2", 2);

    ctx.plan_times(&ctx.select(61, &[simple], &[]), 1);
    assert_eq!(ctx.cache.len(), 1, "single _RETURN rule view is fine");

    ctx.plan_times(&ctx.select(62, &[rewritten], &[]), 1);
    assert_eq!(ctx.cache.len(), 1, "multi-rule view must be rejected");
}

#[test]
fn utility_statements_are_rejected() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    let mut query = ctx.select(63, &[t], &[]);
    query.command = CommandKind::Utility;

    ctx.plan_times(&query, 2);
    assert!(ctx.cache.is_empty());
}

#[test]
fn inaccessible_function_rejects_the_query() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    let func = ctx.host.catalog.add_function("secret", vec![]);
    ctx.host.catalog.restrict_function(func, [Oid(999)]);

    let mut query = ctx.select(64, &[t], &[]);
    query.target_list.push(TargetEntry {
        expr: Expr::FuncCall { func, args: vec![] },
        name: Some("secret".into()),
    });

    // Plans fine (the host would raise the permission error at execution),
    // but nothing is cached.
    ctx.plan_times(&query, 2);
    assert!(ctx.cache.is_empty());
}

#[test]
fn alias_column_names_discriminate() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");

    let mut one = ctx.select(65, &[t], &[]);
    one.range_table[0].alias_columns = vec!["a".into()];
    let mut two = ctx.select(65, &[t], &[]);
    two.range_table[0].alias_columns = vec!["b".into()];

    ctx.plan_times(&one, 1);
    ctx.plan_times(&two, 1);
    assert_eq!(ctx.cache.len(), 2, "row_to_json()-style output depends on aliases");
}

#[test]
fn output_column_names_discriminate() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");

    let mut one = ctx.select(66, &[t], &[]);
    one.target_list[0].name = Some("x".into());
    let mut two = ctx.select(66, &[t], &[]);
    two.target_list[0].name = Some("y".into());

    ctx.plan_times(&one, 1);
    ctx.plan_times(&two, 1);
    assert_eq!(ctx.cache.len(), 2);
}

#[test]
fn inheritance_flag_discriminates() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");

    let mut plain = ctx.select(67, &[t], &[]);
    plain.range_table[0].inherit = true;
    let mut only = ctx.select(67, &[t], &[]);
    only.range_table[0].inherit = false;

    ctx.plan_times(&plain, 1);
    ctx.plan_times(&only, 1);
    assert_eq!(ctx.cache.len(), 2, "FROM t and FROM ONLY t are different queries");
}

#[test]
fn row_level_security_isolates_users() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    let mut query = ctx.select(68, &[t], &[]);
    query.has_row_security = true;

    let alice = Session::new(Oid(20));
    let bob = Session::new(Oid(21));
    ctx.cache.plan(&alice, &query, Some(&ctx.params())).unwrap();
    ctx.cache.plan(&bob, &query, Some(&ctx.params())).unwrap();

    let snaps = ctx.cache.entries(None, None, false);
    assert_eq!(snaps.len(), 2, "one entry per user under RLS");
    assert!(snaps.iter().any(|s| s.user_id == Some(Oid(20))));
    assert!(snaps.iter().any(|s| s.user_id == Some(Oid(21))));
    assert!(snaps.iter().all(|s| s.plan_len > 0));

    // Without RLS both users share the sentinel entry.
    query.has_row_security = false;
    query.query_id = 69;
    ctx.cache.plan(&alice, &query, Some(&ctx.params())).unwrap();
    ctx.cache.plan(&bob, &query, Some(&ctx.params())).unwrap();
    let shared: Vec<_> = ctx
        .cache
        .entries(None, None, false)
        .into_iter()
        .filter(|s| s.query_id == 69)
        .collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].user_id, None);
}

#[test]
fn cache_all_mode_caches_parameterless_queries() {
    let ctx = common::setup_with(Config {
        cache_all: true,
        min_plan_time_ms: 0.0,
        ..Config::default()
    });
    let t = ctx.host.catalog.add_table("t");
    let query = select_query(70, &[t], &["5"]);

    ctx.cache.plan(&ctx.session, &query, None).unwrap();
    assert_eq!(ctx.cache.len(), 1);

    // Same query id, different output name: the folded result descriptor
    // keeps them apart.
    let mut renamed = select_query(70, &[t], &["5"]);
    renamed.target_list[0].name = Some("renamed".into());
    ctx.cache.plan(&ctx.session, &renamed, None).unwrap();
    assert_eq!(ctx.cache.len(), 2);
}

#[test]
fn subquery_constants_are_folded() {
    let ctx = setup_test();
    let t = ctx.host.catalog.add_table("t");
    let inner_a = select_query(0, &[t], &["1"]);
    let inner_b = select_query(0, &[t], &["2"]);

    let make = |inner: Query| Query {
        query_id: 71,
        command: CommandKind::Select,
        has_row_security: false,
        range_table: vec![RangeTableEntry {
            kind: RangeTableKind::Relation {
                relid: t,
                lock_mode: LockMode::AccessShare,
            },
            alias_columns: vec![],
            inherit: false,
        }],
        target_list: vec![TargetEntry {
            expr: Expr::Subquery(Box::new(inner)),
            name: Some("sub".into()),
        }],
        quals: Some(Expr::Param {
            index: 0,
            collation: None,
        }),
        limit: None,
    };

    ctx.cache
        .plan(&ctx.session, &make(inner_a), Some(&ctx.params()))
        .unwrap();
    ctx.cache
        .plan(&ctx.session, &make(inner_b), Some(&ctx.params()))
        .unwrap();
    assert_eq!(ctx.cache.len(), 2);
    let snaps = ctx.cache.entries(None, None, false);
    assert!(snaps.iter().all(|s| s.num_const == 1));
}
