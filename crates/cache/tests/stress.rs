//! Multi-threaded smoke test: planning under concurrent DDL and resets

mod common;

use common::{setup_test, USER};
use plancache::Session;
use plancache_host::{
    DropObjectKind, DropStatement, Oid, Params, QualifiedName, UtilityStatement,
};
use std::sync::Arc;
use std::thread;

#[test]
fn planning_survives_concurrent_ddl_and_resets() {
    let ctx = setup_test();
    let tables: Vec<Oid> = (0..4)
        .map(|i| ctx.host.catalog.add_table(format!("t{i}")))
        .collect();
    // A table that gets dropped and recreated while planners run.
    ctx.host.catalog.add_table("churn");

    let mut handles = Vec::new();

    for worker in 0..4u64 {
        let cache = Arc::clone(&ctx.cache);
        let tables = tables.clone();
        handles.push(thread::spawn(move || {
            let session = Session::new(Oid(USER.0 + worker as u32));
            let params = Params::new(vec!["1".into()]);
            for round in 0..50u64 {
                let relid = tables[(round % tables.len() as u64) as usize];
                let query = common::select_query(500 + (round % 8), &[relid], &[]);
                cache
                    .plan(&session, &query, Some(&params))
                    .expect("planning never fails for live tables");
                session.end_transaction();
            }
        }));
    }

    {
        let cache = Arc::clone(&ctx.cache);
        let catalog = ctx.host.catalog.clone();
        handles.push(thread::spawn(move || {
            let session = Session::new(Oid(999));
            for round in 0..20 {
                let stmt = UtilityStatement::Drop(DropStatement {
                    kind: DropObjectKind::Table,
                    objects: vec![QualifiedName::new("churn")],
                    functions: vec![],
                    concurrent: false,
                });
                cache.process_utility(&session, &stmt).expect("drop churn");
                session.end_transaction();
                catalog.add_table("churn");
                if round % 5 == 0 {
                    cache.reset(None, None, 0);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("worker panicked");
    }

    // Quiescent again: the books must balance.
    assert_eq!(
        ctx.cache.info().alloced_size,
        ctx.host.allocator.used() as i64
    );
    for snap in ctx.cache.entries(None, None, true) {
        assert_eq!(snap.lockers, 0, "no locker survives quiescence");
        assert!(snap.num_custom_plans >= 1);
    }
}
