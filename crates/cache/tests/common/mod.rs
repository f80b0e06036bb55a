//! Shared test harness: an in-memory host wired to a cache instance.

use plancache::{Config, SharedPlanCache, Session};
use plancache_host::{
    CommandKind, Expr, LockMode, Oid, Params, Query, RangeTableEntry, RangeTableKind, TargetEntry,
};
use plancache_host_memory::MemoryHost;
use std::sync::Arc;

pub const DB: Oid = Oid(1);
pub const USER: Oid = Oid(10);

pub struct TestContext {
    pub host: MemoryHost,
    pub cache: Arc<SharedPlanCache>,
    pub session: Session,
}

/// Cache over a fresh in-memory host; plans of any duration are cached.
pub fn setup_test() -> TestContext {
    setup_with(Config {
        min_plan_time_ms: 0.0,
        ..Config::default()
    })
}

pub fn setup_with(config: Config) -> TestContext {
    let host = MemoryHost::new(DB);
    let cache = Arc::new(SharedPlanCache::new(config, host.host()));
    TestContext {
        host,
        cache,
        session: Session::new(USER),
    }
}

impl TestContext {
    /// `SELECT id FROM <rels> WHERE id = $1 [AND ...consts]`
    pub fn select(&self, query_id: u64, rels: &[Oid], consts: &[&str]) -> Query {
        select_query(query_id, rels, consts)
    }

    pub fn params(&self) -> Params {
        Params::new(vec!["1".into()])
    }

    /// Plan the query `n` times with a bound parameter.
    pub fn plan_times(&self, query: &Query, n: usize) {
        for _ in 0..n {
            self.cache
                .plan(&self.session, query, Some(&self.params()))
                .expect("planning should succeed");
        }
    }

    pub fn snapshot_for(&self, query_id: u64) -> Option<plancache::EntrySnapshot> {
        self.cache
            .entries(None, None, true)
            .into_iter()
            .find(|entry| entry.query_id == query_id)
    }
}

pub fn select_query(query_id: u64, rels: &[Oid], consts: &[&str]) -> Query {
    let mut args: Vec<Expr> = vec![
        Expr::Column { name: "id".into() },
        Expr::Param {
            index: 0,
            collation: None,
        },
    ];
    args.extend(consts.iter().map(|text| Expr::Const {
        text: (*text).into(),
    }));

    Query {
        query_id,
        command: CommandKind::Select,
        has_row_security: false,
        range_table: rels
            .iter()
            .map(|relid| RangeTableEntry {
                kind: RangeTableKind::Relation {
                    relid: *relid,
                    lock_mode: LockMode::AccessShare,
                },
                alias_columns: vec![],
                inherit: false,
            })
            .collect(),
        target_list: vec![TargetEntry {
            expr: Expr::Column { name: "id".into() },
            name: Some("id".into()),
        }],
        quals: Some(Expr::Op {
            name: "=".into(),
            args,
        }),
        limit: None,
    }
}
