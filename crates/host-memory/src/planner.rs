//! Toy cost-based planner
//!
//! Produces a sequential-scan plan over the query's range table with a
//! deterministic cost model: bound parameters make the plan cheaper than
//! the generic shape by a configurable surcharge. Tests can override the
//! costs per query id and inject an artificial planning delay.

use crate::catalog::MemoryCatalog;
use parking_lot::Mutex;
use plancache_host::{
    HostError, HostResult, LockMode, Oid, Params, PlanNodeKind, PlanTree, PlannedRelation,
    PlannedStatement, Planner, Query, RangeTableKind, Syscache,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const COST_PER_RELATION: f64 = 100.0;
const COST_PER_CONST: f64 = 10.0;
const DEFAULT_GENERIC_SURCHARGE: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
pub struct CostOverride {
    pub custom: f64,
    pub generic: f64,
}

pub struct MemoryPlanner {
    catalog: Arc<MemoryCatalog>,
    generic_surcharge: Mutex<f64>,
    overrides: Mutex<HashMap<u64, CostOverride>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryPlanner {
    pub fn new(catalog: Arc<MemoryCatalog>) -> Self {
        Self {
            catalog,
            generic_surcharge: Mutex::new(DEFAULT_GENERIC_SURCHARGE),
            overrides: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
        }
    }

    /// Extra cost a generic plan carries over a parameter-bound one.
    pub fn set_generic_surcharge(&self, surcharge: f64) {
        *self.generic_surcharge.lock() = surcharge;
    }

    pub fn set_cost_override(&self, query_id: u64, over: CostOverride) {
        self.overrides.lock().insert(query_id, over);
    }

    /// Sleep this long on every planning request, to push measured plan
    /// time over a configured threshold.
    pub fn set_plan_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    fn relations(query: &Query, out: &mut Vec<(Oid, LockMode)>) {
        for rte in &query.range_table {
            match &rte.kind {
                RangeTableKind::Relation { relid, lock_mode } => {
                    out.push((*relid, *lock_mode));
                }
                RangeTableKind::Subquery(sub) => Self::relations(sub, out),
            }
        }
    }

    fn count_consts(query: &Query) -> usize {
        fn walk(expr: &plancache_host::Expr, n: &mut usize) {
            use plancache_host::Expr;
            match expr {
                Expr::Const { .. } => *n += 1,
                Expr::Op { args, .. }
                | Expr::FuncCall { args, .. }
                | Expr::Grouping { args, .. }
                | Expr::Xml { args, .. } => args.iter().for_each(|a| walk(a, n)),
                Expr::Cast { arg, .. } => walk(arg, n),
                Expr::Subquery(sub) => *n += MemoryPlanner::count_consts(sub),
                Expr::Param { .. } | Expr::Column { .. } => {}
            }
        }
        let mut n = 0;
        for te in &query.target_list {
            walk(&te.expr, &mut n);
        }
        if let Some(quals) = &query.quals {
            walk(quals, &mut n);
        }
        n
    }
}

impl Planner for MemoryPlanner {
    fn plan(&self, query: &Query, params: Option<&Params>) -> HostResult<PlannedStatement> {
        if let Some(delay) = *self.delay.lock() {
            std::thread::sleep(delay);
        }

        let mut rels = Vec::new();
        Self::relations(query, &mut rels);
        for (relid, _) in &rels {
            if self.catalog.relation_kind(*relid).is_none() {
                return Err(HostError::RelationNotFound(relid.to_string()));
            }
        }

        let base =
            COST_PER_RELATION * rels.len().max(1) as f64 + COST_PER_CONST * Self::count_consts(query) as f64;
        let total_cost = match self.overrides.lock().get(&query.query_id) {
            Some(over) if params.is_some() => over.custom,
            Some(over) => over.generic,
            None if params.is_some() => base,
            None => base + *self.generic_surcharge.lock(),
        };

        let children: Vec<PlanTree> = rels
            .iter()
            .map(|(relid, _)| PlanTree {
                node: PlanNodeKind::SeqScan { relation: *relid },
                startup_cost: 0.0,
                total_cost: COST_PER_RELATION,
                rows: 1000.0,
                children: vec![],
            })
            .collect();

        Ok(PlannedStatement {
            plan: PlanTree {
                node: PlanNodeKind::Result,
                startup_cost: 0.0,
                total_cost,
                rows: 1000.0,
                children,
            },
            range_table: rels
                .into_iter()
                .map(|(relid, lock_mode)| PlannedRelation { relid, lock_mode })
                .collect(),
            inval_items: self.catalog.query_invalidation_items(query),
        })
    }
}
