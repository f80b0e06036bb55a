//! Planned statement representation
//!
//! Plan nodes form a tree with per-node cost estimates. The cache treats
//! the tree as an opaque, serializable blob; the only field it ever
//! rewrites is the root node's `total_cost`.

use crate::ids::{CatalogClass, LockMode, Oid};
use serde::{Deserialize, Serialize};

/// Planner cost constants shared with the host's own session-local plan
/// cache. `cost::PLANCACHE_THRESHOLD` is the number of custom plans the
/// host generates before it considers switching to a generic plan.
pub mod cost {
    pub const CPU_OPERATOR_COST: f64 = 0.0025;
    pub const PLANCACHE_THRESHOLD: i64 = 5;
}

/// The output of one planning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStatement {
    pub plan: PlanTree,
    /// Every relation the plan references, with the lock mode execution
    /// will take on it.
    pub range_table: Vec<PlannedRelation>,
    /// Non-relation objects (types, routines) the plan's validity depends
    /// on, identified by their system-cache hash.
    pub inval_items: Vec<InvalItem>,
}

impl PlannedStatement {
    /// Distinct relation ids referenced by the plan, in range-table order.
    pub fn relation_ids(&self) -> Vec<Oid> {
        let mut oids: Vec<Oid> = Vec::with_capacity(self.range_table.len());
        for pr in &self.range_table {
            if !oids.contains(&pr.relid) {
                oids.push(pr.relid);
            }
        }
        oids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedRelation {
    pub relid: Oid,
    pub lock_mode: LockMode,
}

/// A plan-invalidation item: a non-relation dependency whose identity the
/// host guarantees only through its system-cache hash value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvalItem {
    pub class: CatalogClass,
    pub hash: u32,
}

/// One node of a plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTree {
    pub node: PlanNodeKind,
    pub startup_cost: f64,
    pub total_cost: f64,
    pub rows: f64,
    pub children: Vec<PlanTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanNodeKind {
    SeqScan { relation: Oid },
    IndexScan { relation: Oid, index: Oid },
    Result,
    NestLoop,
    HashJoin,
    Sort,
    Aggregate,
    Limit,
    ModifyTable { relation: Oid },
}
