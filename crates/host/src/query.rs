//! Analyzed query tree
//!
//! A deliberately small rendition of what the host's analyzer hands to the
//! planner: enough structure for the cache to fingerprint a query and walk
//! it for constants, function references and dependency-relevant
//! discriminators. The host's normalizer is responsible for `query_id`.

use crate::ids::{LockMode, Oid};
use serde::{Deserialize, Serialize};

/// Top-level command of an analyzed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Select,
    Insert,
    Update,
    Delete,
    Utility,
}

/// An analyzed query, ready for planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Normalized query identifier supplied by the host; zero when the
    /// host did not compute one.
    pub query_id: u64,
    pub command: CommandKind,
    /// True when row-level security applies to any referenced relation.
    pub has_row_security: bool,
    pub range_table: Vec<RangeTableEntry>,
    pub target_list: Vec<TargetEntry>,
    pub quals: Option<Expr>,
    pub limit: Option<LimitClause>,
}

impl Query {
    pub fn is_utility(&self) -> bool {
        self.command == CommandKind::Utility
    }
}

/// One range-table entry of an analyzed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeTableEntry {
    pub kind: RangeTableKind,
    /// Column names assigned by an alias clause, if any.
    pub alias_columns: Vec<String>,
    /// Whether inheritance expansion applies (`FROM tbl` vs `FROM ONLY tbl`).
    pub inherit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeTableKind {
    Relation { relid: Oid, lock_mode: LockMode },
    Subquery(Box<Query>),
}

/// One output column of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub expr: Expr,
    /// Output column name; `None` for junk entries.
    pub name: Option<String>,
}

/// Expression tree, restricted to the node kinds the cache inspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal constant, carried as its canonical textual serialization.
    Const { text: String },
    /// A bound-parameter reference.
    Param { index: u32, collation: Option<Oid> },
    /// A column reference.
    Column { name: String },
    /// An operator invocation.
    Op { name: String, args: Vec<Expr> },
    /// A function invocation.
    FuncCall { func: Oid, args: Vec<Expr> },
    /// A cast to a named type or domain.
    Cast { type_oid: Oid, arg: Box<Expr> },
    /// A `GROUPING(...)` reference with its query-level offset.
    Grouping { level: u32, args: Vec<Expr> },
    /// An XML constructor, which may carry an element name the normalizer
    /// does not fold into `query_id`.
    Xml { element_name: Option<String>, args: Vec<Expr> },
    /// A sublink to a nested query.
    Subquery(Box<Query>),
}

/// Limit clause modality (`FETCH FIRST .. ROWS ONLY` vs `WITH TIES`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitModality {
    Only,
    WithTies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitClause {
    pub count: Box<Expr>,
    pub modality: LimitModality,
}

/// Bound parameter values for one planning request. The cache only cares
/// about their presence; the planner consumes the actual values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub values: Vec<String>,
}

impl Params {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
