//! Host database types and service traits consumed by the shared plan cache
//!
//! The cache core never talks to a concrete database. Everything it needs
//! from the host (planning, catalog lookups, relation locks, the
//! process-shared allocator, transaction state, utility execution) is
//! expressed here as small `Send + Sync` traits, bundled into a [`Host`]
//! handle. Production embedders implement these against the real engine;
//! `plancache-host-memory` provides a self-contained in-memory
//! implementation for tests.

mod ids;
mod plan;
mod query;
mod services;
mod utility;

pub use ids::{CatalogClass, LockMode, Oid, QualifiedName, RelationKind, RelationPersistence};
pub use plan::{
    cost, InvalItem, PlanNodeKind, PlanTree, PlannedRelation, PlannedStatement,
};
pub use query::{
    CommandKind, Expr, LimitClause, LimitModality, Params, Query, RangeTableEntry,
    RangeTableKind, TargetEntry,
};
pub use services::{
    Host, HostError, HostResult, Planner, RelationLocks, SharedAllocator, ShmHandle, Syscache,
    TransactionState, UtilityExecutor,
};
pub use utility::{
    AlterTableCmd, AlterTableStatement, CreateFunctionStatement, CreateIndexStatement,
    CreateTableStatement, DropObjectKind, DropStatement, FunctionRef, ReindexStatement,
    ReindexTarget, UtilityStatement,
};
