//! Host services consumed by the cache core

use crate::ids::{CatalogClass, LockMode, Oid, QualifiedName, RelationKind, RelationPersistence};
use crate::plan::{InvalItem, PlannedStatement};
use crate::query::{Params, Query};
use crate::utility::UtilityStatement;
use std::sync::Arc;
use thiserror::Error;

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Errors surfaced by host services. The cache absorbs none of these; they
/// propagate to the caller exactly as a direct host invocation would.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    #[error("relation not found: {0}")]
    RelationNotFound(String),

    #[error("function not found: {0}")]
    FunctionNotFound(String),

    #[error("type not found: {0}")]
    TypeNotFound(String),

    #[error("permission denied for function {0}")]
    FunctionPermission(Oid),

    #[error("planning failed: {0}")]
    Planning(String),

    #[error("utility execution failed: {0}")]
    Utility(String),
}

/// The host's planner. The cache wraps this to interpose lookup and
/// caching; `params` is `None` when a generic plan is requested.
pub trait Planner: Send + Sync {
    fn plan(&self, query: &Query, params: Option<&Params>) -> HostResult<PlannedStatement>;
}

/// Catalog lookups backed by the host's system caches.
pub trait Syscache: Send + Sync {
    /// Identity hash of a catalog object; the only stable identity the
    /// host guarantees for non-relation dependencies.
    fn hash_of(&self, class: CatalogClass, oid: Oid) -> u32;

    fn relation_kind(&self, oid: Oid) -> Option<RelationKind>;

    fn relation_persistence(&self, oid: Oid) -> Option<RelationPersistence>;

    /// Number of rewrite rules attached to a relation. A simple view
    /// reports exactly one (its `_RETURN` rule).
    fn relation_rule_count(&self, oid: Oid) -> usize;

    fn relation_name(&self, oid: Oid) -> Option<String>;

    /// Direct inheritance parents of a relation.
    fn inheritance_parents(&self, oid: Oid) -> Vec<Oid>;

    /// Every inheritor of a relation, transitively.
    fn all_inheritors(&self, oid: Oid) -> Vec<Oid>;

    /// Partition ancestors of a relation, nearest first.
    fn partition_ancestors(&self, oid: Oid) -> Vec<Oid>;

    /// The table an index is built on.
    fn index_relation(&self, index: Oid) -> Option<Oid>;

    fn resolve_relation(&self, name: &QualifiedName) -> Option<Oid>;

    fn resolve_function(&self, name: &QualifiedName, args: &[Oid]) -> Option<Oid>;

    fn resolve_type(&self, name: &QualifiedName) -> Option<Oid>;

    /// Whether `user` may execute the function; `None` is the bootstrap
    /// superuser.
    fn function_is_executable(&self, func: Oid, user: Option<Oid>) -> bool;

    /// Non-relation invalidation items referenced by an analyzed query.
    fn query_invalidation_items(&self, query: &Query) -> Vec<InvalItem>;

    fn database_name(&self, db: Oid) -> String;
}

/// Transient executor-grade relation locks. Acquisition never opens the
/// object, so it succeeds even when the relation has been dropped.
pub trait RelationLocks: Send + Sync {
    fn lock_relation(&self, oid: Oid, mode: LockMode);
    fn unlock_relation(&self, oid: Oid, mode: LockMode);
}

/// Handle into the host's process-shared dynamic allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmHandle(pub u64);

/// The host's process-shared dynamic allocator. `alloc` returns `None`
/// when shared memory is exhausted; callers must cope without aborting.
pub trait SharedAllocator: Send + Sync {
    fn alloc(&self, size: usize) -> Option<ShmHandle>;
    fn free(&self, handle: ShmHandle, size: usize);
    fn write(&self, handle: ShmHandle, bytes: &[u8]);
    fn read(&self, handle: ShmHandle, len: usize) -> Vec<u8>;
}

/// Transaction visibility the cache needs around utility execution.
pub trait TransactionState: Send + Sync {
    fn in_transaction_block(&self) -> bool;
}

/// Executes a utility statement on the host. The cache wraps this to
/// interpose invalidation before and after execution.
pub trait UtilityExecutor: Send + Sync {
    fn execute(&self, stmt: &UtilityStatement) -> HostResult<()>;
}

/// Bundle of every host service handed to the cache at startup.
#[derive(Clone)]
pub struct Host {
    /// The database this backend is connected to; every cache entry is
    /// scoped to it.
    pub database: Oid,
    pub planner: Arc<dyn Planner>,
    pub syscache: Arc<dyn Syscache>,
    pub locks: Arc<dyn RelationLocks>,
    pub allocator: Arc<dyn SharedAllocator>,
    pub txn: Arc<dyn TransactionState>,
    pub executor: Arc<dyn UtilityExecutor>,
}
