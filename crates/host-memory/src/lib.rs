//! In-memory implementation of the plan cache host services
//!
//! Provides a mutable catalog, a toy cost-based planner, an accounting
//! shared-memory arena, a recording lock manager and a DDL executor that
//! mutates the catalog, wired into a [`plancache_host::Host`] bundle:
//! everything the cache core needs from a host. Used by the core's
//! integration tests and by embedders that want a self-contained setup.

mod allocator;
mod catalog;
mod executor;
mod locks;
mod planner;

pub use allocator::MemoryAllocator;
pub use catalog::MemoryCatalog;
pub use executor::MemoryExecutor;
pub use locks::MemoryLocks;
pub use planner::{CostOverride, MemoryPlanner};

use plancache_host::{Host, Oid, TransactionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Settable transaction-block flag.
#[derive(Default)]
pub struct MemoryTxn {
    in_block: AtomicBool,
}

impl MemoryTxn {
    pub fn set_in_transaction_block(&self, value: bool) {
        self.in_block.store(value, Ordering::SeqCst);
    }
}

impl TransactionState for MemoryTxn {
    fn in_transaction_block(&self) -> bool {
        self.in_block.load(Ordering::SeqCst)
    }
}

/// Concrete service handles behind a [`Host`] bundle, kept around so tests
/// can drive the host side directly.
#[derive(Clone)]
pub struct MemoryHost {
    pub catalog: Arc<MemoryCatalog>,
    pub planner: Arc<MemoryPlanner>,
    pub allocator: Arc<MemoryAllocator>,
    pub locks: Arc<MemoryLocks>,
    pub txn: Arc<MemoryTxn>,
    pub executor: Arc<MemoryExecutor>,
}

impl MemoryHost {
    /// Build a fully wired in-memory host for the given database.
    pub fn new(database: Oid) -> Self {
        let catalog = Arc::new(MemoryCatalog::new(database));
        let planner = Arc::new(MemoryPlanner::new(catalog.clone()));
        let allocator = Arc::new(MemoryAllocator::unbounded());
        let locks = Arc::new(MemoryLocks::default());
        let txn = Arc::new(MemoryTxn::default());
        let executor = Arc::new(MemoryExecutor::new(catalog.clone()));
        Self {
            catalog,
            planner,
            allocator,
            locks,
            txn,
            executor,
        }
    }

    /// The service bundle handed to the cache.
    pub fn host(&self) -> Host {
        Host {
            database: self.catalog.database(),
            planner: self.planner.clone(),
            syscache: self.catalog.clone(),
            locks: self.locks.clone(),
            allocator: self.allocator.clone(),
            txn: self.txn.clone(),
            executor: self.executor.clone(),
        }
    }
}
