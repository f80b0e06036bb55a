//! DDL executor over the in-memory catalog

use crate::catalog::MemoryCatalog;
use parking_lot::Mutex;
use plancache_host::{
    AlterTableCmd, HostError, HostResult, Syscache, UtilityExecutor, UtilityStatement,
};
use std::sync::Arc;

type ExecHook = Box<dyn FnMut() + Send>;

/// Applies utility statements to the catalog. A test hook, when set, runs
/// in the middle of execution so tests can observe the cache inside the
/// window of a concurrent-style command.
pub struct MemoryExecutor {
    catalog: Arc<MemoryCatalog>,
    hook: Mutex<Option<ExecHook>>,
}

impl MemoryExecutor {
    pub fn new(catalog: Arc<MemoryCatalog>) -> Self {
        Self {
            catalog,
            hook: Mutex::new(None),
        }
    }

    pub fn set_execution_hook(&self, hook: impl FnMut() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn clear_execution_hook(&self) {
        *self.hook.lock() = None;
    }
}

impl UtilityExecutor for MemoryExecutor {
    fn execute(&self, stmt: &UtilityStatement) -> HostResult<()> {
        tracing::debug!(?stmt, "executing utility statement");
        if let Some(hook) = self.hook.lock().as_mut() {
            hook();
        }

        match stmt {
            UtilityStatement::Drop(drop) => {
                for name in &drop.objects {
                    if let Some(oid) = self.catalog.resolve_relation(name) {
                        self.catalog.remove_relation(oid);
                    }
                }
                for func in &drop.functions {
                    if let Some(oid) = self.catalog.resolve_function(&func.name, &func.args) {
                        self.catalog.remove_function(oid);
                    }
                }
            }
            UtilityStatement::AlterTable(alter) => {
                let target = self
                    .catalog
                    .resolve_relation(&alter.target)
                    .ok_or_else(|| HostError::RelationNotFound(alter.target.to_string()))?;
                for cmd in &alter.cmds {
                    match cmd {
                        AlterTableCmd::AttachPartition { partition } => {
                            if let Some(part) = self.catalog.resolve_relation(partition) {
                                self.catalog.set_parent(part, target);
                            }
                        }
                        AlterTableCmd::DetachPartition { partition, .. }
                        | AlterTableCmd::DetachPartitionFinalize { partition } => {
                            if let Some(part) = self.catalog.resolve_relation(partition) {
                                self.catalog.clear_parents(part);
                            }
                        }
                        // Column-level changes have no catalog shape here.
                        _ => {}
                    }
                }
            }
            UtilityStatement::CreateIndex(stmt) => {
                let table = self
                    .catalog
                    .resolve_relation(&stmt.relation)
                    .ok_or_else(|| HostError::RelationNotFound(stmt.relation.to_string()))?;
                self.catalog
                    .add_index(format!("{}_idx", stmt.relation.name), table);
            }
            UtilityStatement::CreateTable(stmt) => {
                let oid = self.catalog.add_table(stmt.name.name.clone());
                for parent in &stmt.inherit_parents {
                    if let Some(parent_oid) = self.catalog.resolve_relation(parent) {
                        self.catalog.set_parent(oid, parent_oid);
                    }
                }
            }
            UtilityStatement::CreateFunction(stmt) => {
                // CREATE OR REPLACE keeps the existing oid; a plain CREATE
                // allocates a fresh one.
                let existing = self
                    .catalog
                    .resolve_function(&stmt.function.name, &stmt.function.args);
                if existing.is_none() {
                    self.catalog
                        .add_function(stmt.function.name.name.clone(), stmt.function.args.clone());
                } else if !stmt.replace {
                    return Err(HostError::Utility(format!(
                        "function {} already exists",
                        stmt.function.name
                    )));
                }
            }
            // No catalog shape to change for these.
            UtilityStatement::AlterDomain { .. }
            | UtilityStatement::AlterFunction { .. }
            | UtilityStatement::Reindex(_)
            | UtilityStatement::AlterTsDictionary { .. }
            | UtilityStatement::Other(_) => {}
        }

        Ok(())
    }
}
