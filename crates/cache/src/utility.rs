//! Utility-command invalidator
//!
//! Inspects schema-changing commands around execution and translates them
//! into discard, evict or lock actions on the affected entries. Drops are
//! collected before execution (afterwards the names no longer resolve);
//! most alterations are handled after. Commands with a CONCURRENTLY form
//! mutate the catalog mid-execution with no exclusive lock held long
//! enough to protect the cache, so their dependent entries are locked for
//! the duration and the table lock is downgraded to shared across
//! execution.
//!
//! There is no guarantee the surrounding transaction commits, so a plan
//! may be discarded for nothing; afterwards the session stops caching new
//! plans until its transaction ends, as they could be invalid if it rolls
//! back.

use crate::cache::SharedPlanCache;
use crate::error::{Error, Result};
use crate::inherit;
use crate::key::RdependKey;
use crate::session::Session;
use crate::table::DependencyAction;
use plancache_host::{
    AlterTableCmd, CatalogClass, DropStatement, Oid, QualifiedName, ReindexTarget, RelationKind,
    Syscache, TransactionState, UtilityExecutor, UtilityStatement,
};
use std::collections::HashMap;

#[derive(Default)]
struct UtilityActions {
    queues: HashMap<(DependencyAction, CatalogClass), Vec<Oid>>,
    reset_current_db: bool,
}

impl UtilityActions {
    fn queue(&mut self, action: DependencyAction, class: CatalogClass, oid: Oid) {
        let oids = self.queues.entry((action, class)).or_default();
        if !oids.contains(&oid) {
            oids.push(oid);
        }
    }

    fn queue_all(
        &mut self,
        action: DependencyAction,
        class: CatalogClass,
        oids: impl IntoIterator<Item = Oid>,
    ) {
        for oid in oids {
            self.queue(action, class, oid);
        }
    }

    fn has(&self, action: DependencyAction) -> bool {
        self.queues
            .iter()
            .any(|((a, _), oids)| *a == action && !oids.is_empty())
    }
}

impl SharedPlanCache {
    /// Run a utility statement through the host, interposing cache
    /// invalidation before and after execution.
    pub fn process_utility(&self, session: &Session, stmt: &UtilityStatement) -> Result<()> {
        let mut actions = UtilityActions::default();
        self.utility_pre_exec(stmt, &mut actions)?;

        if actions.has(DependencyAction::DiscardAndLock) {
            return self.execute_locked(session, stmt, &actions);
        }

        self.host.executor.execute(stmt)?;

        if actions.reset_current_db {
            // No way to track the affected dependencies; drop everything
            // cached for this database.
            tracing::debug!("utility forces a database-scoped cache reset");
            self.reset(None, Some(self.host.database), 0);
            return Ok(());
        }

        self.utility_post_exec(stmt, &mut actions);

        if actions.has(DependencyAction::Discard) || actions.has(DependencyAction::Evict) {
            let mut map = self.table.write();
            for ((action, class), oids) in &actions.queues {
                for oid in oids {
                    let rkey = self.dependency_key(*class, *oid);
                    self.table.apply_dependency_action(&mut map, &rkey, *action);
                }
            }
            drop(map);
            // The transaction may still roll back; stop caching plans
            // that might never be valid.
            session.set_cache_read_only();
        }

        Ok(())
    }

    /// The CONCURRENTLY protocol: discard and lock the dependent entries
    /// under the exclusive lock, downgrade to shared across execution so
    /// concurrent lookups proceed (as misses), unlock once the command
    /// finished.
    fn execute_locked(
        &self,
        session: &Session,
        stmt: &UtilityStatement,
        actions: &UtilityActions,
    ) -> Result<()> {
        debug_assert!(!actions.has(DependencyAction::Discard));
        debug_assert!(!actions.has(DependencyAction::Evict));

        {
            let mut map = self.table.write();
            for ((action, class), oids) in &actions.queues {
                if *action != DependencyAction::DiscardAndLock {
                    continue;
                }
                for oid in oids {
                    let rkey = self.dependency_key(*class, *oid);
                    self.table
                        .apply_dependency_action(&mut map, &rkey, DependencyAction::DiscardAndLock);
                }
            }
        }

        // Downgrade: entries stay locked, installs stay blocked on the
        // write side, readers keep going. An entry evicted and recreated
        // between the release and this acquisition would stay locked
        // until evicted again; see the unlock below.
        let map = self.table.read();
        let exec_result = self.host.executor.execute(stmt);

        for ((action, class), oids) in &actions.queues {
            if *action != DependencyAction::DiscardAndLock {
                continue;
            }
            for oid in oids {
                let rkey = self.dependency_key(*class, *oid);
                self.table.unlock_dependents(&map, &rkey);
            }
        }
        drop(map);

        exec_result?;
        session.set_cache_read_only();
        Ok(())
    }

    /// Resolve a queued object id to the reverse-dependency identity it
    /// was registered under: relations by id, everything else by its
    /// system-cache hash.
    pub(crate) fn dependency_key(&self, class: CatalogClass, oid: Oid) -> RdependKey {
        match class {
            CatalogClass::Relation => RdependKey::relation(self.host.database, oid),
            CatalogClass::Type | CatalogClass::Procedure => RdependKey {
                database_id: self.host.database,
                class,
                object_id: self.host.syscache.hash_of(class, oid),
            },
        }
    }

    /// Commands that must be inspected before execution, mostly drops:
    /// once the object is gone its name no longer resolves.
    fn utility_pre_exec(&self, stmt: &UtilityStatement, actions: &mut UtilityActions) -> Result<()> {
        match stmt {
            UtilityStatement::Drop(drop) => self.pre_exec_drop(drop, actions),
            UtilityStatement::AlterTable(alter) => {
                for cmd in &alter.cmds {
                    if let AlterTableCmd::DetachPartition { concurrent: true, .. } = cmd {
                        // The command will fail inside a transaction
                        // block; leave the cache alone.
                        if self.host.txn.in_transaction_block() {
                            return Ok(());
                        }
                        if let Some(oid) = self.resolve_relation(&alter.target) {
                            actions.queue(
                                DependencyAction::DiscardAndLock,
                                CatalogClass::Relation,
                                oid,
                            );
                            actions.queue_all(
                                DependencyAction::DiscardAndLock,
                                CatalogClass::Relation,
                                self.host.syscache.partition_ancestors(oid),
                            );
                        }
                    }
                }
                Ok(())
            }
            UtilityStatement::AlterTsDictionary { .. } => {
                // A reset cannot be undone, so refuse where the command
                // itself could still roll back.
                if self.host.txn.in_transaction_block() {
                    return Err(Error::UtilityInTransaction("ALTER TEXT SEARCH DICTIONARY"));
                }
                actions.reset_current_db = true;
                Ok(())
            }
            UtilityStatement::CreateFunction(create) => {
                // Only CREATE OR REPLACE of an existing function can
                // invalidate anything; handled before execution because
                // afterwards there is no way to tell whether it existed.
                if create.replace {
                    if let Some(oid) = self
                        .host
                        .syscache
                        .resolve_function(&create.function.name, &create.function.args)
                    {
                        actions.queue(DependencyAction::Discard, CatalogClass::Procedure, oid);
                    }
                }
                Ok(())
            }
            UtilityStatement::Reindex(reindex) => {
                match &reindex.target {
                    ReindexTarget::Index { name, concurrent } => {
                        if *concurrent && self.host.txn.in_transaction_block() {
                            return Ok(());
                        }
                        if let Some(heap) = self
                            .resolve_relation(name)
                            .and_then(|ind| self.host.syscache.index_relation(ind))
                        {
                            self.queue_reindex_target(heap, *concurrent, actions);
                        }
                    }
                    ReindexTarget::Table { name, concurrent } => {
                        if *concurrent && self.host.txn.in_transaction_block() {
                            return Ok(());
                        }
                        if let Some(heap) = self.resolve_relation(name) {
                            self.queue_reindex_target(heap, *concurrent, actions);
                        }
                    }
                    ReindexTarget::SchemaOrDatabase { .. } => {
                        // Too many objects to track individually; reset
                        // the whole database's cache instead.
                        actions.reset_current_db = true;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn pre_exec_drop(&self, drop: &DropStatement, actions: &mut UtilityActions) -> Result<()> {
        if drop.kind == plancache_host::DropObjectKind::Index {
            if drop.concurrent && self.host.txn.in_transaction_block() {
                return Ok(());
            }
            for name in &drop.objects {
                // The plan depends on the underlying table, not on the
                // index itself; a generic plan usually stays a good idea
                // after an index disappears, so only discard.
                let Some(heap) = self
                    .resolve_relation(name)
                    .and_then(|ind| self.host.syscache.index_relation(ind))
                else {
                    continue;
                };
                if drop.concurrent {
                    actions.queue(DependencyAction::DiscardAndLock, CatalogClass::Relation, heap);
                } else {
                    actions.queue(DependencyAction::Discard, CatalogClass::Relation, heap);
                }
            }
        } else if drop.kind.is_relation() {
            for name in &drop.objects {
                if let Some(oid) = self.resolve_relation(name) {
                    actions.queue(DependencyAction::Evict, CatalogClass::Relation, oid);
                }
            }
        } else if drop.kind.is_routine() {
            for func in &drop.functions {
                if let Some(oid) = self.host.syscache.resolve_function(&func.name, &func.args) {
                    actions.queue(DependencyAction::Evict, CatalogClass::Procedure, oid);
                }
            }
        }
        Ok(())
    }

    fn queue_reindex_target(&self, heap: Oid, concurrent: bool, actions: &mut UtilityActions) {
        if concurrent {
            actions.queue(DependencyAction::DiscardAndLock, CatalogClass::Relation, heap);
        } else {
            actions.queue(DependencyAction::Discard, CatalogClass::Relation, heap);
        }
    }

    /// Commands inspected after execution, once their catalog effects are
    /// visible.
    fn utility_post_exec(&self, stmt: &UtilityStatement, actions: &mut UtilityActions) {
        debug_assert!(!actions.reset_current_db);

        match stmt {
            UtilityStatement::AlterTable(alter) => {
                if alter.lock_level().is_exclusive_grade() {
                    // Anything strong enough to take an exclusive lock can
                    // change the plan; discard rather than evict, hoping
                    // most entries stay valid after re-planning.
                    let Some(oid) = self.resolve_relation(&alter.target) else {
                        return;
                    };
                    actions.queue(DependencyAction::Discard, CatalogClass::Relation, oid);
                    actions.queue_all(
                        DependencyAction::Discard,
                        CatalogClass::Relation,
                        inherit::inheritance_ancestors(self.host.syscache.as_ref(), oid),
                    );

                    let single_detach = alter.cmds.len() == 1
                        && matches!(alter.cmds[0], AlterTableCmd::DetachPartition { .. });
                    if !single_detach {
                        actions.queue_all(
                            DependencyAction::Discard,
                            CatalogClass::Relation,
                            self.host.syscache.all_inheritors(oid),
                        );
                    }
                } else {
                    for cmd in &alter.cmds {
                        if matches!(
                            cmd,
                            AlterTableCmd::AttachPartition { .. }
                                | AlterTableCmd::DetachPartitionFinalize { .. }
                        ) {
                            // Only the referenced partitioned table and
                            // its ancestors see a different shape.
                            if let Some(oid) = self.resolve_relation(&alter.target) {
                                actions.queue(
                                    DependencyAction::Discard,
                                    CatalogClass::Relation,
                                    oid,
                                );
                                actions.queue_all(
                                    DependencyAction::Discard,
                                    CatalogClass::Relation,
                                    self.host.syscache.partition_ancestors(oid),
                                );
                            }
                        }
                    }
                }
            }
            UtilityStatement::CreateIndex(create) => {
                let Some(relid) = self.resolve_relation(&create.relation) else {
                    return;
                };
                actions.queue(DependencyAction::Discard, CatalogClass::Relation, relid);
                actions.queue_all(
                    DependencyAction::Discard,
                    CatalogClass::Relation,
                    inherit::inheritance_ancestors(self.host.syscache.as_ref(), relid),
                );
                if self.host.syscache.relation_kind(relid) == Some(RelationKind::PartitionedTable) {
                    actions.queue_all(
                        DependencyAction::Discard,
                        CatalogClass::Relation,
                        self.host.syscache.all_inheritors(relid),
                    );
                }
            }
            UtilityStatement::CreateTable(create) => {
                // A new inheritance child changes what its parents' plans
                // must scan.
                for parent in &create.inherit_parents {
                    let Some(oid) = self.resolve_relation(parent) else {
                        continue;
                    };
                    actions.queue(DependencyAction::Discard, CatalogClass::Relation, oid);
                    let ancestors = if create.of_parent {
                        self.host.syscache.partition_ancestors(oid)
                    } else {
                        inherit::inheritance_ancestors(self.host.syscache.as_ref(), oid)
                    };
                    actions.queue_all(DependencyAction::Discard, CatalogClass::Relation, ancestors);
                }
            }
            UtilityStatement::AlterDomain { type_name } => {
                if let Some(oid) = self.host.syscache.resolve_type(type_name) {
                    actions.queue(DependencyAction::Discard, CatalogClass::Type, oid);
                }
            }
            UtilityStatement::AlterFunction { function } => {
                if let Some(oid) = self
                    .host
                    .syscache
                    .resolve_function(&function.name, &function.args)
                {
                    actions.queue(DependencyAction::Discard, CatalogClass::Procedure, oid);
                }
            }
            _ => {}
        }
    }

    fn resolve_relation(&self, name: &QualifiedName) -> Option<Oid> {
        self.host.syscache.resolve_relation(name)
    }
}
