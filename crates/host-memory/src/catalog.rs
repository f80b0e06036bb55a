//! Mutable in-memory catalog implementing the syscache service

use parking_lot::RwLock;
use plancache_host::{
    CatalogClass, Expr, InvalItem, Oid, QualifiedName, Query, RangeTableKind, RelationKind,
    RelationPersistence, Syscache, TargetEntry,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
struct RelationMeta {
    name: QualifiedName,
    kind: RelationKind,
    persistence: RelationPersistence,
    rule_count: usize,
    /// Inheritance or partition parents of this relation.
    parents: Vec<Oid>,
    /// For indexes, the table the index is built on.
    table: Option<Oid>,
}

#[derive(Debug, Clone)]
struct FunctionMeta {
    name: QualifiedName,
    args: Vec<Oid>,
    /// Users allowed to execute; `None` means public.
    allowed: Option<HashSet<Oid>>,
}

#[derive(Debug, Clone)]
struct TypeMeta {
    name: QualifiedName,
}

#[derive(Default)]
struct CatalogInner {
    relations: HashMap<Oid, RelationMeta>,
    functions: HashMap<Oid, FunctionMeta>,
    types: HashMap<Oid, TypeMeta>,
    next_oid: u32,
}

/// A process-wide catalog of relations, routines and types.
pub struct MemoryCatalog {
    database: Oid,
    database_name: String,
    inner: RwLock<CatalogInner>,
}

impl MemoryCatalog {
    pub fn new(database: Oid) -> Self {
        Self {
            database,
            database_name: format!("db{}", database.0),
            inner: RwLock::new(CatalogInner {
                next_oid: 16384,
                ..CatalogInner::default()
            }),
        }
    }

    pub fn database(&self) -> Oid {
        self.database
    }

    fn insert_relation(&self, meta: RelationMeta) -> Oid {
        let mut inner = self.inner.write();
        let oid = Oid(inner.next_oid);
        inner.next_oid += 1;
        inner.relations.insert(oid, meta);
        oid
    }

    pub fn add_table(&self, name: impl Into<String>) -> Oid {
        self.insert_relation(RelationMeta {
            name: QualifiedName::new(name),
            kind: RelationKind::Table,
            persistence: RelationPersistence::Permanent,
            rule_count: 0,
            parents: vec![],
            table: None,
        })
    }

    pub fn add_temp_table(&self, name: impl Into<String>) -> Oid {
        self.insert_relation(RelationMeta {
            name: QualifiedName::new(name),
            kind: RelationKind::Table,
            persistence: RelationPersistence::Session,
            rule_count: 0,
            parents: vec![],
            table: None,
        })
    }

    pub fn add_partitioned_table(&self, name: impl Into<String>) -> Oid {
        self.insert_relation(RelationMeta {
            name: QualifiedName::new(name),
            kind: RelationKind::PartitionedTable,
            persistence: RelationPersistence::Permanent,
            rule_count: 0,
            parents: vec![],
            table: None,
        })
    }

    pub fn add_view(&self, name: impl Into<String>, rule_count: usize) -> Oid {
        self.insert_relation(RelationMeta {
            name: QualifiedName::new(name),
            kind: RelationKind::View,
            persistence: RelationPersistence::Permanent,
            rule_count,
            parents: vec![],
            table: None,
        })
    }

    pub fn add_index(&self, name: impl Into<String>, table: Oid) -> Oid {
        self.insert_relation(RelationMeta {
            name: QualifiedName::new(name),
            kind: RelationKind::Index,
            persistence: RelationPersistence::Permanent,
            rule_count: 0,
            parents: vec![],
            table: Some(table),
        })
    }

    /// Attach `child` under `parent`, for both inheritance and
    /// partitioning.
    pub fn set_parent(&self, child: Oid, parent: Oid) {
        let mut inner = self.inner.write();
        if let Some(meta) = inner.relations.get_mut(&child) {
            if !meta.parents.contains(&parent) {
                meta.parents.push(parent);
            }
        }
    }

    pub fn clear_parents(&self, child: Oid) {
        let mut inner = self.inner.write();
        if let Some(meta) = inner.relations.get_mut(&child) {
            meta.parents.clear();
        }
    }

    pub fn remove_relation(&self, oid: Oid) {
        self.inner.write().relations.remove(&oid);
    }

    pub fn add_function(&self, name: impl Into<String>, args: Vec<Oid>) -> Oid {
        let mut inner = self.inner.write();
        let oid = Oid(inner.next_oid);
        inner.next_oid += 1;
        inner.functions.insert(
            oid,
            FunctionMeta {
                name: QualifiedName::new(name),
                args,
                allowed: None,
            },
        );
        oid
    }

    /// Restrict execution of `func` to the given users.
    pub fn restrict_function(&self, func: Oid, users: impl IntoIterator<Item = Oid>) {
        let mut inner = self.inner.write();
        if let Some(meta) = inner.functions.get_mut(&func) {
            meta.allowed = Some(users.into_iter().collect());
        }
    }

    pub fn remove_function(&self, oid: Oid) {
        self.inner.write().functions.remove(&oid);
    }

    pub fn add_domain(&self, name: impl Into<String>) -> Oid {
        let mut inner = self.inner.write();
        let oid = Oid(inner.next_oid);
        inner.next_oid += 1;
        inner.types.insert(
            oid,
            TypeMeta {
                name: QualifiedName::new(name),
            },
        );
        oid
    }

    fn collect_inheritors(inner: &CatalogInner, root: Oid, out: &mut Vec<Oid>) {
        for (oid, meta) in &inner.relations {
            if meta.parents.contains(&root) && !out.contains(oid) {
                out.push(*oid);
                Self::collect_inheritors(inner, *oid, out);
            }
        }
    }

    fn collect_ancestors(inner: &CatalogInner, relid: Oid, out: &mut Vec<Oid>) {
        let parents = match inner.relations.get(&relid) {
            Some(meta) => meta.parents.clone(),
            None => return,
        };
        for parent in parents {
            if !out.contains(&parent) {
                out.push(parent);
                Self::collect_ancestors(inner, parent, out);
            }
        }
    }

    fn collect_items(&self, expr: &Expr, out: &mut Vec<InvalItem>) {
        match expr {
            Expr::FuncCall { func, args } => {
                let item = InvalItem {
                    class: CatalogClass::Procedure,
                    hash: self.hash_of(CatalogClass::Procedure, *func),
                };
                if !out.contains(&item) {
                    out.push(item);
                }
                for arg in args {
                    self.collect_items(arg, out);
                }
            }
            Expr::Cast { type_oid, arg } => {
                let item = InvalItem {
                    class: CatalogClass::Type,
                    hash: self.hash_of(CatalogClass::Type, *type_oid),
                };
                if !out.contains(&item) {
                    out.push(item);
                }
                self.collect_items(arg, out);
            }
            Expr::Op { args, .. } | Expr::Grouping { args, .. } | Expr::Xml { args, .. } => {
                for arg in args {
                    self.collect_items(arg, out);
                }
            }
            Expr::Subquery(query) => self.collect_query_items(query, out),
            Expr::Const { .. } | Expr::Param { .. } | Expr::Column { .. } => {}
        }
    }

    fn collect_query_items(&self, query: &Query, out: &mut Vec<InvalItem>) {
        for rte in &query.range_table {
            if let RangeTableKind::Subquery(sub) = &rte.kind {
                self.collect_query_items(sub, out);
            }
        }
        for TargetEntry { expr, .. } in &query.target_list {
            self.collect_items(expr, out);
        }
        if let Some(quals) = &query.quals {
            self.collect_items(quals, out);
        }
        if let Some(limit) = &query.limit {
            self.collect_items(&limit.count, out);
        }
    }
}

impl Syscache for MemoryCatalog {
    fn hash_of(&self, class: CatalogClass, oid: Oid) -> u32 {
        let mut hasher = DefaultHasher::new();
        class.hash(&mut hasher);
        oid.hash(&mut hasher);
        hasher.finish() as u32
    }

    fn relation_kind(&self, oid: Oid) -> Option<RelationKind> {
        self.inner.read().relations.get(&oid).map(|meta| meta.kind)
    }

    fn relation_persistence(&self, oid: Oid) -> Option<RelationPersistence> {
        self.inner.read().relations.get(&oid).map(|meta| meta.persistence)
    }

    fn relation_rule_count(&self, oid: Oid) -> usize {
        self.inner
            .read()
            .relations
            .get(&oid)
            .map(|meta| meta.rule_count)
            .unwrap_or(0)
    }

    fn relation_name(&self, oid: Oid) -> Option<String> {
        self.inner.read().relations.get(&oid).map(|meta| meta.name.to_string())
    }

    fn inheritance_parents(&self, oid: Oid) -> Vec<Oid> {
        self.inner
            .read()
            .relations
            .get(&oid)
            .map(|meta| meta.parents.clone())
            .unwrap_or_default()
    }

    fn all_inheritors(&self, oid: Oid) -> Vec<Oid> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        Self::collect_inheritors(&inner, oid, &mut out);
        out
    }

    fn partition_ancestors(&self, oid: Oid) -> Vec<Oid> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        Self::collect_ancestors(&inner, oid, &mut out);
        out
    }

    fn index_relation(&self, index: Oid) -> Option<Oid> {
        self.inner.read().relations.get(&index).and_then(|meta| meta.table)
    }

    fn resolve_relation(&self, name: &QualifiedName) -> Option<Oid> {
        self.inner
            .read()
            .relations
            .iter()
            .find(|(_, meta)| meta.name.name == name.name)
            .map(|(oid, _)| *oid)
    }

    fn resolve_function(&self, name: &QualifiedName, args: &[Oid]) -> Option<Oid> {
        self.inner
            .read()
            .functions
            .iter()
            .find(|(_, meta)| meta.name.name == name.name && meta.args == args)
            .map(|(oid, _)| *oid)
    }

    fn resolve_type(&self, name: &QualifiedName) -> Option<Oid> {
        self.inner
            .read()
            .types
            .iter()
            .find(|(_, meta)| meta.name.name == name.name)
            .map(|(oid, _)| *oid)
    }

    fn function_is_executable(&self, func: Oid, user: Option<Oid>) -> bool {
        let inner = self.inner.read();
        match inner.functions.get(&func) {
            Some(meta) => match (&meta.allowed, user) {
                (None, _) => true,
                (Some(_), None) => true,
                (Some(allowed), Some(user)) => allowed.contains(&user),
            },
            // Unknown functions are the planner's problem, not ours.
            None => true,
        }
    }

    fn query_invalidation_items(&self, query: &Query) -> Vec<InvalItem> {
        let mut out = Vec::new();
        self.collect_query_items(query, &mut out);
        out
    }

    fn database_name(&self, db: Oid) -> String {
        if db == self.database {
            self.database_name.clone()
        } else {
            format!("db{}", db.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inheritors_are_transitive() {
        let catalog = MemoryCatalog::new(Oid(1));
        let root = catalog.add_partitioned_table("root");
        let mid = catalog.add_partitioned_table("mid");
        let leaf = catalog.add_table("leaf");
        catalog.set_parent(mid, root);
        catalog.set_parent(leaf, mid);

        let mut inheritors = catalog.all_inheritors(root);
        inheritors.sort();
        assert_eq!(inheritors, vec![mid, leaf]);

        assert_eq!(catalog.partition_ancestors(leaf), vec![mid, root]);
    }

    #[test]
    fn function_acl() {
        let catalog = MemoryCatalog::new(Oid(1));
        let func = catalog.add_function("f", vec![]);
        assert!(catalog.function_is_executable(func, Some(Oid(10))));

        catalog.restrict_function(func, [Oid(10)]);
        assert!(catalog.function_is_executable(func, Some(Oid(10))));
        assert!(!catalog.function_is_executable(func, Some(Oid(11))));
    }

    #[test]
    fn identity_hash_is_stable() {
        let catalog = MemoryCatalog::new(Oid(1));
        let a = catalog.hash_of(CatalogClass::Procedure, Oid(42));
        let b = catalog.hash_of(CatalogClass::Procedure, Oid(42));
        assert_eq!(a, b);
        assert_ne!(a, catalog.hash_of(CatalogClass::Type, Oid(42)));
    }
}
