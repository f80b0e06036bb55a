//! Utility (schema-changing) statement AST
//!
//! The subset of DDL the cache inspects around execution. Anything it has
//! no invalidation interest in arrives as `UtilityStatement::Other`.

use crate::ids::{LockMode, Oid, QualifiedName};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UtilityStatement {
    Drop(DropStatement),
    AlterTable(AlterTableStatement),
    CreateIndex(CreateIndexStatement),
    CreateTable(CreateTableStatement),
    CreateFunction(CreateFunctionStatement),
    AlterDomain { type_name: QualifiedName },
    AlterFunction { function: FunctionRef },
    Reindex(ReindexStatement),
    AlterTsDictionary { name: QualifiedName },
    Other(String),
}

/// A routine reference: name plus argument type signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: QualifiedName,
    pub args: Vec<Oid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropObjectKind {
    Table,
    View,
    MaterializedView,
    ForeignTable,
    Index,
    Function,
    Procedure,
    Aggregate,
    Routine,
    Other,
}

impl DropObjectKind {
    pub fn is_relation(self) -> bool {
        matches!(
            self,
            DropObjectKind::Table
                | DropObjectKind::View
                | DropObjectKind::MaterializedView
                | DropObjectKind::ForeignTable
        )
    }

    pub fn is_routine(self) -> bool {
        matches!(
            self,
            DropObjectKind::Function
                | DropObjectKind::Procedure
                | DropObjectKind::Aggregate
                | DropObjectKind::Routine
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropStatement {
    pub kind: DropObjectKind,
    /// Relation or index names being dropped.
    pub objects: Vec<QualifiedName>,
    /// Routine signatures being dropped, for the routine kinds.
    pub functions: Vec<FunctionRef>,
    pub concurrent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterTableStatement {
    pub target: QualifiedName,
    pub cmds: Vec<AlterTableCmd>,
}

impl AlterTableStatement {
    /// The strongest lock any subcommand requires, mirroring the host's
    /// per-command lock-level table.
    pub fn lock_level(&self) -> LockMode {
        self.cmds
            .iter()
            .map(AlterTableCmd::lock_level)
            .max()
            .unwrap_or(LockMode::AccessExclusive)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlterTableCmd {
    AddColumn { name: String },
    DropColumn { name: String },
    AlterColumnType { name: String },
    AttachPartition { partition: QualifiedName },
    DetachPartition { partition: QualifiedName, concurrent: bool },
    DetachPartitionFinalize { partition: QualifiedName },
    SetStatistics { name: String },
    ValidateConstraint { name: String },
}

impl AlterTableCmd {
    pub fn lock_level(&self) -> LockMode {
        match self {
            AlterTableCmd::AddColumn { .. }
            | AlterTableCmd::DropColumn { .. }
            | AlterTableCmd::AlterColumnType { .. }
            | AlterTableCmd::DetachPartition { concurrent: false, .. } => {
                LockMode::AccessExclusive
            }
            AlterTableCmd::AttachPartition { .. }
            | AlterTableCmd::DetachPartition { concurrent: true, .. }
            | AlterTableCmd::DetachPartitionFinalize { .. }
            | AlterTableCmd::SetStatistics { .. }
            | AlterTableCmd::ValidateConstraint { .. } => LockMode::ShareUpdateExclusive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIndexStatement {
    pub relation: QualifiedName,
    pub concurrent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableStatement {
    pub name: QualifiedName,
    /// Parent relations listed in an `INHERITS` clause or the partition
    /// parent of a `PARTITION OF` clause.
    pub inherit_parents: Vec<QualifiedName>,
    /// True for the `PARTITION OF` form.
    pub of_parent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFunctionStatement {
    pub function: FunctionRef,
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexStatement {
    pub target: ReindexTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReindexTarget {
    Index { name: QualifiedName, concurrent: bool },
    Table { name: QualifiedName, concurrent: bool },
    /// Schema- or database-wide reindex.
    SchemaOrDatabase { name: String },
}
