//! Catalog identifiers and lock modes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Oid(pub u32);

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog class of an object a cached plan can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogClass {
    Relation,
    Type,
    Procedure,
}

impl fmt::Display for CatalogClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatalogClass::Relation => "relation",
            CatalogClass::Type => "type",
            CatalogClass::Procedure => "routine",
        };
        f.write_str(name)
    }
}

/// Kind of a relation, as reported by the host catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    Table,
    PartitionedTable,
    View,
    MaterializedView,
    ForeignTable,
    Index,
    Sequence,
}

/// Storage persistence of a relation. Session-local relations are backed
/// by backend-private buffers and can never be referenced by a shared plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationPersistence {
    Permanent,
    Session,
}

/// Relation lock modes, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockMode {
    AccessShare,
    RowExclusive,
    ShareUpdateExclusive,
    AccessExclusive,
}

impl LockMode {
    /// Whether this mode conflicts with every concurrent access.
    pub fn is_exclusive_grade(self) -> bool {
        self >= LockMode::AccessExclusive
    }
}

/// A possibly schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_mode_ordering() {
        assert!(LockMode::AccessShare < LockMode::ShareUpdateExclusive);
        assert!(LockMode::ShareUpdateExclusive < LockMode::AccessExclusive);
        assert!(LockMode::AccessExclusive.is_exclusive_grade());
        assert!(!LockMode::ShareUpdateExclusive.is_exclusive_grade());
    }

    #[test]
    fn qualified_name_display() {
        assert_eq!(QualifiedName::new("t").to_string(), "t");
        assert_eq!(QualifiedName::qualified("public", "t").to_string(), "public.t");
    }
}
