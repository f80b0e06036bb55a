//! Cache and reverse-dependency keys

use plancache_host::{CatalogClass, Oid};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Fingerprint of a query for caching purposes. Two requests that produce
/// equal keys may share one cached plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Present only when row-level security applies to the query;
    /// otherwise the entry is shared across users.
    pub user_id: Option<Oid>,
    pub database_id: Oid,
    /// Normalized query identifier supplied by the host.
    pub query_id: u64,
    /// Hash of literals and other discriminators the normalizer omits.
    pub const_id: u32,
}

/// Identity of a catalog object cached plans can depend on. For relations
/// `object_id` is the relation id; for types and routines it is the
/// object's system-cache identity hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RdependKey {
    pub database_id: Oid,
    pub class: CatalogClass,
    pub object_id: u32,
}

impl RdependKey {
    pub fn relation(database_id: Oid, relid: Oid) -> Self {
        Self {
            database_id,
            class: CatalogClass::Relation,
            object_id: relid.0,
        }
    }
}

/// Boost-style 32-bit hash combine, matching the host's `hash_combine`.
pub(crate) fn hash_combine(seed: u32, value: u32) -> u32 {
    seed ^ value
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// Collapse arbitrary bytes to 32 bits for folding into a fingerprint.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish() as u32
}
