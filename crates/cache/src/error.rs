//! Error types for the plan cache

use plancache_host::HostError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Caller-visible errors. Recoverable cache-internal conditions (shared
/// memory exhaustion, reverse-dependency overflow, stale hits, locked
/// entries) never surface here; at worst a planning request bypasses the
/// cache.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("plan cache is not attached to shared memory")]
    NotInitialized,

    #[error("cannot run {0} inside a transaction block")]
    UtilityInTransaction(&'static str),

    #[error(transparent)]
    Host(#[from] HostError),
}
