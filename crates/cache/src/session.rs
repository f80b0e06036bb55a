//! Per-backend session state

use plancache_host::Oid;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-backend handle the cache needs alongside each request: the current
/// user identity and the transaction-local read-only latch. After a
/// session discards or evicts entries through a utility command, it must
/// not populate the cache again until its transaction is known to have
/// committed; the host clears the latch at transaction end.
pub struct Session {
    user: Oid,
    cache_read_only: AtomicBool,
}

impl Session {
    pub fn new(user: Oid) -> Self {
        Self {
            user,
            cache_read_only: AtomicBool::new(false),
        }
    }

    pub fn user(&self) -> Oid {
        self.user
    }

    pub fn is_cache_read_only(&self) -> bool {
        self.cache_read_only.load(Ordering::Acquire)
    }

    pub(crate) fn set_cache_read_only(&self) {
        self.cache_read_only.store(true, Ordering::Release);
    }

    /// Host hook: the transaction committed or aborted, new plans may be
    /// cached again.
    pub fn end_transaction(&self) {
        self.cache_read_only.store(false, Ordering::Release);
    }
}
