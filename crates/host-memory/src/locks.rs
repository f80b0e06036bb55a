//! Recording relation lock manager

use parking_lot::Mutex;
use plancache_host::{LockMode, Oid, RelationLocks};

/// Records every lock acquisition so tests can assert the executor-lock
/// protocol. Acquisition is always granted; like the host's lock manager
/// it never opens the object, so locking a dropped relation succeeds.
#[derive(Default)]
pub struct MemoryLocks {
    acquired: Mutex<Vec<(Oid, LockMode)>>,
}

impl MemoryLocks {
    /// Every acquisition recorded so far, in order.
    pub fn acquisitions(&self) -> Vec<(Oid, LockMode)> {
        self.acquired.lock().clone()
    }

    pub fn clear(&self) {
        self.acquired.lock().clear();
    }
}

impl RelationLocks for MemoryLocks {
    fn lock_relation(&self, oid: Oid, mode: LockMode) {
        self.acquired.lock().push((oid, mode));
    }

    fn unlock_relation(&self, oid: Oid, mode: LockMode) {
        let mut acquired = self.acquired.lock();
        if let Some(pos) = acquired.iter().rposition(|held| *held == (oid, mode)) {
            acquired.remove(pos);
        }
    }
}
