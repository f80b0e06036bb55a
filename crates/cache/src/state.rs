//! Process-wide shared state scalars

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Initial assumed median usage before the first eviction pass has
/// computed a real one.
pub(crate) const ASSUMED_MEDIAN_INIT: f64 = 10.0;

#[derive(Debug, Clone)]
pub(crate) struct StatsSnapshot {
    pub rdepend_num: i64,
    pub alloced_size: i64,
    pub dealloc: i64,
    pub stats_reset: DateTime<Utc>,
}

struct StatsInner {
    alloced_size: i64,
    dealloc: i64,
    rdepend_num: i64,
    cur_median_usage: f64,
    stats_reset: DateTime<Utc>,
}

/// Shared scalars, guarded by one short-section mutex the way the host
/// guards them with a spinlock. Never held across any other lock.
pub(crate) struct SharedStats {
    inner: Mutex<StatsInner>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                alloced_size: 0,
                dealloc: 0,
                rdepend_num: 0,
                cur_median_usage: ASSUMED_MEDIAN_INIT,
                stats_reset: Utc::now(),
            }),
        }
    }

    pub fn add_alloced(&self, size: usize) {
        self.inner.lock().alloced_size += size as i64;
    }

    pub fn sub_alloced(&self, size: usize) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.alloced_size >= size as i64);
        inner.alloced_size -= size as i64;
    }

    pub fn bump_dealloc(&self) {
        self.inner.lock().dealloc += 1;
    }

    pub fn rdepend_created(&self) {
        self.inner.lock().rdepend_num += 1;
    }

    pub fn rdepend_removed(&self) {
        self.inner.lock().rdepend_num -= 1;
    }

    pub fn set_median_usage(&self, median: f64) {
        self.inner.lock().cur_median_usage = median;
    }

    pub fn median_usage(&self) -> f64 {
        self.inner.lock().cur_median_usage
    }

    /// Called when a reset removed every entry: global counters start over.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.dealloc = 0;
        inner.stats_reset = Utc::now();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        StatsSnapshot {
            rdepend_num: inner.rdepend_num,
            alloced_size: inner.alloced_size,
            dealloc: inner.dealloc,
            stats_reset: inner.stats_reset,
        }
    }
}
