//! Cache configuration

use plancache_host::cost::PLANCACHE_THRESHOLD;
use serde::{Deserialize, Serialize};

/// Runtime configuration, fixed at cache creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bypass the cache entirely when false.
    pub enabled: bool,
    /// Cap on resident entries.
    pub max_entries: usize,
    /// Planning time below this many milliseconds is not worth caching.
    pub min_plan_time_ms: f64,
    /// Custom plans to observe before a cached plan is considered.
    /// Clamped to `1..=PLANCACHE_THRESHOLD`.
    pub threshold: i64,
    /// Per-dependency fan-out cap of the reverse-dependency index.
    pub rdepend_max: usize,
    /// Serve hits but never store new plans.
    pub read_only: bool,
    /// Permit negative cost adjustment to fully bypass the host's own
    /// session-local plan cache.
    pub disable_plan_cache: bool,
    /// Also cache queries without bound parameters, folding the result
    /// descriptor into the fingerprint.
    pub cache_all: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
            min_plan_time_ms: 10.0,
            threshold: 4,
            rdepend_max: 50,
            read_only: false,
            disable_plan_cache: false,
            cache_all: false,
        }
    }
}

impl Config {
    /// Clamp values into their supported ranges.
    pub(crate) fn sanitized(mut self) -> Self {
        let threshold = self.threshold.clamp(1, PLANCACHE_THRESHOLD);
        if threshold != self.threshold {
            tracing::warn!(
                requested = self.threshold,
                clamped = threshold,
                "threshold out of range"
            );
        }
        self.threshold = threshold;
        self.max_entries = self.max_entries.max(1);
        self.rdepend_max = self.rdepend_max.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_clamped() {
        let config = Config {
            threshold: 99,
            ..Config::default()
        }
        .sanitized();
        assert_eq!(config.threshold, PLANCACHE_THRESHOLD);

        let config = Config {
            threshold: 0,
            rdepend_max: 0,
            ..Config::default()
        }
        .sanitized();
        assert_eq!(config.threshold, 1);
        assert_eq!(config.rdepend_max, 1);
    }
}
