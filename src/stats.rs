//! Statistics tracking for cached resolution.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for cache lookups.
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub bypassed: AtomicU64,
    pub failures: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and zero all counters. `evicted` is supplied by the caller
    /// since eviction is counted by the cache manager.
    pub fn snapshot_and_reset(&self, evicted: u64) -> StatsSnapshot {
        let hits = self.hits.swap(0, Ordering::Relaxed);
        let misses = self.misses.swap(0, Ordering::Relaxed);
        let bypassed = self.bypassed.swap(0, Ordering::Relaxed);
        let failures = self.failures.swap(0, Ordering::Relaxed);

        let cacheable = hits + misses;
        let hit_ratio = if cacheable > 0 {
            hits as f64 / cacheable as f64
        } else {
            0.0
        };

        StatsSnapshot {
            lookups: cacheable + bypassed,
            hits,
            misses,
            bypassed,
            failures,
            evicted,
            hit_ratio,
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub bypassed: u64,
    pub failures: u64,
    pub evicted: u64,
    pub hit_ratio: f64,
}
