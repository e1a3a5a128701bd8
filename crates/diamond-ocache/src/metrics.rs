//! Cache-wide counters: hits, misses, partial hits, inserts, idle
//! evictions, and log corruptions encountered on reload.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub partial_hits: AtomicU64,
    pub inserts: AtomicU64,
    pub evictions_idle: AtomicU64,
    pub log_corruptions: AtomicU64,
}

/// Point-in-time snapshot, suitable for dctl leaf registration
/// (`cache.hit_rate` etc.).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub partial_hits: u64,
    pub inserts: u64,
    pub evictions_idle: u64,
    pub log_corruptions: u64,
}

impl CacheMetricsSnapshot {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.partial_hits;
        if total == 0 {
            0.0
        } else {
            f64_from_u64(self.hits) / f64_from_u64(total)
        }
    }
}

fn f64_from_u64(v: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        v as f64
    }
}

impl CacheMetrics {
    #[must_use]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            partial_hits: self.partial_hits.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions_idle: self.evictions_idle.load(Ordering::Relaxed),
            log_corruptions: self.log_corruptions.load(Ordering::Relaxed),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_partial_hit(&self) {
        self.partial_hits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_eviction_idle(&self) {
        self.evictions_idle.fetch_add(1, Ordering::Relaxed);
    }
}
