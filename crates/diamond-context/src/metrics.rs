//! Pipeline-level counters, mirrored into a plain snapshot struct so a
//! dctl leaf registration can read them without holding onto atomics.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ContextMetrics {
    objects_read: AtomicU64,
    objects_passed: AtomicU64,
    objects_dropped: AtomicU64,
    objects_aborted: AtomicU64,
}

impl ContextMetrics {
    pub fn record_read(&self) {
        self.objects_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passed(&self) {
        self.objects_passed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.objects_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.objects_aborted.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self, pend_count: usize) -> ContextMetricsSnapshot {
        ContextMetricsSnapshot {
            objects_read: self.objects_read.load(Ordering::Relaxed),
            objects_passed: self.objects_passed.load(Ordering::Relaxed),
            objects_dropped: self.objects_dropped.load(Ordering::Relaxed),
            objects_aborted: self.objects_aborted.load(Ordering::Relaxed),
            pend_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextMetricsSnapshot {
    pub objects_read: u64,
    pub objects_passed: u64,
    pub objects_dropped: u64,
    pub objects_aborted: u64,
    pub pend_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let metrics = ContextMetrics::default();
        metrics.record_read();
        metrics.record_read();
        metrics.record_passed();
        metrics.record_dropped();
        let snap = metrics.snapshot(7);
        assert_eq!(snap.objects_read, 2);
        assert_eq!(snap.objects_passed, 1);
        assert_eq!(snap.objects_dropped, 1);
        assert_eq!(snap.objects_aborted, 0);
        assert_eq!(snap.pend_count, 7);
    }
}
