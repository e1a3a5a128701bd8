//! The on-disk/in-memory cache entry and its containing per-filter table.

use std::time::Instant;

use diamond_core::{AttrSet, Sig128};
use serde::{Deserialize, Serialize};

/// Sentinel `result` value recorded when a filter raised an unrecoverable
/// runtime error.
pub const FILTER_ERR: i32 = i32::MIN;

/// One cached evaluation of a filter against an object under a specific
/// input-attribute context. Multiple records may exist per `(fsig, oid)`
/// when the object has been seen under different input attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub oid: u64,
    pub iattr_sig: Sig128,
    pub result: i32,
    pub iattr: AttrSet,
    pub oattr: AttrSet,
    pub eval_count: u64,
    pub hit_count: u64,
}

impl ObjectRecord {
    #[must_use]
    pub fn new(oid: u64, result: i32, iattr: AttrSet, oattr: AttrSet) -> Self {
        let iattr_sig = iattr.canonical_sig();
        Self {
            oid,
            iattr_sig,
            result,
            iattr,
            oattr,
            eval_count: 1,
            hit_count: 0,
        }
    }

    #[must_use]
    pub fn is_pass(&self, threshold: i32) -> bool {
        self.result != FILTER_ERR && self.result >= threshold
    }
}

/// In-memory table for one filter signature: `{fsig, table, mtime, atime,
/// running}`.
pub struct FilterCache {
    pub fsig: Sig128,
    table: std::collections::HashMap<u64, Vec<ObjectRecord>>,
    pub mtime: Instant,
    pub atime: Instant,
    pub running: bool,
}

impl FilterCache {
    #[must_use]
    pub fn new(fsig: Sig128) -> Self {
        let now = Instant::now();
        Self {
            fsig,
            table: std::collections::HashMap::new(),
            mtime: now,
            atime: now,
            running: false,
        }
    }

    #[must_use]
    pub fn records_for(&self, oid: u64) -> &[ObjectRecord] {
        self.table.get(&oid).map_or(&[], Vec::as_slice)
    }

    /// Append a freshly committed record and bump `mtime`.
    pub fn insert_record(&mut self, record: ObjectRecord) {
        self.mtime = Instant::now();
        self.table.entry(record.oid).or_default().push(record);
    }

    /// Mark a hit against the given record, bumping `atime` and
    /// `hit_count`.
    pub fn record_hit(&mut self, oid: u64, iattr_sig: Sig128) {
        self.atime = Instant::now();
        if let Some(records) = self.table.get_mut(&oid) {
            if let Some(record) = records.iter_mut().find(|r| r.iattr_sig == iattr_sig) {
                record.hit_count += 1;
            }
        }
    }

    #[must_use]
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.atime)
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn oids(&self) -> Vec<u64> {
        self.table.keys().copied().collect()
    }

    pub fn iter_records(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.table.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(oid: u64, iattr: AttrSet, result: i32) -> ObjectRecord {
        ObjectRecord::new(oid, result, iattr, AttrSet::new())
    }

    #[test]
    fn multiple_records_per_oid_coexist_under_different_contexts() {
        let mut fc = FilterCache::new(Sig128::of_bytes(b"f"));
        let a1 = diamond_core::CacheAttrEntry {
            name: "color".into(),
            sig: Sig128::of_bytes(b"red"),
        };
        let a2 = diamond_core::CacheAttrEntry {
            name: "color".into(),
            sig: Sig128::of_bytes(b"blue"),
        };
        fc.insert_record(rec(42, AttrSet::from_entries(vec![a1]), 100));
        fc.insert_record(rec(42, AttrSet::from_entries(vec![a2]), 10));
        assert_eq!(fc.records_for(42).len(), 2);
    }

    #[test]
    fn is_pass_is_inclusive_threshold() {
        let r = ObjectRecord::new(1, 50, AttrSet::new(), AttrSet::new());
        assert!(r.is_pass(50));
        assert!(r.is_pass(49));
        assert!(!r.is_pass(51));
    }

    #[test]
    fn filter_err_never_passes() {
        let r = ObjectRecord::new(1, FILTER_ERR, AttrSet::new(), AttrSet::new());
        assert!(!r.is_pass(i32::MIN));
    }
}
