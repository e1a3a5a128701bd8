//! `OCache` — the object evaluation cache's public contract.
//! In-memory table access is an `RwLock`-protected `HashMap` with
//! hit/miss counters and idle eviction, one table per filter signature,
//! each behind its own lock so unrelated filters never contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use diamond_contracts::dctl::{ControlTree, DctlType};
use diamond_core::lock_order::LockLevel;
use diamond_core::{AttrSet, CacheAttrEntry, OrderedRwLock, Sig128};
use diamond_ring::BlockingRing;
use tracing::{debug, info, warn};

use crate::error::{OcacheError, OcacheResult};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::pending::{EvalOutcome, PendingMap};
use crate::persist;
use crate::record::{FilterCache, ObjectRecord};

/// Outcome of [`OCache::lookup`]/[`OCache::wait_lookup`].
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// `iattr` of the matched record is a subset of the current
    /// attributes with matching signatures.
    Hit {
        result: i32,
        oattrs: AttrSet,
        iattr_sig: Sig128,
    },
    /// No record exists for `(fsig, oid)` at all.
    Miss,
    /// A record exists but at least one shared input attribute's
    /// signature has changed, or the recorded set needs an attribute the
    /// object no longer carries.
    PartialHit { changed: Vec<String>, missing: Vec<String> },
}

/// Opaque handle returned by [`OCache::add_start`], threaded through the
/// remaining insert-protocol calls for one pending record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InsertHandle(u64);

#[derive(Default)]
struct InsertBuilder {
    fsig: Sig128,
    oid: u64,
    iattr: Vec<CacheAttrEntry>,
    oattr: Vec<CacheAttrEntry>,
}

/// Typed insert-protocol events, also the shape persisted onto the
/// durability ring.
enum PersistJob {
    Record { fsig: Sig128, record: ObjectRecord },
    Shutdown,
}

pub struct OCache {
    root: PathBuf,
    tables: OrderedRwLock<HashMap<Sig128, Arc<OrderedRwLock<FilterCache>>>>,
    pending: PendingMap,
    builders: Mutex<HashMap<InsertHandle, InsertBuilder>>,
    next_handle: AtomicU64,
    persist_ring: Arc<BlockingRing<PersistJob>>,
    persist_thread: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    pub metrics: CacheMetrics,
    dctl: Arc<dyn ControlTree>,
}

impl OCache {
    /// Bind the cache to an on-disk directory, registering its counters
    /// under `dctl_cookie` as they're produced. Does not spawn the
    /// persistence thread; call [`Self::start`] for that.
    #[must_use]
    pub fn init(root: impl Into<PathBuf>, dctl_cookie: Arc<dyn ControlTree>) -> Arc<Self> {
        let cache = Arc::new(Self {
            root: root.into(),
            tables: OrderedRwLock::new(LockLevel::FilterCacheTable, HashMap::new()),
            pending: PendingMap::new(),
            builders: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            persist_ring: Arc::new(BlockingRing::new(1024)),
            persist_thread: Mutex::new(None),
            started: AtomicBool::new(false),
            metrics: CacheMetrics::default(),
            dctl: dctl_cookie,
        });
        cache.write_cache_leaves();
        cache
    }

    /// Refresh the `cache.*` dctl leaves from the current metrics
    /// snapshot and the process-wide lock-contention counters.
    fn write_cache_leaves(&self) {
        let snapshot = self.metrics.snapshot();
        self.dctl
            .write_leaf("cache.hit_rate", DctlType::Bytes, snapshot.hit_rate().to_le_bytes().to_vec());
        self.dctl
            .write_leaf("cache.hits", DctlType::U64, snapshot.hits.to_le_bytes().to_vec());
        self.dctl
            .write_leaf("cache.misses", DctlType::U64, snapshot.misses.to_le_bytes().to_vec());
        if let Ok(bytes) = serde_json::to_vec(&diamond_core::lock_order::lock_contention_snapshot()) {
            self.dctl.write_leaf("cache.lock_contention", DctlType::Bytes, bytes);
        }
    }

    /// Refresh the per-filter entry-count leaf for `fsig` from its table.
    fn write_filter_leaf(&self, fsig: Sig128, entry_count: usize) {
        self.dctl.write_leaf(
            &format!("cache.filters.{}.entries", fsig.to_hex()),
            DctlType::U64,
            (entry_count as u64).to_le_bytes().to_vec(),
        );
    }

    /// Spawn the background persistence thread draining the insert ring
    /// into `cache.log` files.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("ocache-persist".into())
            .spawn(move || this.persist_worker())
            .expect("failed to spawn ocache persistence thread");
        *self.persist_thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    fn persist_worker(self: Arc<Self>) {
        loop {
            match self.persist_ring.pop() {
                Ok(PersistJob::Record { fsig, record }) => {
                    if let Err(e) = persist::append(&self.root, fsig, &record) {
                        warn!(error = %e, "failed to append cache record, will retry on next insert");
                        self.metrics.record_eviction_idle();
                    }
                }
                Ok(PersistJob::Shutdown) | Err(diamond_ring::Closed) => break,
            }
        }
    }

    /// Flush and persist; block until the persistence queue is drained,
    /// then stop the background thread. Idempotent.
    pub fn stop(&self) {
        self.persist_ring.close();
        if let Some(handle) = self.persist_thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            let _ = handle.join();
        }
    }

    /// Block until the persistence ring has drained (used by tests and by
    /// `stop()` internally before closing).
    pub fn wait_finish(&self) {
        while !self.persist_ring.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Finalize any pending writes for one filter's cache — a courtesy
    /// drain point before a search context tears a filter chain down; the
    /// shared persistence thread already serializes all filters so this
    /// is presently equivalent to [`Self::wait_finish`].
    pub fn stop_search(&self, _fsig: Sig128) {
        self.wait_finish();
    }

    fn table_for(&self, fsig: Sig128) -> Arc<OrderedRwLock<FilterCache>> {
        {
            let tables = self.tables.read();
            if let Some(table) = tables.get(&fsig) {
                return Arc::clone(table);
            }
        }
        let mut tables = self.tables.write();
        if let Some(table) = tables.get(&fsig) {
            return Arc::clone(table);
        }
        let loaded = persist::reload(&self.root, fsig).unwrap_or_else(|e| {
            warn!(error = %e, "cache reload failed, starting with an empty table");
            Vec::new()
        });
        let mut fc = FilterCache::new(fsig);
        for record in loaded {
            fc.insert_record(record);
        }
        info!(fsig = %fsig, entries = fc.entry_count(), "loaded filter cache table");
        self.write_filter_leaf(fsig, fc.entry_count());
        let table = Arc::new(OrderedRwLock::new(LockLevel::FilterCacheTable, fc));
        tables.insert(fsig, Arc::clone(&table));
        table
    }

    fn lookup_inner(&self, fsig: Sig128, oid: u64, current_attrs: &AttrSet) -> LookupOutcome {
        let table = self.table_for(fsig);
        let mut guard = table.write();
        for record in guard.records_for(oid) {
            let check = record.iattr.is_subset_with_matching_sigs(current_attrs);
            if check.is_hit() {
                let iattr_sig = record.iattr_sig;
                let result = record.result;
                let oattrs = record.oattr.clone();
                guard.record_hit(oid, iattr_sig);
                self.metrics.record_hit();
                self.write_cache_leaves();
                return LookupOutcome::Hit {
                    result,
                    oattrs,
                    iattr_sig,
                };
            }
        }
        if guard.records_for(oid).is_empty() {
            self.metrics.record_miss();
            self.write_cache_leaves();
            return LookupOutcome::Miss;
        }
        // At least one record exists for this oid but none matched exactly;
        // report the narrowest diff across all of them.
        let mut changed = Vec::new();
        let mut missing = Vec::new();
        for record in guard.records_for(oid) {
            let check = record.iattr.is_subset_with_matching_sigs(current_attrs);
            changed.extend(check.changed);
            missing.extend(check.missing);
        }
        changed.sort();
        changed.dedup();
        missing.sort();
        missing.dedup();
        self.metrics.record_partial_hit();
        self.write_cache_leaves();
        LookupOutcome::PartialHit { changed, missing }
    }

    /// Consult the in-memory table without regard for any concurrent
    /// evaluation of the same key (non-blocking; may race with a
    /// concurrent `add_end`, in which case it simply reports whatever was
    /// visible at the time).
    #[must_use]
    pub fn lookup(&self, oid: u64, fsig: Sig128, current_attrs: &AttrSet) -> LookupOutcome {
        self.lookup_inner(fsig, oid, current_attrs)
    }

    /// As [`Self::lookup`], but enforces at-most-one concurrent
    /// evaluation per key: a table hit returns immediately; on a miss or
    /// partial hit, the *first* caller to observe it claims the
    /// evaluation slot and the returned outcome tells it to proceed to
    /// `add_start`. Any other thread calling `wait_lookup` for the same
    /// `(fsig, oid)` while that slot is claimed blocks here and receives
    /// the resulting record directly once `add_end` commits it, instead
    /// of re-deriving a (possibly stale) table read.
    #[must_use]
    pub fn wait_lookup(&self, oid: u64, fsig: Sig128, current_attrs: &AttrSet) -> LookupOutcome {
        let key = (fsig, oid);
        match self.lookup_inner(fsig, oid, current_attrs) {
            LookupOutcome::Hit { result, oattrs, iattr_sig } => {
                LookupOutcome::Hit { result, oattrs, iattr_sig }
            }
            miss_or_partial => {
                if self.pending.begin(key) {
                    // This caller is now the sole evaluator for `key`;
                    // it must follow up with add_start/.../add_end, whose
                    // add_end releases the slot via pending.finish.
                    miss_or_partial
                } else {
                    let outcome = self.pending.wait(key);
                    self.metrics.record_hit();
                    LookupOutcome::Hit {
                        result: outcome.record.result,
                        oattrs: outcome.record.oattr,
                        iattr_sig: outcome.record.iattr_sig,
                    }
                }
            }
        }
    }

    /// Begin a pending insert. Does not itself touch the at-most-one
    /// evaluation slot — that is claimed by [`Self::wait_lookup`] when it
    /// returns a miss/partial-hit to its caller; `add_end` releases it
    /// regardless of whether it was ever claimed, so direct `add_start`
    /// callers that bypassed `wait_lookup` (e.g. tests) are unaffected.
    pub fn add_start(&self, fsig: Sig128, oid: u64) -> InsertHandle {
        let handle = InsertHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.builders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                handle,
                InsertBuilder {
                    fsig,
                    oid,
                    iattr: Vec::new(),
                    oattr: Vec::new(),
                },
            );
        handle
    }

    /// Record an input attribute observed while evaluating.
    pub fn add_iattr(&self, handle: InsertHandle, entry: CacheAttrEntry) {
        if let Some(builder) = self
            .builders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(&handle)
        {
            builder.iattr.push(entry);
        }
    }

    /// Record an output attribute produced while evaluating.
    pub fn add_oattr(&self, handle: InsertHandle, entry: CacheAttrEntry) {
        if let Some(builder) = self
            .builders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(&handle)
        {
            builder.oattr.push(entry);
        }
    }

    /// Commit: compute `iattr_sig`, append the record to the in-memory
    /// table (visible to `lookup` immediately), enqueue it for durable
    /// persistence, and release any threads blocked in `wait_lookup` for
    /// this key.
    ///
    /// # Errors
    /// Returns [`OcacheError::NoPendingInsert`] if `handle` doesn't
    /// correspond to an open `add_start`.
    pub fn add_end(&self, handle: InsertHandle, result: i32) -> OcacheResult<ObjectRecord> {
        let builder = self
            .builders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&handle)
            .ok_or(OcacheError::NoPendingInsert)?;

        let iattr = AttrSet::from_entries(builder.iattr);
        let oattr = AttrSet::from_entries(builder.oattr);
        let record = ObjectRecord::new(builder.oid, result, iattr, oattr);

        let table = self.table_for(builder.fsig);
        let entry_count = {
            let mut guard = table.write();
            guard.insert_record(record.clone());
            guard.entry_count()
        };
        self.metrics.record_insert();
        self.write_cache_leaves();
        self.write_filter_leaf(builder.fsig, entry_count);

        let key = (builder.fsig, builder.oid);
        self.pending.finish(key, EvalOutcome { record: record.clone() });

        if self
            .persist_ring
            .try_push(PersistJob::Record {
                fsig: builder.fsig,
                record: record.clone(),
            })
            .is_err()
        {
            debug!("persist ring full or closed, record stays in memory only");
        }

        Ok(record)
    }

    /// Evict any filter cache table idle longer than `idle_for`. On-disk
    /// data is untouched; a subsequent lookup reloads it from
    /// `cache.log`.
    pub fn evict_idle(&self, idle_for: Duration) {
        let now = std::time::Instant::now();
        let stale: Vec<Sig128> = {
            let tables = self.tables.read();
            tables
                .iter()
                .filter(|(_, fc)| fc.read().idle_for(now) >= idle_for)
                .map(|(sig, _)| *sig)
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        let mut tables = self.tables.write();
        for sig in stale {
            tables.remove(&sig);
            self.metrics.record_eviction_idle();
            self.write_filter_leaf(sig, 0);
        }
        self.write_cache_leaves();
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn attr(name: &str, byte: u8) -> CacheAttrEntry {
        CacheAttrEntry {
            name: name.to_string(),
            sig: Sig128::of_bytes(&[byte]),
        }
    }

    #[test]
    fn s1_cache_hit_elides_evaluation() {
        let dir = tempdir().unwrap();
        let cache = OCache::init(dir.path(), Arc::new(diamond_contracts::dctl::InMemoryControlTree::new()));
        let fsig = Sig128::of_bytes(b"filter-aa");

        let handle = cache.add_start(fsig, 42);
        cache.add_iattr(handle, attr("color", 1));
        cache.add_end(handle, 100).unwrap();

        let current = AttrSet::from_entries(vec![attr("color", 1)]);
        let outcome = cache.lookup(42, fsig, &current);
        match outcome {
            LookupOutcome::Hit { result, .. } => assert_eq!(result, 100),
            other => panic!("expected Hit, got {other:?}"),
        }
        assert_eq!(cache.metrics_snapshot().hits, 1);
    }

    #[test]
    fn s2_attribute_change_invalidates() {
        let dir = tempdir().unwrap();
        let cache = OCache::init(dir.path(), Arc::new(diamond_contracts::dctl::InMemoryControlTree::new()));
        let fsig = Sig128::of_bytes(b"filter-aa");

        let handle = cache.add_start(fsig, 42);
        cache.add_iattr(handle, attr("color", 1));
        cache.add_end(handle, 100).unwrap();

        let blue = AttrSet::from_entries(vec![attr("color", 2)]);
        match cache.lookup(42, fsig, &blue) {
            LookupOutcome::PartialHit { changed, .. } => assert_eq!(changed, vec!["color".to_string()]),
            other => panic!("expected PartialHit, got {other:?}"),
        }

        let handle2 = cache.add_start(fsig, 42);
        cache.add_iattr(handle2, attr("color", 2));
        cache.add_end(handle2, 10).unwrap();

        match cache.lookup(42, fsig, &blue) {
            LookupOutcome::Hit { result, .. } => assert_eq!(result, 10),
            other => panic!("expected Hit, got {other:?}"),
        }

        let table = cache.table_for(fsig);
        assert_eq!(table.read().records_for(42).len(), 2);
    }

    #[test]
    fn miss_on_empty_table() {
        let dir = tempdir().unwrap();
        let cache = OCache::init(dir.path(), Arc::new(diamond_contracts::dctl::InMemoryControlTree::new()));
        let fsig = Sig128::of_bytes(b"filter-empty");
        assert!(matches!(
            cache.lookup(1, fsig, &AttrSet::new()),
            LookupOutcome::Miss
        ));
    }

    #[test]
    fn persistence_survives_reload() {
        let dir = tempdir().unwrap();
        let fsig = Sig128::of_bytes(b"filter-durable");
        {
            let cache = OCache::init(dir.path(), Arc::new(diamond_contracts::dctl::InMemoryControlTree::new()));
            cache.start();
            let handle = cache.add_start(fsig, 5);
            cache.add_iattr(handle, attr("x", 9));
            cache.add_end(handle, 77).unwrap();
            cache.wait_finish();
            cache.stop();
        }
        let cache2 = OCache::init(dir.path(), Arc::new(diamond_contracts::dctl::InMemoryControlTree::new()));
        let current = AttrSet::from_entries(vec![attr("x", 9)]);
        match cache2.lookup(5, fsig, &current) {
            LookupOutcome::Hit { result, .. } => assert_eq!(result, 77),
            other => panic!("expected Hit after reload, got {other:?}"),
        }
    }

    proptest::proptest! {
        /// Looking up the same `(fsig, oid, iattr_sig)` twice, with no
        /// intervening insert, always returns the same result and oattr.
        #[test]
        fn repeated_lookups_are_idempotent(oid: u64, result: i32, byte: u8) {
            let dir = tempdir().unwrap();
            let cache = OCache::init(dir.path(), Arc::new(diamond_contracts::dctl::InMemoryControlTree::new()));
            let fsig = Sig128::of_bytes(b"filter-idempotence");

            let handle = cache.add_start(fsig, oid);
            cache.add_iattr(handle, attr("x", byte));
            cache.add_end(handle, result).unwrap();

            let current = AttrSet::from_entries(vec![attr("x", byte)]);
            let first = cache.lookup(oid, fsig, &current);
            let second = cache.lookup(oid, fsig, &current);

            match (first, second) {
                (
                    LookupOutcome::Hit { result: r1, oattrs: o1, iattr_sig: s1 },
                    LookupOutcome::Hit { result: r2, oattrs: o2, iattr_sig: s2 },
                ) => {
                    proptest::prop_assert_eq!(r1, r2);
                    proptest::prop_assert_eq!(o1, o2);
                    proptest::prop_assert_eq!(s1, s2);
                }
                other => proptest::prop_assert!(false, "expected two equal hits, got {other:?}"),
            }
        }
    }
}
