//! S6 — crash recovery: a truncated trailing log record must not survive
//! reload, and every record that preceded it must.

use std::fs::OpenOptions;
use std::sync::Arc;

use diamond_contracts::dctl::InMemoryControlTree;
use diamond_core::{AttrSet, CacheAttrEntry, Sig128};
use diamond_ocache::{LookupOutcome, OCache};
use tempfile::tempdir;

#[test]
fn s6_truncated_tail_record_is_dropped_prior_records_survive() {
    let dir = tempdir().unwrap();
    let fsig = Sig128::of_bytes(b"filter-crash");

    {
        let cache = OCache::init(dir.path(), Arc::new(InMemoryControlTree::new()));
        cache.start();

        for oid in 0..3u64 {
            let handle = cache.add_start(fsig, oid);
            cache.add_iattr(
                handle,
                CacheAttrEntry {
                    name: "n".into(),
                    sig: Sig128::of_bytes(&[oid as u8]),
                },
            );
            cache.add_end(handle, 100 + i32::from(oid as u8)).unwrap();
        }
        cache.wait_finish();
        cache.stop();
    }

    let log_path = dir.path().join(fsig.to_hex()).join("cache.log");
    let full_len = std::fs::metadata(&log_path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&log_path).unwrap();
    file.set_len(full_len - 5).unwrap();
    drop(file);

    let cache = OCache::init(dir.path(), Arc::new(InMemoryControlTree::new()));
    for oid in 0..2u64 {
        let current = AttrSet::from_entries(vec![CacheAttrEntry {
            name: "n".into(),
            sig: Sig128::of_bytes(&[oid as u8]),
        }]);
        match cache.lookup(oid, fsig, &current) {
            LookupOutcome::Hit { result, .. } => assert_eq!(result, 100 + i32::from(oid as u8)),
            other => panic!("expected record {oid} to survive reload, got {other:?}"),
        }
    }

    let current_2 = AttrSet::from_entries(vec![CacheAttrEntry {
        name: "n".into(),
        sig: Sig128::of_bytes(&[2u8]),
    }]);
    assert!(
        matches!(cache.lookup(2, fsig, &current_2), LookupOutcome::Miss),
        "truncated trailing record must not reappear"
    );

    let reloaded_twice = OCache::init(dir.path(), Arc::new(InMemoryControlTree::new()));
    assert!(matches!(
        reloaded_twice.lookup(2, fsig, &current_2),
        LookupOutcome::Miss
    ));
}

#[test]
fn every_committed_record_survives_a_clean_stop_and_reload() {
    let dir = tempdir().unwrap();
    let fsig = Sig128::of_bytes(b"filter-durable");

    {
        let cache = OCache::init(dir.path(), Arc::new(InMemoryControlTree::new()));
        cache.start();
        for oid in 0..10u64 {
            let handle = cache.add_start(fsig, oid);
            cache.add_end(handle, 100 + i32::from(oid as u8)).unwrap();
        }
        cache.wait_finish();
        cache.stop();
    }

    let reopened = OCache::init(dir.path(), Arc::new(InMemoryControlTree::new()));
    for oid in 0..10u64 {
        let current = AttrSet::new();
        match reopened.lookup(oid, fsig, &current) {
            LookupOutcome::Hit { result, .. } => assert_eq!(result, 100 + i32::from(oid as u8)),
            other => panic!("expected record {oid} to reload intact, got {other:?}"),
        }
    }
}
