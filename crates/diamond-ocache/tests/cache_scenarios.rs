//! Integration coverage for the literal scenarios in the cache's testable
//! properties: concurrent identical lookups collapse onto one evaluation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use diamond_contracts::dctl::InMemoryControlTree;
use diamond_core::{AttrSet, CacheAttrEntry, Sig128};
use diamond_ocache::{LookupOutcome, OCache};
use tempfile::tempdir;

#[test]
fn s1_cache_hit_elides_evaluation() {
    let dir = tempdir().unwrap();
    let cache = OCache::init(dir.path(), Arc::new(InMemoryControlTree::new()));
    let fsig = Sig128::of_bytes(b"filter-aa");

    let red = CacheAttrEntry {
        name: "color".into(),
        sig: Sig128::of_bytes(b"red"),
    };

    let handle = cache.add_start(fsig, 42);
    cache.add_iattr(handle, red.clone());
    cache.add_end(handle, 100).unwrap();

    let current = AttrSet::from_entries(vec![red]);
    match cache.lookup(42, fsig, &current) {
        LookupOutcome::Hit { result, .. } => assert_eq!(result, 100),
        other => panic!("expected hit on matching attributes, got {other:?}"),
    }

    let snapshot = cache.metrics_snapshot();
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.misses, 0);
}

#[test]
fn s3_concurrent_identical_lookups_observe_one_evaluation() {
    let dir = tempdir().unwrap();
    let cache = OCache::init(dir.path(), Arc::new(InMemoryControlTree::new()));
    let fsig = Sig128::of_bytes(b"filter-bb");
    let oid = 7u64;

    let evaluations = Arc::new(AtomicUsize::new(0));
    let hit_count = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let evaluations = Arc::clone(&evaluations);
        let hit_count = Arc::clone(&hit_count);
        handles.push(thread::spawn(move || {
            let current = AttrSet::new();
            if cache.wait_lookup(oid, fsig, &current).is_hit_with(110) {
                hit_count.fetch_add(1, Ordering::SeqCst);
                return;
            }
            // This thread lost the race to be the evaluator under the
            // at-most-one discipline: it becomes the one evaluator.
            evaluations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            let handle = cache.add_start(fsig, oid);
            cache.add_end(handle, 110).unwrap();
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        evaluations.load(Ordering::SeqCst),
        1,
        "exactly one thread should have run the evaluation"
    );

    let current = AttrSet::new();
    match cache.lookup(oid, fsig, &current) {
        LookupOutcome::Hit { result, .. } => assert_eq!(result, 110),
        other => panic!("expected Hit after convergence, got {other:?}"),
    }
}

trait IsHitWith {
    fn is_hit_with(&self, expected: i32) -> bool;
}

impl IsHitWith for LookupOutcome {
    fn is_hit_with(&self, expected: i32) -> bool {
        matches!(self, LookupOutcome::Hit { result, .. } if *result == expected)
    }
}

#[test]
fn s2_lookup_sees_both_records_after_attribute_change() {
    let dir = tempdir().unwrap();
    let cache = OCache::init(dir.path(), Arc::new(InMemoryControlTree::new()));
    let fsig = Sig128::of_bytes(b"filter-cc");

    let red = CacheAttrEntry {
        name: "color".into(),
        sig: Sig128::of_bytes(b"red"),
    };
    let blue = CacheAttrEntry {
        name: "color".into(),
        sig: Sig128::of_bytes(b"blue"),
    };

    let h1 = cache.add_start(fsig, 42);
    cache.add_iattr(h1, red.clone());
    cache.add_end(h1, 100).unwrap();

    let current_blue = AttrSet::from_entries(vec![blue.clone()]);
    assert!(matches!(
        cache.lookup(42, fsig, &current_blue),
        LookupOutcome::PartialHit { .. }
    ));

    let h2 = cache.add_start(fsig, 42);
    cache.add_iattr(h2, blue);
    cache.add_end(h2, 5).unwrap();

    match cache.lookup(42, fsig, &current_blue) {
        LookupOutcome::Hit { result, .. } => assert_eq!(result, 5),
        other => panic!("expected Hit, got {other:?}"),
    }

    let current_red = AttrSet::from_entries(vec![red]);
    match cache.lookup(42, fsig, &current_red) {
        LookupOutcome::Hit { result, .. } => assert_eq!(result, 100),
        other => panic!("expected original record still reachable, got {other:?}"),
    }
}
