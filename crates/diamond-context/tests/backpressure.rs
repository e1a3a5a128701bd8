//! S5 — backpressure: with `pend_hw = 3` and `pend_lw = 2`, pushing 5
//! objects through a context whose client never calls `release_obj`
//! should stall the reader after the 3rd admission; two releases should
//! be enough to let the remaining two through. Every object passes the
//! chain (an empty chain passes everything) so `proc_ring` ends up with
//! all 5.

use std::sync::Arc;
use std::time::Duration;

use diamond_ceval::FilterChain;
use diamond_context::SearchContext;
use diamond_contracts::dctl::InMemoryControlTree;
use diamond_contracts::odisk::{MemoryObjectDisk, ObjectDisk, ObjectId};
use diamond_core::Config;
use diamond_ocache::OCache;
use tempfile::tempdir;

fn config_with_marks(hw: usize, lw: usize, root: std::path::PathBuf) -> Config {
    let mut cfg = Config::with_root(root);
    cfg.pend_hw = hw;
    cfg.pend_lw = lw;
    cfg.evaluator_threads = 1;
    cfg
}

#[test]
fn s5_reader_pauses_at_high_water_and_resumes_at_low_water() {
    let dir = tempdir().unwrap();
    let disk = Arc::new(MemoryObjectDisk::new());
    for i in 0..5u64 {
        disk.push_object(ObjectId(i), vec![]);
    }
    let dctl = Arc::new(InMemoryControlTree::new());
    let cache = OCache::init(dir.path(), Arc::clone(&dctl) as _);
    let config = config_with_marks(3, 2, dir.path().join("cache"));
    let context = SearchContext::new(config, disk, cache, dctl);

    let chain = FilterChain::compile(vec![], vec![]).unwrap();
    context.set_searchlet(0, chain).unwrap();
    context.start(0).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(context.pend_count(), 3, "reader must stall once pend_count hits the high-water mark");

    let first = context.pop_passed_timeout(Duration::from_millis(500)).unwrap().unwrap();
    context.release_obj(first).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let second = context.pop_passed_timeout(Duration::from_millis(500)).unwrap().unwrap();
    context.release_obj(second).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let mut seen = vec![first.0, second.0];
    for _ in 0..3 {
        let oid = context.pop_passed_timeout(Duration::from_millis(500)).unwrap().unwrap();
        context.release_obj(oid).unwrap();
        seen.push(oid.0);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4], "all 5 objects must eventually pass through");

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(context.status(), diamond_context::Status::Empty);
    context.stop(0).unwrap();
    assert_eq!(context.status(), diamond_context::Status::Idle);
}
