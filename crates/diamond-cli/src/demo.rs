//! A synthetic end-to-end run: seed an in-memory object store with
//! `score` attributes, compile a single threshold filter, drive a
//! [`SearchContext`] through it, and print a run summary. Exercises the
//! whole stack (`diamond-contracts`, `diamond-ocache`, `diamond-ceval`,
//! `diamond-context`) without any real transport or device attached.

use std::sync::Arc;
use std::time::Duration;

use diamond_ceval::{CevalResult, Filter, FilterChain, FilterRunOutcome, FilterSpec};
use diamond_context::SearchContext;
use diamond_contracts::dctl::{ControlTree, InMemoryControlTree};
use diamond_contracts::odisk::{MemoryObjectDisk, ObjectDisk, ObjectId};
use diamond_core::{Config, Sig128};
use diamond_ocache::OCache;

use crate::CliError;

struct ScoreThresholdFilter {
    sig: Sig128,
    threshold: i32,
    reads: Vec<String>,
}

impl Filter for ScoreThresholdFilter {
    fn name(&self) -> &str {
        "score_threshold"
    }

    fn sig(&self) -> Sig128 {
        self.sig
    }

    fn threshold(&self) -> i32 {
        self.threshold
    }

    fn declared_reads(&self) -> &[String] {
        &self.reads
    }

    fn run(&self, disk: &dyn ObjectDisk, obj: ObjectId) -> CevalResult<FilterRunOutcome> {
        let score = disk
            .get_attr(obj, "score")?
            .and_then(|bytes| bytes.first().copied())
            .unwrap_or(0);
        Ok(FilterRunOutcome {
            result: i32::from(score),
            oattrs: Vec::new(),
        })
    }
}

pub struct DemoArgs {
    pub objects: u8,
    pub threshold: i32,
    pub pend_hw: usize,
    pub pend_lw: usize,
}

pub fn run_demo(args: DemoArgs, cache_root: std::path::PathBuf) -> Result<(), CliError> {
    let disk = Arc::new(MemoryObjectDisk::new());
    for i in 0..args.objects {
        disk.push_object(ObjectId(u64::from(i)), vec![("score", vec![i])]);
    }

    let dctl: Arc<dyn ControlTree> = Arc::new(InMemoryControlTree::new());
    let cache = OCache::init(cache_root.clone(), Arc::clone(&dctl));
    cache.start();

    let mut config = Config::with_root(cache_root);
    config.pend_hw = args.pend_hw;
    config.pend_lw = args.pend_lw.min(args.pend_hw);
    config.evaluator_threads = 2;

    let context = SearchContext::new(config, disk, Arc::clone(&cache), Arc::clone(&dctl));

    let spec = FilterSpec {
        name: "score_threshold".to_string(),
        sig: Sig128::of_bytes(b"score_threshold"),
        threshold: args.threshold,
        deps: Vec::new(),
        args: Vec::new(),
        blob: None,
    };
    let body: Arc<dyn Filter> = Arc::new(ScoreThresholdFilter {
        sig: spec.sig,
        threshold: args.threshold,
        reads: vec!["score".to_string()],
    });
    let chain = FilterChain::compile(vec![spec], vec![body])
        .map_err(|e| CliError::Other(e.to_string()))?;

    context
        .set_searchlet(0, chain)
        .map_err(|e| CliError::Other(e.to_string()))?;
    context.start(0).map_err(|e| CliError::Other(e.to_string()))?;

    let mut passed = 0u32;
    while let Some(obj) = context
        .pop_passed_timeout(Duration::from_millis(200))
        .unwrap_or(None)
    {
        passed += 1;
        context
            .release_obj(obj)
            .map_err(|e| CliError::Other(e.to_string()))?;
    }

    // Give the drain watcher a moment to observe pend_count reaching zero.
    std::thread::sleep(Duration::from_millis(50));
    context.stop(0).map_err(|e| CliError::Other(e.to_string()))?;
    cache.wait_finish();
    cache.stop();

    let snapshot = context.metrics_snapshot();
    let cache_snapshot = cache.metrics_snapshot();
    println!("objects read:    {}", snapshot.objects_read);
    println!("objects passed:  {passed}");
    println!("objects dropped: {}", snapshot.objects_dropped);
    println!(
        "cache hit rate:  {:.2}",
        cache_snapshot.hit_rate()
    );

    if let Ok(status) = dctl.read_leaf("search.status") {
        println!("dctl search.status:   {}", String::from_utf8_lossy(&status.data));
    }
    if let Ok(pend) = dctl.read_leaf("pipeline.pend_count") {
        let count = u64::from_le_bytes(pend.data.try_into().unwrap_or([0; 8]));
        println!("dctl pipeline.pend_count: {count}");
    }
    if let Ok(hit_rate) = dctl.read_leaf("cache.hit_rate") {
        let rate = f64::from_le_bytes(hit_rate.data.try_into().unwrap_or([0; 8]));
        println!("dctl cache.hit_rate:  {rate:.2}");
    }

    Ok(())
}
