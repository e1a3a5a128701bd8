//! `SearchContext`: the per-search state machine and the three rings that
//! carry objects and commands through it. An explicit stage enum, with
//! every transition checked against the current stage before it's allowed
//! to happen.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use diamond_ceval::FilterChain;
use diamond_contracts::dctl::{ControlTree, DctlType};
use diamond_contracts::odisk::ObjectDisk;
use diamond_core::lock_order::LockLevel;
use diamond_core::{Config, OrderedRwLock};
use diamond_ocache::OCache;
use diamond_ring::BlockingRing;
use tracing::{debug, info};

use crate::error::{ContextError, ContextResult};
use crate::metrics::{ContextMetrics, ContextMetricsSnapshot};
use crate::pipeline::PendGate;

/// One object in flight through the pipeline, tagged with the generation
/// it was admitted under so a stale item can be dropped at the proc-ring
/// boundary instead of being published.
#[derive(Debug, Clone, Copy)]
pub struct PipelineItem {
    pub oid: diamond_contracts::odisk::ObjectId,
    pub gen: u64,
}

/// A search's lifecycle stage.
///
/// ```text
/// Idle --start--> Active --odisk EOF--> Done --drained--> Empty --stop--> Idle
///   \                                                                    /
///    \------------------------- shutdown (from any state) --------------+--> Shutdown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Active,
    Done,
    Empty,
    Shutdown,
}

impl Status {
    fn can_transition_to(self, next: Status) -> bool {
        match (self, next) {
            (Status::Idle, Status::Active)
            | (Status::Active, Status::Done)
            | (Status::Done, Status::Empty)
            | (Status::Empty, Status::Idle) => true,
            (_, Status::Shutdown) => self != Status::Shutdown,
            _ => false,
        }
    }
}

/// The per-search control block: lifecycle state, the compiled filter
/// chain, the three rings, the backpressure gate, and the worker threads
/// that drive objects through `diamond-ceval`.
pub struct SearchContext {
    status: OrderedRwLock<Status>,
    generation: AtomicU64,
    chain: OrderedRwLock<Option<FilterChain>>,
    config: Config,
    disk: Arc<dyn ObjectDisk>,
    cache: Arc<OCache>,
    pub(crate) unproc_ring: Arc<BlockingRing<PipelineItem>>,
    pub(crate) proc_ring: Arc<BlockingRing<PipelineItem>>,
    pub(crate) pend: Arc<PendGate>,
    pub(crate) metrics: ContextMetrics,
    pub(crate) running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dctl: Arc<dyn ControlTree>,
}

impl SearchContext {
    /// Build a new context, registering its lifecycle and pipeline
    /// counters under `dctl_cookie` as they change.
    #[must_use]
    pub fn new(config: Config, disk: Arc<dyn ObjectDisk>, cache: Arc<OCache>, dctl_cookie: Arc<dyn ControlTree>) -> Arc<Self> {
        let ring_capacity = config.ring_capacity;
        let pend = PendGate::new(config.pend_hw, config.pend_lw, Arc::clone(&dctl_cookie));
        dctl_cookie.write_leaf("search.status", DctlType::Text, b"Idle".to_vec());
        Arc::new(Self {
            status: OrderedRwLock::new(LockLevel::Context, Status::Idle),
            generation: AtomicU64::new(0),
            chain: OrderedRwLock::new(LockLevel::Context, None),
            config,
            disk,
            cache,
            unproc_ring: Arc::new(BlockingRing::new(ring_capacity)),
            proc_ring: Arc::new(BlockingRing::new(ring_capacity)),
            pend,
            metrics: ContextMetrics::default(),
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            dctl: dctl_cookie,
        })
    }

    #[must_use]
    pub fn status(&self) -> Status {
        *self.status.read()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn disk(&self) -> &Arc<dyn ObjectDisk> {
        &self.disk
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<OCache> {
        &self.cache
    }

    #[must_use]
    pub fn pend_count(&self) -> usize {
        self.pend.count()
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> ContextMetricsSnapshot {
        self.metrics.snapshot(self.pend_count())
    }

    /// Block for a passed object, or `Ok(None)` if none arrives within
    /// `timeout` while the ring stays open.
    ///
    /// # Errors
    /// Returns [`diamond_ring::Closed`] once the context has been shut
    /// down and `proc_ring` has fully drained.
    pub fn pop_passed_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<diamond_contracts::odisk::ObjectId>, diamond_ring::Closed> {
        Ok(self.proc_ring.pop_timeout(timeout)?.map(|item| item.oid))
    }

    fn check_generation(&self, gen: u64) -> ContextResult<()> {
        let current = self.generation();
        if gen != current {
            return Err(ContextError::StaleGeneration { got: gen, current });
        }
        Ok(())
    }

    fn transition(&self, next: Status) -> ContextResult<()> {
        let mut status = self.status.write();
        if !status.can_transition_to(next) {
            return Err(ContextError::InvalidTransition {
                from: format!("{status:?}"),
                to: format!("{next:?}"),
            });
        }
        debug!(from = ?*status, to = ?next, "search context transition");
        *status = next;
        self.dctl
            .write_leaf("search.status", DctlType::Text, format!("{next:?}").into_bytes());
        Ok(())
    }

    /// Install the filter chain this search will run. Only valid while
    /// `Idle`, before `start`.
    ///
    /// # Errors
    /// Returns [`ContextError::StaleGeneration`] if `gen` doesn't match the
    /// context's current generation, or [`ContextError::InvalidTransition`]
    /// if the search has already started.
    pub fn set_searchlet(&self, gen: u64, chain: FilterChain) -> ContextResult<()> {
        self.check_generation(gen)?;
        if self.status() != Status::Idle {
            return Err(ContextError::InvalidTransition {
                from: format!("{:?}", self.status()),
                to: "searchlet-set".to_string(),
            });
        }
        *self.chain.write() = Some(chain);
        Ok(())
    }

    /// Bump the live generation. Objects and commands tagged with an older
    /// generation are dropped silently at the proc-ring boundary — this is
    /// routine superseding (a client re-issuing `set_list` mid-stream), not
    /// a fault.
    pub fn set_list(&self, new_gen: u64) {
        let previous = self.generation.swap(new_gen, Ordering::AcqRel);
        if new_gen != previous {
            info!(previous, new_gen, "search context generation advanced");
        }
    }

    /// Transition `Idle -> Active` and spawn the odisk-reader and
    /// evaluator-pool threads.
    ///
    /// # Errors
    /// Returns [`ContextError::StaleGeneration`] on a stale `gen`,
    /// [`ContextError::SearchletNotSet`] if no filter chain was installed,
    /// [`ContextError::InvalidTransition`] if not currently `Idle`, or
    /// [`ContextError::ThreadSpawn`] if a worker thread fails to spawn.
    pub fn start(self: &Arc<Self>, gen: u64) -> ContextResult<()> {
        self.check_generation(gen)?;
        if self.chain.read().is_none() {
            return Err(ContextError::SearchletNotSet);
        }
        self.transition(Status::Active)?;
        self.running.store(true, Ordering::Release);

        let mut workers = self.workers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let reader = std::thread::Builder::new()
            .name("diamond-odisk-reader".into())
            .spawn({
                let this = Arc::clone(self);
                move || crate::pipeline::run_reader(&this)
            })
            .map_err(|e| ContextError::ThreadSpawn(e.to_string()))?;
        workers.push(reader);

        for i in 0..self.config.evaluator_threads {
            let handle = std::thread::Builder::new()
                .name(format!("diamond-evaluator-{i}"))
                .spawn({
                    let this = Arc::clone(self);
                    move || crate::pipeline::run_evaluator(&this, i as u64)
                })
                .map_err(|e| ContextError::ThreadSpawn(e.to_string()))?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Transition `Empty -> Idle`, joining all worker threads. Valid once
    /// the pipeline has fully drained.
    ///
    /// # Errors
    /// Returns [`ContextError::StaleGeneration`] on a stale `gen`, or
    /// [`ContextError::InvalidTransition`] if not currently `Empty`.
    pub fn stop(&self, gen: u64) -> ContextResult<()> {
        self.check_generation(gen)?;
        self.transition(Status::Idle)?;
        self.join_workers();
        Ok(())
    }

    /// Return an object to the pool, decrementing `pend_count` and waking
    /// a reader thread paused at the high-water mark.
    ///
    /// # Errors
    /// Propagates an error from the underlying object store's `release`.
    pub fn release_obj(&self, obj: diamond_contracts::odisk::ObjectId) -> ContextResult<()> {
        self.disk.release(obj)?;
        self.pend.release();
        Ok(())
    }

    /// Tear the context down unconditionally from any non-terminal state,
    /// closing both rings so blocked worker threads wake and exit.
    pub fn shutdown(&self) {
        if self.transition(Status::Shutdown).is_err() {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.unproc_ring.close();
        self.proc_ring.close();
        self.join_workers();
    }

    fn join_workers(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub(crate) fn chain_snapshot(&self) -> Option<FilterChain> {
        self.chain.read().clone()
    }

    pub(crate) fn mark_done(&self) {
        let _ = self.transition(Status::Done);
    }

    pub(crate) fn mark_empty_if_drained(&self) -> bool {
        if self.status() != Status::Done {
            return false;
        }
        if self.pend_count() != 0 {
            return false;
        }
        self.transition(Status::Empty).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diamond_contracts::dctl::InMemoryControlTree;
    use diamond_contracts::odisk::MemoryObjectDisk;

    fn ctx() -> Arc<SearchContext> {
        let config = Config::with_root(std::env::temp_dir());
        let disk: Arc<dyn ObjectDisk> = Arc::new(MemoryObjectDisk::new());
        let dctl: Arc<dyn ControlTree> = Arc::new(InMemoryControlTree::new());
        let cache = OCache::init(config.cache_root.clone(), Arc::clone(&dctl));
        SearchContext::new(config, disk, cache, dctl)
    }

    #[test]
    fn starts_idle() {
        assert_eq!(ctx().status(), Status::Idle);
    }

    #[test]
    fn start_without_searchlet_is_rejected() {
        let context = ctx();
        assert!(matches!(context.start(0), Err(ContextError::SearchletNotSet)));
    }

    #[test]
    fn stale_generation_is_rejected_for_start_stop_and_searchlet() {
        let context = ctx();
        context.set_list(5);
        assert!(matches!(
            context.start(0),
            Err(ContextError::StaleGeneration { got: 0, current: 5 })
        ));
        assert!(matches!(
            context.stop(0),
            Err(ContextError::StaleGeneration { got: 0, current: 5 })
        ));
        let chain = FilterChain::compile(vec![], vec![]).unwrap();
        assert!(matches!(
            context.set_searchlet(0, chain),
            Err(ContextError::StaleGeneration { got: 0, current: 5 })
        ));
    }

    #[test]
    fn set_list_superseding_does_not_error() {
        let context = ctx();
        context.set_list(1);
        context.set_list(2);
        assert_eq!(context.generation(), 2);
    }

    #[test]
    fn stop_before_empty_is_rejected() {
        let context = ctx();
        assert!(matches!(context.stop(0), Err(ContextError::InvalidTransition { .. })));
    }
}
