//! Filter evaluator: walks a compiled chain for one object, consulting and
//! populating the cache, short-circuiting on the first drop. Control flow
//! follows a "walk a staged pipeline, skip what's already decided, stop at
//! the first disqualifying stage" shape.

use std::sync::Arc;
use std::time::Instant;

use diamond_contracts::odisk::{ObjectDisk, ObjectId};
use diamond_core::{AttrSet, CacheAttrEntry, Sig128};
use diamond_ocache::{LookupOutcome, OCache, FILTER_ERR};
use tracing::{debug, warn};

use crate::error::CevalResult;
use crate::filter::{Filter, FilterChain};

/// Per-filter callback invoked after each filter decision (name, passed,
/// elapsed). Used by both `filters1` and `filters2`.
pub type FilterStepCb<'a> = dyn FnMut(&str, bool, std::time::Duration) + 'a;

/// Whether the scheduler should keep going; polled between filters and
/// before cache calls so a cancelled search stops promptly.
pub type ContinueCb<'a> = dyn Fn() -> bool + 'a;

/// Evaluator state for one worker thread: the compiled chain, the object
/// store it reads from, the cache it consults, and the counters it feeds.
pub struct CevalState {
    pub chain: FilterChain,
    pub disk: Arc<dyn ObjectDisk>,
    pub cache: Arc<OCache>,
    pub thread_id: u64,
}

/// Result of a full-evaluation pass over one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiltersOutcome {
    /// Every filter passed; the object should be published to `proc_ring`.
    Passed,
    /// A filter dropped the object; the chain stopped there.
    Dropped,
    /// `continue_cb` returned false before the chain finished.
    Aborted,
}

fn current_attrs(disk: &dyn ObjectDisk, obj: ObjectId, reads: &[String]) -> CevalResult<AttrSet> {
    let mut entries = Vec::with_capacity(reads.len());
    for name in reads {
        if let Some(bytes) = disk.get_attr(obj, name)? {
            entries.push(CacheAttrEntry {
                name: name.clone(),
                sig: Sig128::of_bytes(&bytes),
            });
        }
    }
    Ok(AttrSet::from_entries(entries))
}

impl CevalState {
    /// Pre-fetch pass: probe the cache using only the already-known
    /// `initial_attrs` snapshot, never touching `disk`. Lets the scheduler
    /// skip reading objects already known to fail.
    pub fn filters1(&self, oid: ObjectId, initial_attrs: &AttrSet, cb: &mut FilterStepCb<'_>) {
        for filter in self.chain.filters() {
            let start = Instant::now();
            let outcome = self.cache.lookup(oid.0, filter.sig(), initial_attrs);
            let pass = match outcome {
                LookupOutcome::Hit { result, .. } => result != FILTER_ERR && result >= filter.threshold(),
                // Unknown without a read; optimistically report pass so
                // the scheduler doesn't skip a read it actually needs.
                LookupOutcome::Miss | LookupOutcome::PartialHit { .. } => true,
            };
            cb(filter.name(), pass, start.elapsed());
        }
    }

    /// Full evaluation pass. Runs the chain in declared order,
    /// short-circuiting at the first drop.
    ///
    /// # Errors
    /// Returns an error if an attribute read from `disk` fails in an
    /// unrecoverable way (not a `Missing`, which is handled inline).
    pub fn filters2(
        &self,
        obj: ObjectId,
        force: bool,
        continue_cb: &ContinueCb<'_>,
        cb: &mut FilterStepCb<'_>,
        mut stats_drop_fn: impl FnMut(),
        mut stats_process_fn: impl FnMut(),
    ) -> CevalResult<FiltersOutcome> {
        for filter in self.chain.filters() {
            if !continue_cb() {
                return Ok(FiltersOutcome::Aborted);
            }
            let start = Instant::now();

            let reads = filter.declared_reads();
            let attrs = current_attrs(self.disk.as_ref(), obj, reads)?;

            let outcome = self.cache.wait_lookup(obj.0, filter.sig(), &attrs);
            let (result, oattrs) = match outcome {
                LookupOutcome::Hit { result, oattrs, .. } if !force => (result, oattrs),
                LookupOutcome::Hit { .. } | LookupOutcome::Miss | LookupOutcome::PartialHit { .. } => {
                    self.run_and_cache(filter.as_ref(), obj, &attrs)?
                }
            };

            for (name, bytes) in &oattrs {
                self.disk
                    .set_attr(obj, name, Sig128::of_bytes(bytes), bytes)?;
            }

            let passed = result != FILTER_ERR && result >= filter.threshold();
            cb(filter.name(), passed, start.elapsed());
            if !passed {
                stats_drop_fn();
                return Ok(FiltersOutcome::Dropped);
            }
        }
        stats_process_fn();
        Ok(FiltersOutcome::Passed)
    }

    fn run_and_cache(
        &self,
        filter: &dyn Filter,
        obj: ObjectId,
        attrs: &AttrSet,
    ) -> CevalResult<(i32, Vec<(String, Vec<u8>)>)> {
        let handle = self.cache.add_start(filter.sig(), obj.0);
        for entry in attrs.iter() {
            self.cache.add_iattr(handle, entry.clone());
        }
        match filter.run(self.disk.as_ref(), obj) {
            Ok(run_outcome) => {
                for (name, bytes) in &run_outcome.oattrs {
                    self.cache.add_oattr(
                        handle,
                        CacheAttrEntry {
                            name: name.clone(),
                            sig: Sig128::of_bytes(bytes),
                        },
                    );
                }
                self.cache.add_end(handle, run_outcome.result)?;
                debug!(filter = filter.name(), thread = self.thread_id, "filter evaluated");
                Ok((run_outcome.result, run_outcome.oattrs))
            }
            Err(e) => {
                warn!(filter = filter.name(), error = %e, "filter runtime failure, caching FILTER_ERR");
                self.cache.add_end(handle, FILTER_ERR)?;
                Ok((FILTER_ERR, Vec::new()))
            }
        }
    }
}
