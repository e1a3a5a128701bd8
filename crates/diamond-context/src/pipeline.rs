//! Backpressure gate and worker-thread bodies for the odisk-reader and
//! evaluator pool. The reader thread pauses admission once `pend_count`
//! reaches `pend_hw` and only resumes once it falls back to `pend_lw`;
//! the hysteresis gap keeps a reader sitting right at the boundary from
//! flapping pause/resume on every single release.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use diamond_ceval::{CevalState, FiltersOutcome};
use diamond_contracts::dctl::{ControlTree, DctlType};
use tracing::{debug, warn};

use crate::lifecycle::{PipelineItem, SearchContext};

#[derive(Debug)]
struct GateState {
    count: usize,
    paused: bool,
}

/// Tracks objects admitted into the pipeline but not yet released by the
/// consumer, pausing admission between `pend_hw` and `pend_lw`.
pub struct PendGate {
    state: Mutex<GateState>,
    cv: Condvar,
    hw: usize,
    lw: usize,
    dctl: Arc<dyn ControlTree>,
}

impl PendGate {
    #[must_use]
    pub fn new(hw: usize, lw: usize, dctl: Arc<dyn ControlTree>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState { count: 0, paused: false }),
            cv: Condvar::new(),
            hw,
            lw: lw.min(hw),
            dctl,
        })
    }

    fn write_pend_count_leaf(&self, count: usize) {
        self.dctl
            .write_leaf("pipeline.pend_count", DctlType::U64, (count as u64).to_le_bytes().to_vec());
    }

    /// Blocks until there is room, then admits one object.
    pub fn admit(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.paused {
                if state.count <= self.lw {
                    state.paused = false;
                } else {
                    state = self.cv.wait(state).unwrap();
                    continue;
                }
            }
            if state.count >= self.hw {
                state.paused = true;
                continue;
            }
            break;
        }
        state.count += 1;
        self.write_pend_count_leaf(state.count);
    }

    /// Releases one previously admitted object, waking any reader paused
    /// on the gate.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.count > 0, "release without a matching admit");
        state.count = state.count.saturating_sub(1);
        self.write_pend_count_leaf(state.count);
        self.cv.notify_all();
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.state.lock().unwrap().count
    }

    /// Block (with a bounded poll, so `should_continue` gets re-checked)
    /// until the gate's count reaches zero or `should_continue` says stop.
    pub fn wait_until_empty(&self, poll: Duration, should_continue: &dyn Fn() -> bool) {
        let mut state = self.state.lock().unwrap();
        while state.count != 0 && should_continue() {
            let (next, _) = self.cv.wait_timeout(state, poll).unwrap();
            state = next;
        }
    }
}

/// Body of the odisk-reader thread: pull objects from the object store,
/// gate admission through `context.pend`, and hand each one to
/// `unproc_ring` tagged with the generation it was read under. On disk
/// EOF, transitions the context to `Done` and then waits for in-flight
/// objects to drain before transitioning to `Empty`.
pub fn run_reader(context: &Arc<SearchContext>) {
    loop {
        if !context.running.load(Ordering::Acquire) {
            break;
        }
        match context.disk().next_obj() {
            Ok(Some(oid)) => {
                context.pend.admit();
                let item = PipelineItem {
                    oid,
                    gen: context.generation(),
                };
                if context.unproc_ring.push(item).is_err() {
                    context.pend.release();
                    break;
                }
                context.metrics.record_read();
            }
            Ok(None) => {
                context.mark_done();
                break;
            }
            Err(e) => {
                warn!(error = %e, "odisk read failed, stopping reader");
                break;
            }
        }
    }
    context
        .pend
        .wait_until_empty(Duration::from_millis(20), &|| context.running.load(Ordering::Acquire));
    context.mark_empty_if_drained();
}

/// Body of one evaluator thread: pull tagged objects off `unproc_ring`,
/// drop anything superseded by a later `set_list` without surfacing an
/// error, run the compiled chain against the survivors, and publish
/// passers onto `proc_ring`. A dropped or filtered-out object is released
/// back to the store immediately since it will never reach a client able
/// to call `release_obj` for it.
pub fn run_evaluator(context: &Arc<SearchContext>, thread_id: u64) {
    loop {
        let item = match context.unproc_ring.pop() {
            Ok(item) => item,
            Err(diamond_ring::Closed) => break,
        };

        if item.gen != context.generation() {
            debug!(oid = item.oid.0, item_gen = item.gen, current = context.generation(), "dropping superseded object");
            let _ = context.disk().release(item.oid);
            context.pend.release();
            continue;
        }

        let Some(chain) = context.chain_snapshot() else {
            let _ = context.disk().release(item.oid);
            context.pend.release();
            continue;
        };

        let state = CevalState {
            chain,
            disk: Arc::clone(context.disk()),
            cache: Arc::clone(context.cache()),
            thread_id,
        };

        let outcome = state.filters2(
            item.oid,
            false,
            &|| context.running.load(Ordering::Acquire),
            &mut |_, _, _| {},
            || context.metrics.record_dropped(),
            || context.metrics.record_passed(),
        );

        match outcome {
            Ok(FiltersOutcome::Passed) => {
                if context.proc_ring.push(item).is_err() {
                    let _ = context.disk().release(item.oid);
                    context.pend.release();
                }
            }
            Ok(FiltersOutcome::Dropped) => {
                let _ = context.disk().release(item.oid);
                context.pend.release();
            }
            Ok(FiltersOutcome::Aborted) => {
                context.metrics.record_aborted();
                let _ = context.disk().release(item.oid);
                context.pend.release();
            }
            Err(e) => {
                warn!(error = %e, "filter evaluation failed");
                let _ = context.disk().release(item.oid);
                context.pend.release();
            }
        }

        context.mark_empty_if_drained();
    }
}
