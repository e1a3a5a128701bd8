//! At-most-one-concurrent-evaluation map: the first caller for a given
//! `(fsig, oid)` key performs the evaluation; later callers for the same
//! key block on its outcome instead of duplicating the work. Same "first
//! caller installs, the rest wait on it" shape as a debounce map keyed by
//! signal identity.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use diamond_core::Sig128;

use crate::record::ObjectRecord;

pub type PendingKey = (Sig128, u64);

/// Outcome handed to anyone who was blocked on a pending evaluation.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub record: ObjectRecord,
}

struct Slot {
    outcome: Mutex<Option<EvalOutcome>>,
    cv: Condvar,
}

/// Tracks in-flight evaluations so concurrent `wait_lookup` calls for the
/// same key collapse onto a single evaluator.
#[derive(Default)]
pub struct PendingMap {
    slots: Mutex<HashMap<PendingKey, Arc<Slot>>>,
}

impl PendingMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to become the evaluator for `key`. Returns `true` if this
    /// caller must run the evaluation (and later call [`Self::finish`]),
    /// `false` if another thread already owns it.
    pub fn begin(&self, key: PendingKey) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if slots.contains_key(&key) {
            false
        } else {
            slots.insert(
                key,
                Arc::new(Slot {
                    outcome: Mutex::new(None),
                    cv: Condvar::new(),
                }),
            );
            true
        }
    }

    /// Block until the owning thread calls [`Self::finish`] for `key`.
    /// Panics if no one ever called [`Self::begin`] for this key first —
    /// callers must check `begin` returned `false` before calling this.
    #[must_use]
    pub fn wait(&self, key: PendingKey) -> EvalOutcome {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(
                slots
                    .get(&key)
                    .expect("wait() called without a matching begin()"),
            )
        };
        let mut outcome = slot
            .outcome
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while outcome.is_none() {
            outcome = slot
                .cv
                .wait(outcome)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        outcome.clone().expect("checked Some above")
    }

    /// Publish the result and release the key for future evaluations.
    pub fn finish(&self, key: PendingKey, result: EvalOutcome) {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            slots.remove(&key)
        };
        if let Some(slot) = slot {
            *slot
                .outcome
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(result);
            slot.cv.notify_all();
        }
    }
}
