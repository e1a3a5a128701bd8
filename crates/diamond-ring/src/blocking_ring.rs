//! `Condvar`-layered bounded channel used for the search context's three
//! rings (`unproc`, `proc`, `bg_ops`). Built on the same single-lock
//! discipline as [`crate::ring::Ring`], which is non-blocking by itself
//! and expects callers to coordinate via a condition variable
//! externally; this packages that coordination once so the three call
//! sites don't each reinvent it.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use diamond_core::{LockLevel, LockScope};
use tracing::debug;

use crate::drain_rate::DrainRate;

const DRAIN_RATE_ALPHA: f64 = 0.3;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    drate: DrainRate,
}

/// A bounded FIFO with blocking `push`/`pop`, plus non-blocking `try_*`
/// variants for callers implementing their own backpressure policy (the
/// search pipeline checks `pend_count` against the high/low-water marks
/// itself rather than blocking on ring fullness).
pub struct BlockingRing<T> {
    capacity: usize,
    state: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Returned by [`BlockingRing::push`]/[`BlockingRing::pop`] when the ring
/// has been [`BlockingRing::close`]d.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

/// Pairs a raw [`MutexGuard`] with a [`LockScope`] so the ring's `Ring`
/// level stays visible to the lock-order checker even though `Condvar`
/// requires the bare guard type. `into_raw` drops the scope (the lock is
/// conceptually released the moment it's handed to `Condvar::wait`) and
/// `wrap` re-enters it once `wait` returns with the lock held again.
struct RingGuard<'a, T> {
    guard: MutexGuard<'a, Inner<T>>,
    _scope: LockScope,
}

impl<'a, T> RingGuard<'a, T> {
    fn wrap(guard: MutexGuard<'a, Inner<T>>) -> Self {
        Self {
            guard,
            _scope: LockScope::enter(LockLevel::Ring),
        }
    }

    fn into_raw(self) -> MutexGuard<'a, Inner<T>> {
        self.guard
    }
}

impl<T> Deref for RingGuard<'_, T> {
    type Target = Inner<T>;
    fn deref(&self) -> &Inner<T> {
        &self.guard
    }
}

impl<T> DerefMut for RingGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Inner<T> {
        &mut self.guard
    }
}

impl<T> BlockingRing<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            capacity,
            state: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                drate: DrainRate::new(DRAIN_RATE_ALPHA),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smoothed dequeue rate (items/sec), rolled forward as a side effect
    /// of the call. Used by the admission path to decide whether draining
    /// has caught up enough to resume without waiting for `pend_count` to
    /// reach the low-water mark.
    pub fn drate(&self) -> f64 {
        self.lock().drate.sample()
    }

    fn lock(&self) -> RingGuard<'_, T> {
        RingGuard::wrap(self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Non-blocking push; `Err(Some(item))` if full, `Err(None)` if closed.
    pub fn try_push(&self, item: T) -> Result<(), Option<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(None);
        }
        if state.items.len() >= self.capacity {
            return Err(Some(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until there's room (or the ring closes), then push.
    pub fn push(&self, item: T) -> Result<(), Closed> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(Closed);
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            let raw = state.into_raw();
            let raw = self
                .not_full
                .wait(raw)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = RingGuard::wrap(raw);
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            state.drate.record_dequeue();
            drop(state);
            self.not_full.notify_one();
        }
        item
    }

    /// Block until an item is available or the ring closes and drains.
    pub fn pop(&self) -> Result<T, Closed> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.drate.record_dequeue();
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(Closed);
            }
            let raw = state.into_raw();
            let raw = self
                .not_empty
                .wait(raw)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = RingGuard::wrap(raw);
        }
    }

    /// Block up to `timeout` for an item; `Ok(None)` on timeout with the
    /// ring still open.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, Closed> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.drate.record_dequeue();
                drop(state);
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if state.closed {
                return Err(Closed);
            }
            let raw = state.into_raw();
            let (next, timed_out) = self
                .not_empty
                .wait_timeout(raw, timeout)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut next = RingGuard::wrap(next);
            if timed_out.timed_out() {
                let item = next.items.pop_front();
                if item.is_some() {
                    next.drate.record_dequeue();
                }
                return Ok(item);
            }
            state = next;
        }
    }

    /// Wake every blocked producer/consumer; subsequent `push` calls fail
    /// and `pop` drains whatever remains before returning `Err(Closed)`.
    pub fn close(&self) {
        let remaining = {
            let mut state = self.lock();
            state.closed = true;
            state.items.len()
        };
        debug!(remaining, "ring closed");
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_round_trip() {
        let ring: BlockingRing<i32> = BlockingRing::new(4);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.pop(), Ok(1));
        assert_eq!(ring.pop(), Ok(2));
    }

    #[test]
    fn pop_blocks_until_pushed() {
        let ring = Arc::new(BlockingRing::<i32>::new(1));
        let r2 = Arc::clone(&ring);
        let handle = thread::spawn(move || r2.pop().unwrap());
        thread::sleep(Duration::from_millis(20));
        ring.push(7).unwrap();
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn close_unblocks_waiting_pop() {
        let ring = Arc::new(BlockingRing::<i32>::new(1));
        let r2 = Arc::clone(&ring);
        let handle = thread::spawn(move || r2.pop());
        thread::sleep(Duration::from_millis(20));
        ring.close();
        assert_eq!(handle.join().unwrap(), Err(Closed));
    }

    #[test]
    fn push_blocks_until_room() {
        let ring = Arc::new(BlockingRing::<i32>::new(1));
        ring.push(1).unwrap();
        let r2 = Arc::clone(&ring);
        let handle = thread::spawn(move || r2.push(2));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ring.pop(), Ok(1));
        handle.join().unwrap().unwrap();
        assert_eq!(ring.pop(), Ok(2));
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let ring: BlockingRing<i32> = BlockingRing::new(1);
        assert_eq!(ring.pop_timeout(Duration::from_millis(10)), Ok(None));
    }

    #[test]
    fn drate_reflects_completed_pops() {
        let ring: BlockingRing<i32> = BlockingRing::new(4);
        assert_eq!(ring.drate(), 0.0);
        for i in 0..5 {
            ring.push(i).unwrap();
        }
        for _ in 0..5 {
            ring.pop().unwrap();
        }
        thread::sleep(Duration::from_millis(2));
        assert!(ring.drate() > 0.0, "expected a positive drain rate after pops");
    }
}
