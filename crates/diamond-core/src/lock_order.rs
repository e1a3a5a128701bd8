//! Lock ordering + debug-only deadlock prevention + contention instrumentation.
//!
//! This system has one lock-hierarchy rule: acquire in the order
//! context, then filter-cache table, then ring — never the reverse.
//!
//! This module gives that rule a debug-time enforcement mechanism: each
//! thread tracks the highest [`LockLevel`] rank it currently holds, and
//! acquiring a lock with a lower-or-equal rank while already holding one
//! panics in debug builds. Outside `debug_assertions` the checks compile to
//! nothing; acquire/contention counters are always-on and cheap (a
//! `try_lock` first, so the uncontended path costs a couple of atomic
//! increments).
//!
//! Hold these locks only for the critical section; never across blocking
//! I/O (persistence writes go through a queue, not through a held lock).

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[cfg(debug_assertions)]
use std::cell::RefCell;

trait DurationNanosU64 {
    fn as_nanos_u64(&self) -> u64;
}

impl DurationNanosU64 for std::time::Duration {
    #[inline]
    fn as_nanos_u64(&self) -> u64 {
        self.as_nanos().try_into().unwrap_or(u64::MAX)
    }
}

/// Global lock hierarchy for this core: lower rank must be acquired before
/// higher rank when locks nest within one thread.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockLevel {
    /// `SearchContext` state (status, pend_count, generation).
    Context,
    /// A single filter cache table (`Fcache::table`).
    FilterCacheTable,
    /// Any ring buffer's internal lock (unproc/proc/bg_ops/insert rings).
    Ring,
}

impl LockLevel {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::Context, Self::FilterCacheTable, Self::Ring];

    #[must_use]
    pub const fn ordinal(self) -> usize {
        match self {
            Self::Context => 0,
            Self::FilterCacheTable => 1,
            Self::Ring => 2,
        }
    }

    #[must_use]
    pub const fn rank(self) -> u16 {
        match self {
            Self::Context => 10,
            Self::FilterCacheTable => 20,
            Self::Ring => 30,
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}@{}", self.rank())
    }
}

struct LockStats {
    acquire_count: AtomicU64,
    contended_count: AtomicU64,
    total_wait_ns: AtomicU64,
    total_hold_ns: AtomicU64,
}

impl LockStats {
    const fn new() -> Self {
        Self {
            acquire_count: AtomicU64::new(0),
            contended_count: AtomicU64::new(0),
            total_wait_ns: AtomicU64::new(0),
            total_hold_ns: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_acquire(&self, contended: bool, wait_ns: u64) {
        self.acquire_count.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.contended_count.fetch_add(1, Ordering::Relaxed);
            self.total_wait_ns.fetch_add(wait_ns, Ordering::Relaxed);
        }
    }

    #[inline]
    fn record_hold(&self, hold_ns: u64) {
        self.total_hold_ns.fetch_add(hold_ns, Ordering::Relaxed);
    }
}

/// Snapshot of contention counters for one [`LockLevel`].
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct LockContentionEntry {
    pub level_rank: u16,
    pub acquire_count: u64,
    pub contended_count: u64,
    pub total_wait_ns: u64,
    pub total_hold_ns: u64,
}

fn global_lock_stats() -> &'static [LockStats; LockLevel::COUNT] {
    static STATS: [LockStats; LockLevel::COUNT] =
        [LockStats::new(), LockStats::new(), LockStats::new()];
    &STATS
}

/// Snapshot contention counters across all lock levels, for `dctl` leaf
/// registration (e.g. `cache.lock_contention`).
#[must_use]
pub fn lock_contention_snapshot() -> Vec<LockContentionEntry> {
    LockLevel::ALL
        .iter()
        .map(|level| {
            let stats = &global_lock_stats()[level.ordinal()];
            LockContentionEntry {
                level_rank: level.rank(),
                acquire_count: stats.acquire_count.load(Ordering::Relaxed),
                contended_count: stats.contended_count.load(Ordering::Relaxed),
                total_wait_ns: stats.total_wait_ns.load(Ordering::Relaxed),
                total_hold_ns: stats.total_hold_ns.load(Ordering::Relaxed),
            }
        })
        .collect()
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD_RANKS: RefCell<Vec<u16>> = const { RefCell::new(Vec::new()) };
}

#[cfg(debug_assertions)]
fn check_before_acquire(level: LockLevel) {
    HELD_RANKS.with(|held| {
        let held = held.borrow();
        if let Some(&max_held) = held.iter().max() {
            assert!(
                level.rank() > max_held,
                "lock order violation: acquiring {level} while holding rank {max_held} (held: {held:?})"
            );
        }
    });
}

#[cfg(debug_assertions)]
fn did_acquire(level: LockLevel) {
    HELD_RANKS.with(|held| held.borrow_mut().push(level.rank()));
}

#[cfg(debug_assertions)]
fn did_release(level: LockLevel) {
    HELD_RANKS.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(pos) = held.iter().rposition(|&r| r == level.rank()) {
            held.remove(pos);
        }
    });
}

#[cfg(not(debug_assertions))]
fn check_before_acquire(_level: LockLevel) {}
#[cfg(not(debug_assertions))]
fn did_acquire(_level: LockLevel) {}
#[cfg(not(debug_assertions))]
fn did_release(_level: LockLevel) {}

/// Mutex wrapper that enforces the global lock hierarchy in debug builds.
pub struct OrderedMutex<T> {
    level: LockLevel,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    #[must_use]
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            inner: Mutex::new(value),
        }
    }

    #[must_use]
    pub const fn level(&self) -> LockLevel {
        self.level
    }

    pub fn lock(&self) -> OrderedMutexGuard<'_, T> {
        check_before_acquire(self.level);
        let stats = &global_lock_stats()[self.level.ordinal()];
        match self.inner.try_lock() {
            Ok(guard) => {
                stats.record_acquire(false, 0);
                did_acquire(self.level);
                OrderedMutexGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard,
                }
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                let start = Instant::now();
                let guard = self
                    .inner
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let wait_ns = start.elapsed().as_nanos_u64();
                stats.record_acquire(true, wait_ns);
                did_acquire(self.level);
                OrderedMutexGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard,
                }
            }
            Err(std::sync::TryLockError::Poisoned(e)) => {
                stats.record_acquire(false, 0);
                did_acquire(self.level);
                OrderedMutexGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard: e.into_inner(),
                }
            }
        }
    }
}

pub struct OrderedMutexGuard<'a, T> {
    level: LockLevel,
    acquired_at: Instant,
    guard: MutexGuard<'a, T>,
}

impl<T> Drop for OrderedMutexGuard<'_, T> {
    fn drop(&mut self) {
        let hold_ns = self.acquired_at.elapsed().as_nanos_u64();
        global_lock_stats()[self.level.ordinal()].record_hold(hold_ns);
        did_release(self.level);
    }
}

impl<T> Deref for OrderedMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}
impl<T> DerefMut for OrderedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// `RwLock` wrapper that enforces the global lock hierarchy in debug builds.
pub struct OrderedRwLock<T> {
    level: LockLevel,
    inner: RwLock<T>,
}

impl<T> OrderedRwLock<T> {
    #[must_use]
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            inner: RwLock::new(value),
        }
    }

    #[must_use]
    pub const fn level(&self) -> LockLevel {
        self.level
    }

    pub fn read(&self) -> OrderedRwLockReadGuard<'_, T> {
        check_before_acquire(self.level);
        let stats = &global_lock_stats()[self.level.ordinal()];
        match self.inner.try_read() {
            Ok(guard) => {
                stats.record_acquire(false, 0);
                did_acquire(self.level);
                OrderedRwLockReadGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard,
                }
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                let start = Instant::now();
                let guard = self
                    .inner
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let wait_ns = start.elapsed().as_nanos_u64();
                stats.record_acquire(true, wait_ns);
                did_acquire(self.level);
                OrderedRwLockReadGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard,
                }
            }
            Err(std::sync::TryLockError::Poisoned(e)) => {
                stats.record_acquire(false, 0);
                did_acquire(self.level);
                OrderedRwLockReadGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard: e.into_inner(),
                }
            }
        }
    }

    pub fn write(&self) -> OrderedRwLockWriteGuard<'_, T> {
        check_before_acquire(self.level);
        let stats = &global_lock_stats()[self.level.ordinal()];
        match self.inner.try_write() {
            Ok(guard) => {
                stats.record_acquire(false, 0);
                did_acquire(self.level);
                OrderedRwLockWriteGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard,
                }
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                let start = Instant::now();
                let guard = self
                    .inner
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let wait_ns = start.elapsed().as_nanos_u64();
                stats.record_acquire(true, wait_ns);
                did_acquire(self.level);
                OrderedRwLockWriteGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard,
                }
            }
            Err(std::sync::TryLockError::Poisoned(e)) => {
                stats.record_acquire(false, 0);
                did_acquire(self.level);
                OrderedRwLockWriteGuard {
                    level: self.level,
                    acquired_at: Instant::now(),
                    guard: e.into_inner(),
                }
            }
        }
    }
}

pub struct OrderedRwLockReadGuard<'a, T> {
    level: LockLevel,
    acquired_at: Instant,
    guard: RwLockReadGuard<'a, T>,
}

impl<T> Drop for OrderedRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        let hold_ns = self.acquired_at.elapsed().as_nanos_u64();
        global_lock_stats()[self.level.ordinal()].record_hold(hold_ns);
        did_release(self.level);
    }
}
impl<T> Deref for OrderedRwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct OrderedRwLockWriteGuard<'a, T> {
    level: LockLevel,
    acquired_at: Instant,
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Drop for OrderedRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        let hold_ns = self.acquired_at.elapsed().as_nanos_u64();
        global_lock_stats()[self.level.ordinal()].record_hold(hold_ns);
        did_release(self.level);
    }
}
impl<T> Deref for OrderedRwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}
impl<T> DerefMut for OrderedRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Lock-order and hold-time bookkeeping for a lock that can't route
/// through [`OrderedMutex`]/[`OrderedRwLock`] directly — e.g. a
/// `Condvar`-paired `std::sync::Mutex`, whose wait API needs the raw
/// `MutexGuard` rather than a wrapper around one. Call [`Self::enter`]
/// right after the underlying lock is actually held, and drop the scope
/// right before releasing it (or before handing the guard to
/// `Condvar::wait`, which releases it internally). Unlike `OrderedMutex`,
/// this never reports a contended acquire, since the caller does its own
/// locking before entering the scope.
pub struct LockScope(LockLevel, Instant);

impl LockScope {
    #[must_use]
    pub fn enter(level: LockLevel) -> Self {
        check_before_acquire(level);
        did_acquire(level);
        global_lock_stats()[level.ordinal()].record_acquire(false, 0);
        Self(level, Instant::now())
    }
}

impl Drop for LockScope {
    fn drop(&mut self) {
        let hold_ns = self.1.elapsed().as_nanos_u64();
        global_lock_stats()[self.0.ordinal()].record_hold(hold_ns);
        did_release(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_acquisition_succeeds() {
        let ctx = OrderedMutex::new(LockLevel::Context, 0);
        let table = OrderedRwLock::new(LockLevel::FilterCacheTable, 0);
        let _c = ctx.lock();
        let _t = table.read();
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic(expected = "lock order violation")]
    fn out_of_order_acquisition_panics_in_debug() {
        let ring = OrderedMutex::new(LockLevel::Ring, 0);
        let ctx = OrderedMutex::new(LockLevel::Context, 0);
        let _r = ring.lock();
        let _c = ctx.lock();
    }

    #[test]
    fn contention_snapshot_has_one_entry_per_level() {
        let snap = lock_contention_snapshot();
        assert_eq!(snap.len(), LockLevel::COUNT);
    }

    #[test]
    fn lock_scope_enforces_ordering_like_ordered_mutex() {
        let ctx = LockScope::enter(LockLevel::Context);
        let _table = LockScope::enter(LockLevel::FilterCacheTable);
        drop(_table);
        drop(ctx);
    }

    #[test]
    #[cfg_attr(not(debug_assertions), ignore)]
    #[should_panic(expected = "lock order violation")]
    fn lock_scope_out_of_order_panics_in_debug() {
        let _ring = LockScope::enter(LockLevel::Ring);
        let _ctx = LockScope::enter(LockLevel::Context);
    }
}
