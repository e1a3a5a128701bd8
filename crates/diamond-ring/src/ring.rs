//! Bounded, non-blocking FIFO ring.
//!
//! `Ring<T>` is the building block `BlockingRing<T>` layers a `Condvar`
//! over. Kept separate because a handful of call sites (the bg-ops ring
//! feeding the background persistence thread) only ever need the
//! non-blocking `try_*` surface and a raw `Mutex<VecDeque<_>>` read lock
//! would be pure overhead for them.

use std::collections::VecDeque;

use diamond_core::{LockLevel, OrderedMutex};

/// A fixed-capacity FIFO. `try_push` fails (returning the rejected item)
/// once `len() == capacity`; `try_pop` fails when empty. Never blocks.
pub struct Ring<T> {
    capacity: usize,
    items: OrderedMutex<VecDeque<T>>,
}

impl<T> Ring<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            capacity,
            items: OrderedMutex::new(LockLevel::Ring, VecDeque::with_capacity(capacity)),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Push if there's room; returns `item` back if the ring is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    /// Pop the oldest item, if any.
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let ring: Ring<i32> = Ring::new(4);
        ring.try_push(1).unwrap();
        ring.try_push(2).unwrap();
        ring.try_push(3).unwrap();
        assert_eq!(ring.try_pop(), Some(1));
        assert_eq!(ring.try_pop(), Some(2));
        assert_eq!(ring.try_pop(), Some(3));
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn rejects_push_past_capacity() {
        let ring: Ring<i32> = Ring::new(2);
        ring.try_push(1).unwrap();
        ring.try_push(2).unwrap();
        assert_eq!(ring.try_push(3), Err(3));
        assert!(ring.is_full());
    }

    #[test]
    fn pop_after_drain_frees_capacity() {
        let ring: Ring<i32> = Ring::new(1);
        ring.try_push(1).unwrap();
        assert_eq!(ring.try_push(2), Err(2));
        assert_eq!(ring.try_pop(), Some(1));
        ring.try_push(2).unwrap();
        assert_eq!(ring.try_pop(), Some(2));
    }
}
