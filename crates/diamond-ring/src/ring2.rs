//! Double-slot ring: entries carrying a primary pointer plus a small
//! auxiliary word (e.g. an object handle and an opcode).

use std::collections::VecDeque;

use diamond_core::{LockLevel, OrderedMutex};

pub struct Ring2<A, B> {
    capacity: usize,
    items: OrderedMutex<VecDeque<(A, B)>>,
}

impl<A, B> Ring2<A, B> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");
        Self {
            capacity,
            items: OrderedMutex::new(LockLevel::Ring, VecDeque::with_capacity(capacity)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_enq2(&self, a: A, b: B) -> Result<(), (A, B)> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err((a, b));
        }
        items.push_back((a, b));
        Ok(())
    }

    pub fn try_deq2(&self) -> Option<(A, B)> {
        self.items.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_stay_together_in_fifo_order() {
        let ring: Ring2<u64, u8> = Ring2::new(2);
        ring.try_enq2(1, 0xAA).unwrap();
        ring.try_enq2(2, 0xBB).unwrap();
        assert_eq!(ring.try_enq2(3, 0xCC), Err((3, 0xCC)));
        assert_eq!(ring.try_deq2(), Some((1, 0xAA)));
        assert_eq!(ring.try_deq2(), Some((2, 0xBB)));
        assert_eq!(ring.try_deq2(), None);
    }
}
