//! A fixed-capacity queue that evicts its oldest element once full.

use std::collections::vec_deque::{self, VecDeque};

#[derive(Debug, Clone)]
pub(crate) struct RingBuffer<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buffer: VecDeque::with_capacity(capacity), capacity }
    }

    /// Appends at the back; returns the front element if it had to be evicted.
    pub fn push_back(&mut self, value: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(value);
        }
        let evicted = if self.buffer.len() == self.capacity { self.buffer.pop_front() } else { None };
        self.buffer.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.buffer.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_back_evicts_front() {
        let mut ring = RingBuffer::with_capacity(3);
        assert_eq!(ring.push_back(1), None);
        assert_eq!(ring.push_back(2), None);
        assert_eq!(ring.push_back(3), None);
        assert_eq!(ring.push_back(4), Some(1));
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), [2, 3, 4]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut ring = RingBuffer::with_capacity(0);
        assert_eq!(ring.push_back("a"), Some("a"));
        assert!(ring.is_empty());
    }
}
