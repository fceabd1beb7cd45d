//! Fixed-capacity, insertion-ordered buffer that evicts its oldest entry on
//! overflow.
//!
//! # Invariants
//! - `len() <= capacity()` after every mutation.
//! - Iteration yields entries in arrival order, oldest first.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    /// A zero capacity is bumped to one so that the newest entry always fits.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends `item`, returning the entry evicted to make room, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Changes the capacity, dropping the oldest entries when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Removes every entry, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}

impl<T: Clone> BoundedBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}
