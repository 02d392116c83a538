//! Bounded FIFO of events awaiting presentation.

use std::collections::VecDeque;

use crate::event::{CanonicalEvent, EventId};

pub const MIN_QUEUE_CAPACITY: usize = 5;
pub const MAX_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct DisplayQueue {
    events: VecDeque<CanonicalEvent>,
    capacity: usize,
}

impl DisplayQueue {
    /// Capacity is clamped to 5..=10.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    /// Compared as a bounded [`EventId`], the same way the registry does.
    pub fn contains(&self, id: &str) -> bool {
        let key = EventId::new(id);
        self.events.iter().any(|e| e.id == key)
    }

    /// Append, evicting and returning the oldest entry when full.
    pub fn push(&mut self, event: CanonicalEvent) -> Option<CanonicalEvent> {
        let evicted = if self.is_full() {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    pub fn pop(&mut self) -> Option<CanonicalEvent> {
        self.events.pop_front()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanonicalEvent> {
        self.events.iter()
    }
}
