//! The FIFO overflow queue (C4).

use std::collections::VecDeque;

use crate::event::Event;

/// FIFO of events deferred while the worker pool is saturated.
///
/// Design-level contract is a linked-list FIFO with capacity `HOTPLUG2_MSG_BACKLOG`; a
/// `VecDeque` preserves the same insertion-order/O(1)-push/O(1)-pop properties.
pub struct BacklogQueue {
    queue: VecDeque<Event>,
    capacity: usize,
}

/// Default backlog capacity (`HOTPLUG2_MSG_BACKLOG` in the original daemon).
pub const DEFAULT_CAPACITY: usize = 1024;

impl BacklogQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Appends `event` at the tail. Panics if the queue is already at capacity; callers must
    /// check [`BacklogQueue::is_full`] first (the main loop sleeps instead of pushing once the
    /// backlog is full).
    pub fn push(&mut self, event: Event) {
        debug_assert!(!self.is_full());
        self.queue.push_back(event);
    }

    /// Removes and returns the head of the queue, if any.
    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }
}
