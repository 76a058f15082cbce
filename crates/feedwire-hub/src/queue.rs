//! Priority dispatch queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use feedwire_core::{BroadcastMessage, Priority};

use crate::errors::{HubError, Result};

struct Queued {
    priority: Priority,
    seq: u64,
    message: BroadcastMessage,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl Ord for Queued {
    // Max-heap: higher priority first, then lower sequence (earlier arrival).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded heap of pending messages.
pub struct DispatchQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
    capacity: usize,
}

impl DispatchQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            capacity,
        }
    }

    /// Add a message. Fails when the queue is full.
    pub fn push(&mut self, message: BroadcastMessage) -> Result<()> {
        if self.heap.len() >= self.capacity {
            return Err(HubError::QueueFull {
                capacity: self.capacity,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued {
            priority: message.priority,
            seq,
            message,
        });
        Ok(())
    }

    /// Remove the highest-priority, earliest message.
    pub fn pop(&mut self) -> Option<BroadcastMessage> {
        self.heap.pop().map(|q| q.message)
    }

    /// Pending messages.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
