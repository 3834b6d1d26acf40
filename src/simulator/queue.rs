//! The movement queue: a min-heap keyed by occurs-at nanoseconds.
//!
//! At most one movement may occupy a given nanosecond, over the whole life of
//! the queue. The key set is never pruned on dequeue; re-using the nanosecond
//! of an already-executed movement would break the strictly-increasing order
//! of the completed trace.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::simulator::movement::{Movement, SimTime};

/// Enqueue rejection: another movement already occupies that nanosecond.
/// Carries the movement back so the caller can record it as ignored.
#[derive(Debug, thiserror::Error)]
#[error("another movement is already scheduled at {}", .movement.occurs_at())]
pub struct DuplicateTimestamp {
    pub movement: Movement,
}

/// Result of a dequeue attempt.
#[derive(Debug)]
pub enum Dequeued {
    /// The earliest pending movement.
    Next(Movement),
    /// Nothing pending; the caller decides whether that ends the stream.
    Empty,
    /// The queue has been closed; no further movements will be produced.
    Closed,
}

struct QueuedMovement(Movement);

impl PartialEq for QueuedMovement {
    fn eq(&self, other: &Self) -> bool {
        self.0.occurs_at() == other.0.occurs_at()
    }
}

impl Eq for QueuedMovement {}

impl PartialOrd for QueuedMovement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMovement {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest movement pops
        // first. Timestamps are unique, so no secondary key is needed.
        other.0.occurs_at().cmp(&self.0.occurs_at())
    }
}

/// Priority queue of pending movements, earliest first.
pub struct MovementQueue {
    heap: BinaryHeap<QueuedMovement>,
    occupied: HashSet<i64>,
    closed: bool,
}

impl MovementQueue {
    pub fn new() -> Self {
        MovementQueue {
            heap: BinaryHeap::new(),
            occupied: HashSet::new(),
            closed: false,
        }
    }

    /// Insert a movement, failing if its nanosecond is already taken.
    pub fn enqueue(&mut self, movement: Movement) -> Result<(), DuplicateTimestamp> {
        if !self.occupied.insert(movement.occurs_at().nanos()) {
            return Err(DuplicateTimestamp { movement });
        }
        self.heap.push(QueuedMovement(movement));
        Ok(())
    }

    /// Pop the earliest pending movement.
    pub fn dequeue(&mut self) -> Dequeued {
        if self.closed {
            return Dequeued::Closed;
        }
        match self.heap.pop() {
            Some(QueuedMovement(movement)) => Dequeued::Next(movement),
            None => Dequeued::Empty,
        }
    }

    /// Whether a movement occupies (or ever occupied) the given nanosecond.
    pub fn contains(&self, at: SimTime) -> bool {
        self.occupied.contains(&at.nanos())
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Iterate over pending movements in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Movement> {
        self.heap.iter().map(|q| &q.0)
    }
}

impl Default for MovementQueue {
    fn default() -> Self {
        Self::new()
    }
}
