//! Ready queue ordered by priority, then submission order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::util::serde::{Priority, TaskId};

/// Heap entry: higher priority first, lower sequence number first within a
/// priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    seq: u64,
    id: TaskId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            // FIFO within a priority (reversed for the max-heap)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of task ids awaiting admission.
///
/// Removal is lazy: [`remove`](Self::remove) forgets the id and the stale
/// heap entry is skipped on the next [`pop`](Self::pop). An entry is live
/// only if it matches the id's current key, so re-pushing a removed id
/// never lets an old entry jump the queue.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<ReadyEntry>,
    live: HashMap<TaskId, (Priority, u64)>,
}

impl ReadyQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `id`. Returns `false` if it is already queued.
    pub fn push(&mut self, id: TaskId, priority: Priority, seq: u64) -> bool {
        if self.live.contains_key(&id) {
            return false;
        }
        self.live.insert(id, (priority, seq));
        self.heap.push(ReadyEntry { priority, seq, id });
        true
    }

    /// Pop the highest-priority, earliest-submitted id.
    pub fn pop(&mut self) -> Option<TaskId> {
        while let Some(entry) = self.heap.pop() {
            if self.is_live(&entry) {
                self.live.remove(&entry.id);
                return Some(entry.id);
            }
        }
        None
    }

    /// Id that [`pop`](Self::pop) would return next.
    pub fn peek(&mut self) -> Option<TaskId> {
        while let Some(entry) = self.heap.peek() {
            if self.is_live(entry) {
                return Some(entry.id);
            }
            self.heap.pop();
        }
        None
    }

    fn is_live(&self, entry: &ReadyEntry) -> bool {
        self.live.get(&entry.id) == Some(&(entry.priority, entry.seq))
    }

    /// Drop `id` from the queue. Returns `false` if it was not queued.
    pub fn remove(&mut self, id: TaskId) -> bool {
        let removed = self.live.remove(&id).is_some();
        if self.live.is_empty() {
            self.heap.clear();
        }
        removed
    }

    /// Number of queued ids.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
