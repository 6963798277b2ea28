//! Min-heap of deadlines for helper threads
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: free (lazy, the owner flips the entry state)
//! - Poll expired: O(k log n) where k = number of expired or dead entries
//! - Next deadline: O(1) amortized
//! - Prune: O(n)
//!
//! # Cancellation Strategy
//!
//! Callers pass a liveness test and dead entries are dropped whenever they
//! reach the top. Dead entries far from the top are only reclaimed by
//! `prune`, which the owner runs once enough cancellations have piled up.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

struct HeapEntry<T> {
    deadline: Instant,
    seq: u64,
    value: T,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

pub(crate) struct DeadlineHeap<T> {
    heap: BinaryHeap<HeapEntry<T>>,
    total_fired: u64,
    total_discarded: u64,
}

impl<T> DeadlineHeap<T> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            total_fired: 0,
            total_discarded: 0,
        }
    }

    /// Entries held, dead ones included
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn push(&mut self, deadline: Instant, seq: u64, value: T) {
        self.heap.push(HeapEntry { deadline, seq, value });
    }

    /// Earliest live deadline, dropping dead entries found on top
    pub(crate) fn next_deadline(&mut self, live: impl Fn(&T) -> bool) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if live(&top.value) {
                return Some(top.deadline);
            }
            self.heap.pop();
            self.total_discarded += 1;
        }
        None
    }

    /// Pop every live entry with `deadline <= now`, earliest first
    pub(crate) fn pop_expired(&mut self, now: Instant, live: impl Fn(&T) -> bool) -> Vec<T> {
        let mut expired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };
            if live(&entry.value) {
                self.total_fired += 1;
                expired.push(entry.value);
            } else {
                self.total_discarded += 1;
            }
        }
        expired
    }

    /// Drop every dead entry; returns how many went
    pub(crate) fn prune(&mut self, live: impl Fn(&T) -> bool) -> usize {
        let before = self.heap.len();
        self.heap.retain(|e| live(&e.value));
        let dropped = before - self.heap.len();
        self.total_discarded += dropped as u64;
        dropped
    }

    /// (fired, discarded) over the heap's lifetime
    pub(crate) fn totals(&self) -> (u64, u64) {
        (self.total_fired, self.total_discarded)
    }
}
