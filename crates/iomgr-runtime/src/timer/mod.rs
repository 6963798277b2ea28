//! Timer bookkeeping
//!
//! Two structures, one per side of the capability / helper split:
//!
//! ```text
//!   capability (owner)                      helper thread
//!   ┌──────────────────────┐                ┌──────────────────────┐
//!   │ TimerQueue           │  Register ──►  │ DeadlineHeap         │
//!   │  ordered map, exact  │                │  min-heap, lazy      │
//!   │  removal on cancel   │  ◄── post      │  drop of dead entries│
//!   └──────────────────────┘                └──────────────────────┘
//! ```
//!
//! The capability side answers "is anything pending" and owns GC roots, so
//! it removes eagerly. The helper never learns about cancellations directly;
//! it discards entries whose `WaitEntry` left `Pending` when it meets them.

pub(crate) mod heap;

use std::collections::BTreeMap;
use std::time::Instant;

/// Position of a timer: deadline first, registration order breaks ties
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    pub deadline: Instant,
    pub seq: u64,
}

/// Deadline-ordered timers owned by one capability
#[derive(Debug)]
pub struct TimerQueue<T> {
    timers: BTreeMap<TimerKey, T>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn insert(&mut self, deadline: Instant, seq: u64, value: T) -> TimerKey {
        let key = TimerKey { deadline, seq };
        self.timers.insert(key, value);
        key
    }

    pub fn remove(&mut self, key: &TimerKey) -> Option<T> {
        self.timers.remove(key)
    }

    pub fn get_mut(&mut self, key: &TimerKey) -> Option<&mut T> {
        self.timers.get_mut(key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|k| k.deadline)
    }

    /// Remove and return the earliest timer if its deadline is `<= now`
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerKey, T)> {
        match self.timers.first_key_value() {
            Some((key, _)) if key.deadline <= now => self.timers.pop_first(),
            _ => None,
        }
    }

    /// Earliest first
    pub fn iter(&self) -> impl Iterator<Item = (&TimerKey, &T)> {
        self.timers.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.timers.values_mut()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
