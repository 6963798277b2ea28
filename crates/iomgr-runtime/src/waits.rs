//! Per-capability wait bookkeeping shared by every backend
//!
//! Holds the threads blocked on this capability: readiness waits in a FIFO
//! (registration order), delays in deadline order, plus a per-thread index
//! so cancellation is O(1) / O(log n). A thread has at most one outstanding
//! wait here, so it is handed back at most once per registration.
//!
//! Every entry here is `Pending`; an entry leaves the table in the same step
//! that moves it out of `Pending`, and only the owning capability performs
//! that step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use iomgr_core::{
    Direction, Evacuate, HeapRef, IoMgrError, MgrResult, QueueKey, Resource, ThreadId, WaitEntry,
    WaitKind, WaitQueue,
};

use crate::timer::{TimerKey, TimerQueue};

/// Result of a cancel request
///
/// Both outcomes are benign: `NotWaiting` means the wait already resolved
/// (and the thread was, or will be, returned by the resolver) or never
/// existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotWaiting,
}

/// Counters for one capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityStats {
    pub io_registered: u64,
    pub timers_registered: u64,
    pub completed: u64,
    pub cancelled: u64,
    /// Postings for waits that had already been cancelled
    pub stale: u64,
    pub polls: u64,
}

/// A pending wait plus the heap objects it keeps alive
pub(crate) struct PendingWait {
    pub(crate) entry: Arc<WaitEntry>,
    pub(crate) roots: Vec<HeapRef>,
}

impl PendingWait {
    fn new(entry: Arc<WaitEntry>) -> Self {
        Self {
            entry,
            roots: Vec::new(),
        }
    }
}

/// Where a thread's outstanding wait lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Io(QueueKey),
    Timer(TimerKey),
}

pub(crate) struct WaitTable {
    pending_io: WaitQueue<PendingWait>,
    pending_timers: TimerQueue<PendingWait>,
    index: HashMap<ThreadId, Slot>,
    max_io: usize,
    max_timers: usize,
    pub(crate) stats: CapabilityStats,
}

impl WaitTable {
    pub(crate) fn new(max_io: usize, max_timers: usize) -> Self {
        Self {
            pending_io: WaitQueue::new(),
            pending_timers: TimerQueue::new(),
            index: HashMap::new(),
            max_io,
            max_timers,
            stats: CapabilityStats::default(),
        }
    }

    #[inline]
    pub(crate) fn io_len(&self) -> usize {
        self.pending_io.len()
    }

    #[inline]
    pub(crate) fn timer_len(&self) -> usize {
        self.pending_timers.len()
    }

    #[inline]
    pub(crate) fn has_pending(&self) -> bool {
        !self.pending_io.is_empty() || !self.pending_timers.is_empty()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending_timers.next_deadline()
    }

    /// `AlreadyWaiting` describing the thread's current wait, if any
    fn check_idle(&self, thread: ThreadId) -> MgrResult<()> {
        let direction = match self.index.get(&thread) {
            None => return Ok(()),
            Some(Slot::Io(key)) => match self.pending_io.get(*key).map(|w| w.entry.kind()) {
                Some(WaitKind::Io { direction, .. }) => Some(direction),
                _ => None,
            },
            Some(Slot::Timer(_)) => None,
        };
        Err(IoMgrError::AlreadyWaiting { thread, direction })
    }

    pub(crate) fn add_io(
        &mut self,
        thread: ThreadId,
        direction: Direction,
        fd: i32,
    ) -> MgrResult<Arc<WaitEntry>> {
        if fd < 0 {
            return Err(IoMgrError::InvalidFd(fd));
        }
        self.check_idle(thread)?;
        if self.pending_io.len() >= self.max_io {
            return Err(Resource::PendingIo.into());
        }
        let entry = Arc::new(WaitEntry::new(thread, WaitKind::Io { fd, direction }));
        let key = self.pending_io.push_back(PendingWait::new(Arc::clone(&entry)));
        self.index.insert(thread, Slot::Io(key));
        self.stats.io_registered += 1;
        Ok(entry)
    }

    pub(crate) fn add_timer(&mut self, thread: ThreadId, deadline: Instant) -> MgrResult<Arc<WaitEntry>> {
        self.check_idle(thread)?;
        if self.pending_timers.len() >= self.max_timers {
            return Err(Resource::PendingTimers.into());
        }
        let entry = Arc::new(WaitEntry::new(thread, WaitKind::Delay { deadline }));
        let key = self
            .pending_timers
            .insert(deadline, entry.seq(), PendingWait::new(Arc::clone(&entry)));
        self.index.insert(thread, Slot::Timer(key));
        self.stats.timers_registered += 1;
        Ok(entry)
    }

    /// Cancel `thread`'s readiness wait; returns the cancelled entry
    pub(crate) fn cancel_io(&mut self, thread: ThreadId) -> Option<Arc<WaitEntry>> {
        let Some(&Slot::Io(key)) = self.index.get(&thread) else {
            return None;
        };
        if !self.pending_io.get(key)?.entry.try_cancel() {
            return None;
        }
        self.index.remove(&thread);
        self.stats.cancelled += 1;
        self.pending_io.remove(key).map(|w| w.entry)
    }

    pub(crate) fn cancel_timer(&mut self, thread: ThreadId) -> Option<Arc<WaitEntry>> {
        let Some(&Slot::Timer(key)) = self.index.get(&thread) else {
            return None;
        };
        if !self.pending_timers.get_mut(&key)?.entry.try_cancel() {
            return None;
        }
        self.index.remove(&thread);
        self.stats.cancelled += 1;
        self.pending_timers.remove(&key).map(|w| w.entry)
    }

    /// Undo a registration the backend refused to accept
    pub(crate) fn withdraw(&mut self, entry: &WaitEntry) {
        let Some(slot) = self.slot_for(entry) else {
            return;
        };
        entry.try_cancel();
        self.index.remove(&entry.thread());
        match slot {
            Slot::Io(key) => {
                self.pending_io.remove(key);
                self.stats.io_registered -= 1;
            }
            Slot::Timer(key) => {
                self.pending_timers.remove(&key);
                self.stats.timers_registered -= 1;
            }
        }
    }

    /// Resolve a posted completion
    ///
    /// Returns false for stale postings: the wait was cancelled (and maybe
    /// replaced by a newer one for the same thread) before it was drained.
    pub(crate) fn complete(&mut self, entry: &WaitEntry) -> bool {
        let done = match self.slot_for(entry) {
            Some(slot) if entry.try_complete() => {
                self.index.remove(&entry.thread());
                match slot {
                    Slot::Io(key) => {
                        self.pending_io.remove(key);
                    }
                    Slot::Timer(key) => {
                        self.pending_timers.remove(&key);
                    }
                }
                true
            }
            _ => false,
        };
        if done {
            self.stats.completed += 1;
        } else {
            self.stats.stale += 1;
        }
        done
    }

    /// Indexed slot, only if it still refers to this very entry
    fn slot_for(&self, entry: &WaitEntry) -> Option<Slot> {
        let slot = *self.index.get(&entry.thread())?;
        let seq = match slot {
            Slot::Io(key) => self.pending_io.get(key)?.entry.seq(),
            Slot::Timer(key) => key.seq,
        };
        (seq == entry.seq()).then_some(slot)
    }

    /// Readiness waits in registration order
    pub(crate) fn io_waits(&self) -> impl Iterator<Item = (QueueKey, &Arc<WaitEntry>)> {
        self.pending_io.iter().map(|(k, w)| (k, &w.entry))
    }

    /// Complete the readiness wait at `key` (poll-style backends)
    pub(crate) fn complete_io_at(&mut self, key: QueueKey) -> Option<ThreadId> {
        let entry = Arc::clone(&self.pending_io.get(key)?.entry);
        self.complete(&entry).then(|| entry.thread())
    }

    /// Complete every delay with `deadline <= now`, earliest first
    pub(crate) fn expire_timers(&mut self, now: Instant, woken: &mut Vec<ThreadId>) {
        while let Some((_, w)) = self.pending_timers.pop_expired(now) {
            if w.entry.try_complete() {
                self.index.remove(&w.entry.thread());
                self.stats.completed += 1;
                woken.push(w.entry.thread());
            }
        }
    }

    /// Every pending entry: readiness in FIFO order, then delays by deadline
    pub(crate) fn pending_entries(&self) -> Vec<Arc<WaitEntry>> {
        self.pending_io
            .iter()
            .map(|(_, w)| Arc::clone(&w.entry))
            .chain(self.pending_timers.iter().map(|(_, w)| Arc::clone(&w.entry)))
            .collect()
    }

    /// Attach `root` to the thread's outstanding wait
    pub(crate) fn pin_root(&mut self, thread: ThreadId, root: HeapRef) -> MgrResult<()> {
        let wait = match self.index.get(&thread) {
            Some(Slot::Io(key)) => self.pending_io.get_mut(*key),
            Some(Slot::Timer(key)) => self.pending_timers.get_mut(key),
            None => None,
        };
        let w = wait.ok_or(IoMgrError::NotWaiting(thread))?;
        w.roots.push(root);
        Ok(())
    }

    /// Report (and let the collector relocate) every pinned root
    pub(crate) fn mark_roots(&mut self, evac: &mut dyn Evacuate) -> usize {
        let mut marked = 0;
        self.pending_io.for_each_mut(|w| {
            for root in w.roots.iter_mut() {
                evac.evacuate(root);
                marked += 1;
            }
        });
        for w in self.pending_timers.values_mut() {
            for root in w.roots.iter_mut() {
                evac.evacuate(root);
                marked += 1;
            }
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn table() -> WaitTable {
        WaitTable::new(16, 16)
    }

    #[test]
    fn test_add_and_cancel_io() {
        let mut t = table();
        let e = t.add_io(ThreadId::new(1), Direction::Read, 3).unwrap();
        assert!(t.has_pending());

        let cancelled = t.cancel_io(ThreadId::new(1)).unwrap();
        assert_eq!(cancelled.seq(), e.seq());
        assert!(!e.is_pending());
        assert!(!t.has_pending());
        assert!(t.cancel_io(ThreadId::new(1)).is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut t = table();
        let th = ThreadId::new(4);
        t.add_io(th, Direction::Write, 5).unwrap();
        assert_eq!(
            t.add_io(th, Direction::Write, 6).unwrap_err(),
            IoMgrError::AlreadyWaiting { thread: th, direction: Some(Direction::Write) }
        );
        assert_eq!(t.io_len(), 1);
    }

    #[test]
    fn test_one_outstanding_wait_per_thread() {
        let mut t = table();
        let th = ThreadId::new(4);
        let e = t.add_io(th, Direction::Write, 5).unwrap();

        // Neither the other direction nor a delay may join the pending wait
        assert_eq!(
            t.add_io(th, Direction::Read, 5).unwrap_err(),
            IoMgrError::AlreadyWaiting { thread: th, direction: Some(Direction::Write) }
        );
        assert_eq!(
            t.add_timer(th, Instant::now()).unwrap_err(),
            IoMgrError::AlreadyWaiting { thread: th, direction: Some(Direction::Write) }
        );
        assert_eq!((t.io_len(), t.timer_len()), (1, 0));

        // Once resolved the thread may wait again, on anything
        assert!(t.complete(&e));
        let d = t.add_timer(th, Instant::now()).unwrap();
        assert_eq!(
            t.add_io(th, Direction::Read, 5).unwrap_err(),
            IoMgrError::AlreadyWaiting { thread: th, direction: None }
        );
        assert!(t.cancel_io(th).is_none());
        assert_eq!(t.cancel_timer(th).map(|c| c.seq()), Some(d.seq()));
        t.add_io(th, Direction::Read, 5).unwrap();
    }

    #[test]
    fn test_thread_resolves_once_with_ready_fd_and_expired_delay() {
        let mut t = table();
        let th = ThreadId::new(1);
        let now = Instant::now();
        let e = t.add_io(th, Direction::Write, 5).unwrap();
        assert!(t.add_timer(th, now).is_err());

        let key = t.io_waits().map(|(k, _)| k).next().unwrap();
        let mut woken: Vec<ThreadId> = t.complete_io_at(key).into_iter().collect();
        t.expire_timers(now, &mut woken);
        assert_eq!(woken, vec![th]);
        assert!(!t.complete(&e));
    }

    #[test]
    fn test_negative_fd_rejected() {
        let mut t = table();
        assert_eq!(
            t.add_io(ThreadId::new(1), Direction::Read, -1).unwrap_err(),
            IoMgrError::InvalidFd(-1)
        );
        assert!(!t.has_pending());
    }

    #[test]
    fn test_limits() {
        let mut t = WaitTable::new(1, 1);
        t.add_io(ThreadId::new(1), Direction::Read, 0).unwrap();
        assert_eq!(
            t.add_io(ThreadId::new(2), Direction::Read, 0).unwrap_err(),
            IoMgrError::ResourceExhausted(Resource::PendingIo)
        );
        t.add_timer(ThreadId::new(3), Instant::now()).unwrap();
        assert_eq!(
            t.add_timer(ThreadId::new(4), Instant::now()).unwrap_err(),
            IoMgrError::ResourceExhausted(Resource::PendingTimers)
        );
    }

    #[test]
    fn test_complete_then_cancel() {
        let mut t = table();
        let th = ThreadId::new(2);
        let e = t.add_timer(th, Instant::now()).unwrap();
        assert!(t.complete(&e));
        assert!(t.cancel_timer(th).is_none());
        // Second posting of the same entry is stale
        assert!(!t.complete(&e));
        assert_eq!(t.stats.completed, 1);
        assert_eq!(t.stats.stale, 1);
    }

    #[test]
    fn test_cancel_then_complete_is_stale() {
        let mut t = table();
        let th = ThreadId::new(2);
        let e = t.add_io(th, Direction::Read, 0).unwrap();
        assert!(t.cancel_io(th).is_some());
        assert!(!t.complete(&e));
    }

    #[test]
    fn test_stale_posting_does_not_complete_newer_wait() {
        let mut t = table();
        let th = ThreadId::new(8);
        let old = t.add_io(th, Direction::Read, 0).unwrap();
        t.cancel_io(th);
        let new = t.add_io(th, Direction::Read, 0).unwrap();

        assert!(!t.complete(&old));
        assert!(new.is_pending());
        assert_eq!(t.io_len(), 1);
    }

    #[test]
    fn test_expire_timers_order() {
        let mut t = table();
        let now = Instant::now();
        t.add_timer(ThreadId::new(1), now + Duration::from_millis(20)).unwrap();
        t.add_timer(ThreadId::new(2), now + Duration::from_millis(10)).unwrap();
        t.add_timer(ThreadId::new(3), now + Duration::from_millis(10)).unwrap();
        t.add_timer(ThreadId::new(4), now + Duration::from_secs(10)).unwrap();

        let mut woken = Vec::new();
        t.expire_timers(now + Duration::from_millis(20), &mut woken);
        assert_eq!(woken, vec![ThreadId::new(2), ThreadId::new(3), ThreadId::new(1)]);
        assert_eq!(t.timer_len(), 1);
        assert_eq!(t.next_deadline(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_withdraw_restores_table() {
        let mut t = table();
        let e = t.add_io(ThreadId::new(1), Direction::Read, 0).unwrap();
        t.withdraw(&e);
        assert!(!t.has_pending());
        assert_eq!(t.stats.io_registered, 0);
        t.add_io(ThreadId::new(1), Direction::Read, 0).unwrap();
    }

    #[test]
    fn test_pinned_roots_follow_wait() {
        let mut t = table();
        let th = ThreadId::new(1);
        assert_eq!(t.pin_root(th, HeapRef::new(0x10)), Err(IoMgrError::NotWaiting(th)));

        let e = t.add_io(th, Direction::Read, 0).unwrap();
        t.pin_root(th, HeapRef::new(0x10)).unwrap();
        t.pin_root(th, HeapRef::new(0x20)).unwrap();

        let mut seen = Vec::new();
        let marked = t.mark_roots(&mut |r: &mut HeapRef| {
            seen.push(r.addr());
            *r = HeapRef::new(r.addr() + 1);
        });
        assert_eq!(marked, 2);
        assert_eq!(seen, vec![0x10, 0x20]);
        assert!(t.cancel_timer(th).is_none());

        // Relocated addresses are what the next cycle sees
        seen.clear();
        t.mark_roots(&mut |r: &mut HeapRef| seen.push(r.addr()));
        assert_eq!(seen, vec![0x11, 0x21]);

        assert!(t.complete(&e));
        assert_eq!(t.mark_roots(&mut |_: &mut HeapRef| {}), 0);
    }
}
