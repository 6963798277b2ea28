//! Capability side of the completion backends (`mio`, `uring`)
//!
//! ```text
//!   capability N                    helper thread
//!   ┌──────────────┐  Register/Cancel ┌──────────────────┐
//!   │ WaitTable    │ ───ArrayQueue──► │ interest list /  │
//!   │              │   + eventfd      │ io_uring         │
//!   │ CompletionPort ◄──SegQueue───── │ timer heap       │
//!   │  + eventfd   │      post        └──────────────────┘
//!   └──────────────┘
//! ```
//!
//! The helper never changes a wait's state. It only posts the entry back to
//! the owning capability's port; the capability's drain performs
//! Pending -> Completed and drops postings for waits it already cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_queue::{ArrayQueue, SegQueue};
use iomgr_core::{
    kdebug, kerror, ktrace, CapabilityId, ConfigError, IoMgrError, MgrResult, Resource, ThreadId,
    WaitEntry,
};

use crate::backend::BackendKind;
use crate::config::IoManagerConfig;
use crate::control::ControlFd;
use crate::waits::WaitTable;

/// Capability -> helper message
pub(crate) enum Request {
    Register {
        entry: Arc<WaitEntry>,
        port: Arc<CompletionPort>,
    },
    /// Hint only: the entry is already `Cancelled` when this is sent
    Cancel { entry: Arc<WaitEntry> },
}

/// State shared between all capabilities and one helper thread
pub(crate) struct HelperShared {
    /// MPSC: capabilities push, helper pops
    requests: ArrayQueue<Request>,
    /// Wakes the helper out of its poll
    pub(crate) control: ControlFd,
    shutdown: AtomicBool,
}

impl HelperShared {
    pub(crate) fn new(capacity: usize) -> MgrResult<Arc<Self>> {
        Ok(Arc::new(Self {
            requests: ArrayQueue::new(capacity),
            control: ControlFd::new()?,
            shutdown: AtomicBool::new(false),
        }))
    }

    pub(crate) fn submit(&self, req: Request) -> MgrResult<()> {
        if self.requests.push(req).is_err() {
            return Err(Resource::RequestQueue.into());
        }
        self.control.notify()
    }

    #[inline]
    pub(crate) fn pop(&self) -> Option<Request> {
        self.requests.pop()
    }

    #[inline]
    pub(crate) fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.control.notify();
    }

    #[inline]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Per-capability mailbox the helper posts resolved waits to
pub struct CompletionPort {
    cap: CapabilityId,
    completed: SegQueue<Arc<WaitEntry>>,
    control: ControlFd,
}

impl CompletionPort {
    pub(crate) fn new(cap: CapabilityId) -> MgrResult<Arc<Self>> {
        Ok(Arc::new(Self {
            cap,
            completed: SegQueue::new(),
            control: ControlFd::new()?,
        }))
    }

    #[inline]
    pub fn capability(&self) -> CapabilityId {
        self.cap
    }

    /// Hand a resolved wait to the owner and wake it if parked
    pub(crate) fn post(&self, entry: Arc<WaitEntry>) {
        ktrace!("post {} (seq {}) to {}", entry.thread(), entry.seq(), self.cap);
        self.completed.push(entry);
        self.wake();
    }

    /// Interrupt a blocking poll on this capability
    pub fn wake(&self) {
        if let Err(e) = self.control.notify() {
            kerror!("wake {}: {}", self.cap, e);
        }
    }

    fn take_all(&self) -> Vec<Arc<WaitEntry>> {
        std::iter::from_fn(|| self.completed.pop()).collect()
    }
}

/// Per-capability state for completion backends
pub struct CompletionState {
    port: Arc<CompletionPort>,
    helper: Arc<HelperShared>,
}

impl CompletionState {
    pub(crate) fn new(port: Arc<CompletionPort>, helper: Arc<HelperShared>) -> Self {
        Self { port, helper }
    }

    #[inline]
    pub(crate) fn port(&self) -> &Arc<CompletionPort> {
        &self.port
    }

    pub(crate) fn register(&self, entry: &Arc<WaitEntry>) -> MgrResult<()> {
        self.helper.submit(Request::Register {
            entry: Arc::clone(entry),
            port: Arc::clone(&self.port),
        })
    }

    /// Tell the helper a wait was cancelled so it can reclaim what it holds
    pub(crate) fn cancelled(&self, entry: Arc<WaitEntry>) {
        // Best effort: a full queue only delays reclamation until the
        // kernel request finishes on its own
        if let Err(e) = self.helper.submit(Request::Cancel { entry }) {
            kdebug!("cancel hint dropped: {}", e);
        }
    }

    /// One resolver pass
    ///
    /// Blocking polls park on the port's descriptor until a posting or an
    /// external wakeup arrives; a wakeup with nothing posted yields an
    /// empty result.
    pub(crate) fn poll_once(&mut self, table: &mut WaitTable, blocking: bool) -> MgrResult<Vec<ThreadId>> {
        // Reset first: anything posted after this re-arms the descriptor
        self.port.control.drain();
        let woken = self.drain(table);
        if !woken.is_empty() || !blocking || !table.has_pending() {
            return Ok(woken);
        }
        self.port.control.wait(None)?;
        Ok(self.drain(table))
    }

    /// Resolve posted entries: readiness by registration order, then
    /// delays by deadline
    fn drain(&self, table: &mut WaitTable) -> Vec<ThreadId> {
        let mut done: Vec<Arc<WaitEntry>> = Vec::new();
        while let Some(entry) = self.port.completed.pop() {
            if table.complete(&entry) {
                done.push(entry);
            }
        }
        done.sort_by_key(|e| (e.kind().deadline(), e.seq()));
        done.iter().map(|e| e.thread()).collect()
    }

    /// Rebind to a fresh helper and port, carrying over undrained postings
    pub(crate) fn rebind(&mut self, helper: Arc<HelperShared>, port: Arc<CompletionPort>) {
        for entry in self.port.take_all() {
            port.completed.push(entry);
        }
        self.helper = helper;
        self.port = port;
    }
}

/// A running helper thread plus the state it shares with capabilities
pub(crate) struct HelperThread {
    shared: Arc<HelperShared>,
    handle: Option<JoinHandle<()>>,
}

impl HelperThread {
    pub(crate) fn spawn(
        kind: BackendKind,
        shared: Arc<HelperShared>,
        config: &IoManagerConfig,
    ) -> MgrResult<Self> {
        let handle = match kind {
            BackendKind::AsyncCompletionPosix => {
                super::poller::spawn(Arc::clone(&shared), config.helper_batch)?
            }
            #[cfg(all(target_os = "linux", feature = "io-uring"))]
            BackendKind::AsyncCompletionNative => super::uring::spawn(
                Arc::clone(&shared),
                config.helper_batch,
                config.uring_entries,
            )?,
            other => {
                return Err(IoMgrError::Config(ConfigError::Unavailable(
                    other.name().to_string(),
                )))
            }
        };
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub(crate) fn request_shutdown(&self) {
        self.shared.request_shutdown();
    }

    /// Wait for the helper to exit; only meaningful after `request_shutdown`
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                kerror!("I/O helper thread panicked");
            }
        }
    }

    /// Let the helper finish on its own
    pub(crate) fn detach(&mut self) {
        self.handle.take();
    }

    /// Drop our handle without touching the thread, which may not exist
    /// (fork child)
    pub(crate) fn abandon(mut self) {
        if let Some(handle) = self.handle.take() {
            std::mem::forget(handle);
        }
        self.shared.request_shutdown();
    }
}

impl Drop for HelperThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_shutdown();
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iomgr_core::{Direction, WaitState};
    use std::time::{Duration, Instant};

    fn state(capacity: usize) -> (CompletionState, Arc<HelperShared>) {
        let helper = HelperShared::new(capacity).unwrap();
        let port = CompletionPort::new(CapabilityId::new(0)).unwrap();
        (CompletionState::new(port, Arc::clone(&helper)), helper)
    }

    #[test]
    fn test_register_enqueues_request() {
        let (st, helper) = state(4);
        let mut table = WaitTable::new(8, 8);
        let e = table.add_io(ThreadId::new(1), Direction::Read, 0).unwrap();
        st.register(&e).unwrap();

        match helper.pop() {
            Some(Request::Register { entry, port }) => {
                assert_eq!(entry.seq(), e.seq());
                assert_eq!(port.capability(), CapabilityId::new(0));
            }
            _ => panic!("expected a register request"),
        }
        assert!(helper.pop().is_none());
    }

    #[test]
    fn test_full_request_queue_is_resource_exhaustion() {
        let (st, _helper) = state(1);
        let mut table = WaitTable::new(8, 8);
        let a = table.add_io(ThreadId::new(1), Direction::Read, 0).unwrap();
        let b = table.add_io(ThreadId::new(2), Direction::Read, 0).unwrap();
        st.register(&a).unwrap();
        assert_eq!(
            st.register(&b).unwrap_err(),
            IoMgrError::ResourceExhausted(Resource::RequestQueue)
        );
    }

    #[test]
    fn test_drain_orders_io_then_timers() {
        let (mut st, _helper) = state(8);
        let mut table = WaitTable::new(8, 8);
        let now = Instant::now();
        let late = table.add_timer(ThreadId::new(1), now + Duration::from_millis(5)).unwrap();
        let early = table.add_timer(ThreadId::new(2), now).unwrap();
        let io_b = table.add_io(ThreadId::new(3), Direction::Read, 0).unwrap();
        let io_a = table.add_io(ThreadId::new(4), Direction::Write, 0).unwrap();

        // Posted out of order
        for e in [&late, &io_a, &early, &io_b] {
            st.port().post(Arc::clone(e));
        }
        let woken = st.poll_once(&mut table, false).unwrap();
        assert_eq!(
            woken,
            vec![ThreadId::new(3), ThreadId::new(4), ThreadId::new(2), ThreadId::new(1)]
        );
        assert!(!table.has_pending());
    }

    #[test]
    fn test_cancel_before_drain_ignores_posting() {
        let (mut st, helper) = state(8);
        let mut table = WaitTable::new(8, 8);
        let th = ThreadId::new(6);
        let e = table.add_io(th, Direction::Read, 0).unwrap();

        st.port().post(Arc::clone(&e));
        let cancelled = table.cancel_io(th).unwrap();
        st.cancelled(cancelled);
        assert!(matches!(helper.pop(), Some(Request::Cancel { .. })));

        assert!(st.poll_once(&mut table, false).unwrap().is_empty());
        assert_eq!(e.state(), WaitState::Cancelled);
        assert_eq!(table.stats.stale, 1);
    }

    #[test]
    fn test_blocking_poll_returns_on_post_from_other_thread() {
        let (mut st, _helper) = state(8);
        let mut table = WaitTable::new(8, 8);
        let e = table.add_io(ThreadId::new(1), Direction::Read, 0).unwrap();
        let port = Arc::clone(st.port());

        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            port.post(e);
        });
        let woken = st.poll_once(&mut table, true).unwrap();
        assert_eq!(woken, vec![ThreadId::new(1)]);
        h.join().unwrap();
    }

    #[test]
    fn test_blocking_poll_returns_empty_on_wake() {
        let (mut st, _helper) = state(8);
        let mut table = WaitTable::new(8, 8);
        table.add_io(ThreadId::new(1), Direction::Read, 0).unwrap();
        let port = Arc::clone(st.port());

        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            port.wake();
        });
        assert!(st.poll_once(&mut table, true).unwrap().is_empty());
        assert!(table.has_pending());
        h.join().unwrap();
    }

    #[test]
    fn test_rebind_carries_postings() {
        let (mut st, _helper) = state(8);
        let mut table = WaitTable::new(8, 8);
        let e = table.add_timer(ThreadId::new(2), Instant::now()).unwrap();
        st.port().post(e);

        let helper = HelperShared::new(8).unwrap();
        let port = CompletionPort::new(CapabilityId::new(0)).unwrap();
        st.rebind(helper, Arc::clone(&port));
        assert!(Arc::ptr_eq(st.port(), &port));
        assert_eq!(st.poll_once(&mut table, false).unwrap(), vec![ThreadId::new(2)]);
    }
}
