//! Per-capability I/O state, the wait facade and the resolver
//!
//! A `CapabilityIo` belongs to exactly one capability and is only used from
//! the OS thread currently running it (`&mut self` everywhere). Other
//! threads reach it only through the completion port's lock-free queue and
//! a `CapabilityWaker`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut cap = mgr.init_capability()?;
//! cap.wait_for_readiness(tid, Direction::Read, fd)?;
//! // ... scheduler runs other threads ...
//! for t in cap.poll_once(true)? {
//!     run_queue.push(t);
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use iomgr_core::{
    kdebug, kprint, ktrace, CapabilityId, Direction, Evacuate, HeapRef, IoMgrError, MgrResult,
    Resource, RunQueue, ThreadId, WaitEntry,
};

use crate::backend::completion::{CompletionPort, CompletionState, HelperShared};
use crate::backend::select::SelectState;
use crate::backend::BackendKind;
use crate::manager::ManagerShared;
use crate::waits::{CancelOutcome, CapabilityStats, WaitTable};

/// Retries per entry when re-registering into a full request queue
const REBIND_ATTEMPTS: u32 = 1000;

/// Backend-specific part of a capability's I/O state
pub(crate) enum CapabilityIoState {
    ReadinessPoll(SelectState),
    AsyncCompletionPosix(CompletionState),
    AsyncCompletionNative(CompletionState),
}

impl CapabilityIoState {
    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            CapabilityIoState::ReadinessPoll(_) => BackendKind::ReadinessPoll,
            CapabilityIoState::AsyncCompletionPosix(_) => BackendKind::AsyncCompletionPosix,
            CapabilityIoState::AsyncCompletionNative(_) => BackendKind::AsyncCompletionNative,
        }
    }

    fn completion(&self) -> Option<&CompletionState> {
        match self {
            CapabilityIoState::ReadinessPoll(_) => None,
            CapabilityIoState::AsyncCompletionPosix(c) | CapabilityIoState::AsyncCompletionNative(c) => {
                Some(c)
            }
        }
    }

    fn completion_mut(&mut self) -> Option<&mut CompletionState> {
        match self {
            CapabilityIoState::ReadinessPoll(_) => None,
            CapabilityIoState::AsyncCompletionPosix(c) | CapabilityIoState::AsyncCompletionNative(c) => {
                Some(c)
            }
        }
    }
}

/// Handle for interrupting a capability's blocking poll from any thread
#[derive(Clone)]
pub struct CapabilityWaker {
    port: Option<Arc<CompletionPort>>,
}

impl CapabilityWaker {
    /// No-op for `select`, which has no cross-thread wakeup
    pub fn wake(&self) {
        if let Some(port) = &self.port {
            port.wake();
        }
    }
}

/// One capability's I/O manager state
pub struct CapabilityIo {
    id: CapabilityId,
    table: WaitTable,
    state: CapabilityIoState,
    shared: Arc<ManagerShared>,
}

impl CapabilityIo {
    pub(crate) fn new(id: CapabilityId, state: CapabilityIoState, shared: Arc<ManagerShared>) -> Self {
        let config = shared.config();
        Self {
            id,
            table: WaitTable::new(config.max_pending_io, config.max_pending_timers),
            state,
            shared,
        }
    }

    #[inline]
    pub fn id(&self) -> CapabilityId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> BackendKind {
        self.state.kind()
    }

    // ── Wait facade ──

    /// Block `thread` until `fd` is ready for `direction`
    ///
    /// The scheduler must not run `thread` again until the resolver returns
    /// it or the wait is cancelled.
    pub fn wait_for_readiness(&mut self, thread: ThreadId, direction: Direction, fd: i32) -> MgrResult<()> {
        self.shared.check_accepting()?;
        let entry = self.table.add_io(thread, direction, fd)?;
        self.submit(&entry)?;
        ktrace!("{} waits for {} on fd {}", thread, direction, fd);
        Ok(())
    }

    /// Withdraw `thread`'s readiness wait
    ///
    /// `NotWaiting` when nothing was pending, including when the wait
    /// already completed and the thread was (or will be) handed back by the
    /// resolver.
    pub fn cancel_readiness_wait(&mut self, thread: ThreadId) -> CancelOutcome {
        let Some(entry) = self.table.cancel_io(thread) else {
            return CancelOutcome::NotWaiting;
        };
        if let Some(c) = self.state.completion() {
            c.cancelled(entry);
        }
        ktrace!("{} readiness wait cancelled", thread);
        CancelOutcome::Cancelled
    }

    /// Block `thread` for at least `micros` microseconds
    pub fn wait_for_delay(&mut self, thread: ThreadId, micros: u64) -> MgrResult<()> {
        let now = self.shared.clock().now();
        let deadline = now
            .checked_add(Duration::from_micros(micros))
            .ok_or(IoMgrError::DelayOverflow(micros))?;
        self.wait_until(thread, deadline)
    }

    /// Block `thread` until the monotonic clock reaches `deadline`
    pub fn wait_until(&mut self, thread: ThreadId, deadline: Instant) -> MgrResult<()> {
        self.shared.check_accepting()?;
        let entry = self.table.add_timer(thread, deadline)?;
        self.submit(&entry)?;
        ktrace!("{} sleeps until {:?}", thread, deadline);
        Ok(())
    }

    pub fn cancel_delay(&mut self, thread: ThreadId) -> CancelOutcome {
        let Some(entry) = self.table.cancel_timer(thread) else {
            return CancelOutcome::NotWaiting;
        };
        if let Some(c) = self.state.completion() {
            c.cancelled(entry);
        }
        ktrace!("{} delay cancelled", thread);
        CancelOutcome::Cancelled
    }

    /// Keep `root` alive (and let the collector move it) until `thread`'s
    /// current wait resolves
    pub fn pin_root(&mut self, thread: ThreadId, root: HeapRef) -> MgrResult<()> {
        self.table.pin_root(thread, root)
    }

    fn submit(&mut self, entry: &Arc<WaitEntry>) -> MgrResult<()> {
        let Some(c) = self.state.completion() else {
            return Ok(());
        };
        if let Err(e) = c.register(entry) {
            self.table.withdraw(entry);
            return Err(e);
        }
        Ok(())
    }

    // ── Resolver ──

    /// Collect threads whose waits resolved
    ///
    /// Non-blocking calls return promptly. Blocking calls sleep until at
    /// least one wait resolves, an external wakeup arrives, or (with nothing
    /// pending at all) return empty at once.
    pub fn poll_once(&mut self, blocking: bool) -> MgrResult<Vec<ThreadId>> {
        kprint::set_capability(self.id.as_u32());
        self.table.stats.polls += 1;
        let woken = match &mut self.state {
            CapabilityIoState::ReadinessPoll(s) => s.poll_once(&mut self.table, blocking)?,
            CapabilityIoState::AsyncCompletionPosix(c)
            | CapabilityIoState::AsyncCompletionNative(c) => c.poll_once(&mut self.table, blocking)?,
        };
        if !woken.is_empty() {
            kdebug!("{} threads runnable", woken.len());
        }
        Ok(woken)
    }

    /// `poll_once`, handing each woken thread to the scheduler
    pub fn resolve_into(&mut self, blocking: bool, run_queue: &mut dyn RunQueue) -> MgrResult<usize> {
        let woken = self.poll_once(blocking)?;
        let n = woken.len();
        for thread in woken {
            run_queue.make_runnable(thread);
        }
        Ok(n)
    }

    /// Any thread blocked on I/O or a delay here
    #[inline]
    pub fn has_pending_work(&self) -> bool {
        self.table.has_pending()
    }

    #[inline]
    pub fn pending_io(&self) -> usize {
        self.table.io_len()
    }

    #[inline]
    pub fn pending_timers(&self) -> usize {
        self.table.timer_len()
    }

    // ── GC ──

    /// Report every heap object this capability keeps alive
    ///
    /// Called while the capability is paused. Blocked threads themselves are
    /// never reported; the scheduler owns them.
    pub fn mark_roots(&mut self, evac: &mut dyn Evacuate) -> usize {
        self.table.mark_roots(evac)
    }

    // ── Misc ──

    pub fn waker(&self) -> CapabilityWaker {
        CapabilityWaker {
            port: self.state.completion().map(|c| Arc::clone(c.port())),
        }
    }

    pub fn stats(&self) -> CapabilityStats {
        self.table.stats
    }

    /// Switch to a new helper and port, re-registering every pending wait
    pub(crate) fn rebind(&mut self, helper: Arc<HelperShared>, port: Arc<CompletionPort>) -> MgrResult<()> {
        let Some(c) = self.state.completion_mut() else {
            return Ok(());
        };
        c.rebind(helper, port);
        for entry in self.table.pending_entries() {
            let mut attempts = 0;
            loop {
                match c.register(&entry) {
                    Ok(()) => break,
                    // The new helper is draining; give it a moment
                    Err(IoMgrError::ResourceExhausted(Resource::RequestQueue))
                        if attempts < REBIND_ATTEMPTS =>
                    {
                        attempts += 1;
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CapabilityIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityIo")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("pending_io", &self.table.io_len())
            .field("pending_timers", &self.table.timer_len())
            .finish()
    }
}
