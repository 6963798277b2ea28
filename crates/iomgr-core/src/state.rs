//! Wait direction, wait state and the shared wait record

use core::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use crate::id::ThreadId;

/// Direction of a readiness wait
///
/// Read and write share one code path everywhere; the direction only
/// selects the poll event bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// Resolution state of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaitState {
    /// Registered, not yet resolved
    Pending = 0,

    /// The descriptor became ready or the deadline passed
    Completed = 1,

    /// Removed by the owner before it resolved
    Cancelled = 2,
}

impl WaitState {
    #[inline]
    pub const fn is_pending(&self) -> bool {
        matches!(self, WaitState::Pending)
    }
}

impl From<u8> for WaitState {
    fn from(v: u8) -> Self {
        match v {
            0 => WaitState::Pending,
            1 => WaitState::Completed,
            _ => WaitState::Cancelled,
        }
    }
}

/// What a wait is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Readiness of `fd` for `direction`
    Io { fd: i32, direction: Direction },

    /// Absolute wake time
    Delay { deadline: Instant },
}

impl WaitKind {
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, WaitKind::Io { .. })
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WaitKind::Delay { deadline } => Some(*deadline),
            WaitKind::Io { .. } => None,
        }
    }
}

/// One thread's outstanding wait
///
/// Shared (behind `Arc`) between the owning capability and, for completion
/// backends, a helper thread. The state leaves `Pending` exactly once: the
/// first successful `try_complete` / `try_cancel` wins and every later
/// attempt observes the final state and fails.
#[derive(Debug)]
pub struct WaitEntry {
    thread: ThreadId,
    kind: WaitKind,
    /// Process-wide registration order, breaks deadline ties
    seq: u64,
    state: AtomicU8,
}

impl WaitEntry {
    pub fn new(thread: ThreadId, kind: WaitKind) -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(1);
        Self {
            thread,
            kind,
            seq: SEQ.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(WaitState::Pending as u8),
        }
    }

    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    #[inline]
    pub fn kind(&self) -> WaitKind {
        self.kind
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn state(&self) -> WaitState {
        WaitState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    /// Pending -> Completed. Returns false if the entry was already resolved.
    #[inline]
    pub fn try_complete(&self) -> bool {
        self.transition(WaitState::Completed)
    }

    /// Pending -> Cancelled. Returns false if the entry was already resolved.
    #[inline]
    pub fn try_cancel(&self) -> bool {
        self.transition(WaitState::Cancelled)
    }

    fn transition(&self, to: WaitState) -> bool {
        self.state
            .compare_exchange(
                WaitState::Pending as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
