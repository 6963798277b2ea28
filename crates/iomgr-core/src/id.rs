//! User thread and capability identifiers

use core::fmt;

/// Handle of a user thread known to the scheduler
///
/// The I/O manager never dereferences it: the thread object itself stays
/// owned (and GC-traced) by the scheduler's thread bookkeeping.
/// The maximum value (u32::MAX) is reserved as a sentinel for "no thread".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(u32);

impl ThreadId {
    /// Sentinel value indicating no thread
    pub const NONE: ThreadId = ThreadId(u32::MAX);

    #[inline]
    pub const fn new(id: u32) -> Self {
        ThreadId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u32::MAX
    }
}

impl From<u32> for ThreadId {
    #[inline]
    fn from(id: u32) -> Self {
        ThreadId(id)
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "ThreadId(NONE)")
        } else {
            write!(f, "ThreadId({})", self.0)
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "t{}", self.0)
        }
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        ThreadId::NONE
    }
}

/// Index of a capability (OS worker thread) within the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CapabilityId(u32);

impl CapabilityId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        CapabilityId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cap{}", self.0)
    }
}
