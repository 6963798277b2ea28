//! Heap references held by the I/O manager and the evacuate contract
//!
//! The collector pauses every capability, then asks each one to report the
//! heap objects it keeps alive outside the scheduler's thread bookkeeping.
//! A moving collector may relocate an object, so `Evacuate` receives the
//! reference by `&mut` and may overwrite it with the new address.

use core::fmt;

/// Opaque reference to a runtime heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HeapRef(usize);

impl HeapRef {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        HeapRef(addr)
    }

    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({:#x})", self.0)
    }
}

/// Collector callback: mark (and possibly move) one root
pub trait Evacuate {
    fn evacuate(&mut self, root: &mut HeapRef);
}

impl<F: FnMut(&mut HeapRef)> Evacuate for F {
    #[inline]
    fn evacuate(&mut self, root: &mut HeapRef) {
        self(root)
    }
}
