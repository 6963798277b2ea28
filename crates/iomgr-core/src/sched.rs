//! Scheduler hook: "make this thread runnable"

use crate::id::ThreadId;

/// Receives threads whose wait resolved
///
/// Called on the owning capability's OS thread, once per woken thread, in
/// wake order.
pub trait RunQueue {
    fn make_runnable(&mut self, thread: ThreadId);
}

impl RunQueue for Vec<ThreadId> {
    #[inline]
    fn make_runnable(&mut self, thread: ThreadId) {
        self.push(thread);
    }
}

impl RunQueue for std::collections::VecDeque<ThreadId> {
    #[inline]
    fn make_runnable(&mut self, thread: ThreadId) {
        self.push_back(thread);
    }
}
