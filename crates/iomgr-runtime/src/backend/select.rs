//! ReadinessPoll backend (`select`)
//!
//! Everything happens on the owning capability's OS thread: each
//! `poll_once` builds a `pollfd` array from the pending readiness waits
//! (registration order), sleeps in `poll(2)` for at most the time to the
//! nearest deadline, then completes ready descriptors and expired delays.
//! No helper threads, no cross-thread wakeup.

use std::sync::Arc;

use iomgr_core::{ktrace, Clock, MgrResult, QueueKey, ThreadId, WaitKind};

use crate::sys::{self, PollStatus};
use crate::waits::WaitTable;

pub struct SelectState {
    /// Scratch buffers reused across polls
    pollfds: Vec<libc::pollfd>,
    keys: Vec<QueueKey>,
    clock: Arc<dyn Clock>,
}

impl SelectState {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            pollfds: Vec::new(),
            keys: Vec::new(),
            clock,
        }
    }

    /// One resolver pass
    ///
    /// Woken readiness waiters come first in registration order, then
    /// expired delays in deadline order.
    pub(crate) fn poll_once(&mut self, table: &mut WaitTable, blocking: bool) -> MgrResult<Vec<ThreadId>> {
        let mut woken = Vec::new();
        loop {
            if blocking && !table.has_pending() {
                // Nothing could ever wake us; deadlock detection is the scheduler's job
                return Ok(woken);
            }

            self.pollfds.clear();
            self.keys.clear();
            for (key, entry) in table.io_waits() {
                if let WaitKind::Io { fd, direction } = entry.kind() {
                    self.pollfds.push(libc::pollfd {
                        fd,
                        events: sys::poll_events(direction),
                        revents: 0,
                    });
                    self.keys.push(key);
                }
            }

            let timeout = if !blocking {
                Some(std::time::Duration::ZERO)
            } else {
                table
                    .next_deadline()
                    .map(|d| d.saturating_duration_since(self.clock.now()))
            };

            let status = sys::poll(&mut self.pollfds, timeout)?;
            if let PollStatus::Ready(n) = status {
                if n > 0 {
                    for (pfd, key) in self.pollfds.iter().zip(self.keys.iter()) {
                        if sys::is_ready(pfd.revents) {
                            if let Some(thread) = table.complete_io_at(*key) {
                                woken.push(thread);
                            }
                        }
                    }
                }
            }

            table.expire_timers(self.clock.now(), &mut woken);

            ktrace!(
                "select: {} fds, {:?} -> {} woken",
                self.keys.len(),
                status,
                woken.len()
            );

            // A signal counts as an external wakeup; otherwise a blocking poll
            // only returns once something actually resolved
            if !woken.is_empty() || !blocking || status == PollStatus::Interrupted {
                return Ok(woken);
            }
        }
    }
}
