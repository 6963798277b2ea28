//! AsyncCompletionPosix helper thread (`mio`)
//!
//! One process-wide OS thread multiplexes readiness and delays for every
//! capability:
//! 1. Drains up to `batch` requests from the lock-free request queue
//! 2. Drops interests whose wait is no longer `Pending` (lazy cancellation);
//!    cancelled delays are pruned from the heap once they could make up half
//!    of it
//! 3. `poll(2)`s its control eventfd plus every live interest, bounded by
//!    the nearest deadline
//! 4. Posts ready descriptors and expired delays to their capability's port

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use iomgr_core::{kdebug, kerror, ktrace, IoMgrError, MgrResult, WaitEntry, WaitKind};

use super::completion::{CompletionPort, HelperShared, Request};
use crate::sys::{self, PollStatus};
use crate::timer::heap::DeadlineHeap;

/// Back-off after an unexpected poll failure
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

pub(crate) fn spawn(shared: Arc<HelperShared>, batch: usize) -> MgrResult<JoinHandle<()>> {
    thread::Builder::new()
        .name("iomgr-poller".into())
        .spawn(move || poller_loop(shared, batch))
        .map_err(|_| IoMgrError::HelperSpawn)
}

struct Interest {
    entry: Arc<WaitEntry>,
    port: Arc<CompletionPort>,
}

impl Interest {
    #[inline]
    fn live(&self) -> bool {
        self.entry.is_pending()
    }

    fn fire(self) {
        self.port.post(self.entry);
    }
}

fn poller_loop(shared: Arc<HelperShared>, batch: usize) {
    kdebug!("poller: started (batch {})", batch);

    let mut interests: Vec<Interest> = Vec::new();
    let mut timers: DeadlineHeap<Interest> = DeadlineHeap::new();
    let mut pollfds: Vec<libc::pollfd> = Vec::new();
    // Cancelled delays possibly still buried in `timers`
    let mut cancelled_timers = 0usize;

    loop {
        if shared.is_shutdown() {
            break;
        }

        // ── Step 1: Drain request queue ──
        for _ in 0..batch {
            let Some(req) = shared.pop() else { break };
            match req {
                Request::Register { entry, port } => match entry.kind() {
                    WaitKind::Io { .. } => interests.push(Interest { entry, port }),
                    WaitKind::Delay { deadline } => {
                        let seq = entry.seq();
                        timers.push(deadline, seq, Interest { entry, port });
                    }
                },
                // The entry is already Cancelled; step 2 drops it
                Request::Cancel { entry } => {
                    if !entry.kind().is_io() {
                        cancelled_timers += 1;
                    }
                }
            }
        }

        // ── Step 2: Lazy cancellation ──
        interests.retain(Interest::live);
        if cancelled_timers > 0 && cancelled_timers * 2 >= timers.len() {
            let dropped = timers.prune(Interest::live);
            ktrace!("poller: pruned {} cancelled delays", dropped);
            cancelled_timers = 0;
        }

        // ── Step 3: Poll ──
        let timeout = if shared.has_requests() {
            Some(Duration::ZERO)
        } else {
            timers
                .next_deadline(Interest::live)
                .map(|d| d.saturating_duration_since(Instant::now()))
        };

        pollfds.clear();
        pollfds.push(libc::pollfd {
            fd: shared.control.raw(),
            events: libc::POLLIN,
            revents: 0,
        });
        for i in &interests {
            if let WaitKind::Io { fd, direction } = i.entry.kind() {
                pollfds.push(libc::pollfd {
                    fd,
                    events: sys::poll_events(direction),
                    revents: 0,
                });
            }
        }

        match sys::poll(&mut pollfds, timeout) {
            Ok(PollStatus::Ready(n)) if n > 0 => {
                if pollfds[0].revents != 0 {
                    shared.control.drain();
                }
                // ── Step 4a: Post ready descriptors ──
                // pollfds[1..] lines up with interests
                let mut kept = Vec::with_capacity(interests.len());
                for (i, pfd) in interests.drain(..).zip(pollfds[1..].iter()) {
                    if sys::is_ready(pfd.revents) {
                        i.fire();
                    } else {
                        kept.push(i);
                    }
                }
                interests = kept;
                ktrace!("poller: {} ready of {}", n, pollfds.len());
            }
            Ok(_) => {}
            Err(e) => {
                kerror!("poller: poll failed: {}", e);
                thread::sleep(ERROR_BACKOFF);
            }
        }

        // ── Step 4b: Post expired delays ──
        for t in timers.pop_expired(Instant::now(), Interest::live) {
            t.fire();
        }
    }

    let (fired, discarded) = timers.totals();
    kdebug!(
        "poller: exiting ({} interests, {} timers outstanding, {} fired, {} discarded)",
        interests.len(),
        timers.len(),
        fired,
        discarded
    );
}
