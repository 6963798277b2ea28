//! AsyncCompletionNative helper thread (`uring`)
//!
//! Same capability-side model as the poller, but the helper drives an
//! io_uring instance instead of `poll(2)`:
//! - readiness wait -> `PollAdd` (one-shot)
//! - delay -> `Timeout` relative to submission time
//! - cancel hint -> `AsyncCancel` on the wait's token
//! - the helper's own eventfd stays armed with a `PollAdd`, so a new request
//!   ends `submit_and_wait`
//!
//! Tokens (`user_data`) are the wait's sequence number, which starts at 1.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use io_uring::{opcode, squeue, types, IoUring};
use iomgr_core::{kdebug, kerror, kwarn, IoMgrError, MgrResult, WaitEntry, WaitKind};
use nix::errno::Errno;

use super::completion::{CompletionPort, HelperShared, Request};
use crate::sys;

const CONTROL_TOKEN: u64 = 0;
const CANCEL_TOKEN: u64 = u64::MAX;

/// Set up the ring on the caller's thread so failures surface from
/// `init_process`, then move it to the helper.
pub(crate) fn spawn(shared: Arc<HelperShared>, batch: usize, entries: u32) -> MgrResult<JoinHandle<()>> {
    let ring = IoUring::new(entries).map_err(|e| match e.raw_os_error() {
        Some(errno) => sys::errno_error(Errno::from_raw(errno)),
        None => IoMgrError::Os(0),
    })?;
    thread::Builder::new()
        .name("iomgr-uring".into())
        .spawn(move || uring_loop(ring, shared, batch))
        .map_err(|_| IoMgrError::HelperSpawn)
}

struct InFlight {
    entry: Arc<WaitEntry>,
    port: Arc<CompletionPort>,
    /// Kept alive until the timeout completes
    _timespec: Option<Box<types::Timespec>>,
}

/// Push one SQE, flushing the queue to the kernel once if it is full
fn push(ring: &mut IoUring, sqe: &squeue::Entry) -> bool {
    // SAFETY: every buffer an SQE points at (the timespec) is owned by
    // `InFlight` until its completion is reaped
    if unsafe { ring.submission().push(sqe) }.is_ok() {
        return true;
    }
    if ring.submit().is_err() {
        return false;
    }
    unsafe { ring.submission().push(sqe) }.is_ok()
}

fn uring_loop(mut ring: IoUring, shared: Arc<HelperShared>, batch: usize) {
    kdebug!("uring: started (batch {})", batch);

    let mut inflight: HashMap<u64, InFlight> = HashMap::new();
    let mut control_armed = false;
    let mut reaped: Vec<(u64, i32)> = Vec::new();

    loop {
        if shared.is_shutdown() {
            break;
        }

        if !control_armed {
            let sqe = opcode::PollAdd::new(types::Fd(shared.control.raw()), libc::POLLIN as u32)
                .build()
                .user_data(CONTROL_TOKEN);
            control_armed = push(&mut ring, &sqe);
        }

        // ── Step 1: Drain request queue -> SQEs ──
        for _ in 0..batch {
            let Some(req) = shared.pop() else { break };
            match req {
                Request::Register { entry, port } => {
                    if !entry.is_pending() {
                        continue;
                    }
                    let token = entry.seq();
                    let (sqe, timespec) = match entry.kind() {
                        WaitKind::Io { fd, direction } => (
                            opcode::PollAdd::new(types::Fd(fd), sys::poll_events(direction) as u32)
                                .build(),
                            None,
                        ),
                        WaitKind::Delay { deadline } => {
                            let d = deadline.saturating_duration_since(Instant::now());
                            let ts = Box::new(
                                types::Timespec::new()
                                    .sec(d.as_secs())
                                    .nsec(d.subsec_nanos()),
                            );
                            let sqe = opcode::Timeout::new(&*ts as *const types::Timespec).build();
                            (sqe, Some(ts))
                        }
                    };
                    if push(&mut ring, &sqe.user_data(token)) {
                        inflight.insert(
                            token,
                            InFlight {
                                entry,
                                port,
                                _timespec: timespec,
                            },
                        );
                    } else {
                        // Wake early rather than lose the thread; it re-checks and re-waits
                        kwarn!("uring: submission queue full, waking {} early", entry.thread());
                        port.post(entry);
                    }
                }
                Request::Cancel { entry } => {
                    if inflight.contains_key(&entry.seq()) {
                        let sqe = opcode::AsyncCancel::new(entry.seq())
                            .build()
                            .user_data(CANCEL_TOKEN);
                        push(&mut ring, &sqe);
                    }
                }
            }
        }

        // ── Step 2: Submit, sleeping for one completion unless work is queued ──
        let want = if shared.has_requests() { 0 } else { 1 };
        if let Err(e) = ring.submit_and_wait(want) {
            match e.raw_os_error() {
                Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::EBUSY) => {}
                _ => {
                    kerror!("uring: submit failed: {}", e);
                    break;
                }
            }
        }

        // ── Step 3: Reap and post ──
        reaped.clear();
        reaped.extend(ring.completion().map(|c| (c.user_data(), c.result())));
        for &(token, result) in &reaped {
            match token {
                CONTROL_TOKEN => {
                    shared.control.drain();
                    control_armed = false;
                }
                CANCEL_TOKEN => {}
                _ => {
                    let Some(f) = inflight.remove(&token) else { continue };
                    // Cancelled in the kernel: the owner already resolved it
                    if result == -libc::ECANCELED {
                        continue;
                    }
                    // -ETIME is a fired timeout; other errors surface when the thread retries
                    f.port.post(f.entry);
                }
            }
        }
    }

    kdebug!("uring: exiting ({} in flight)", inflight.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::completion::CompletionState;
    use crate::waits::WaitTable;
    use iomgr_core::{CapabilityId, Direction, ThreadId};
    use nix::unistd::{pipe, write};
    use std::os::fd::AsRawFd;
    use std::time::Duration;

    fn start() -> (Arc<HelperShared>, JoinHandle<()>, CompletionState) {
        let shared = HelperShared::new(64).unwrap();
        let handle = spawn(Arc::clone(&shared), 16, 64).unwrap();
        let port = CompletionPort::new(CapabilityId::new(0)).unwrap();
        let state = CompletionState::new(port, Arc::clone(&shared));
        (shared, handle, state)
    }

    #[test]
    fn test_poll_add_posts_readiness() {
        let (shared, handle, mut st) = start();
        let mut table = WaitTable::new(8, 8);
        let (r, w) = pipe().unwrap();
        let e = table.add_io(ThreadId::new(1), Direction::Read, r.as_raw_fd()).unwrap();
        st.register(&e).unwrap();

        write(&w, b"x").unwrap();
        assert_eq!(st.poll_once(&mut table, true).unwrap(), vec![ThreadId::new(1)]);

        shared.request_shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_timeout_posts_delay() {
        let (shared, handle, mut st) = start();
        let mut table = WaitTable::new(8, 8);
        let start = Instant::now();
        let e = table
            .add_timer(ThreadId::new(2), start + Duration::from_millis(20))
            .unwrap();
        st.register(&e).unwrap();

        assert_eq!(st.poll_once(&mut table, true).unwrap(), vec![ThreadId::new(2)]);
        assert!(start.elapsed() >= Duration::from_millis(20));

        shared.request_shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_reaches_kernel() {
        let (shared, handle, mut st) = start();
        let mut table = WaitTable::new(8, 8);
        let (r, _w) = pipe().unwrap();
        let e = table.add_io(ThreadId::new(3), Direction::Read, r.as_raw_fd()).unwrap();
        st.register(&e).unwrap();

        let entry = table.cancel_io(ThreadId::new(3)).unwrap();
        st.cancelled(entry);
        thread::sleep(Duration::from_millis(20));
        assert!(st.poll_once(&mut table, false).unwrap().is_empty());

        shared.request_shutdown();
        handle.join().unwrap();
    }
}
