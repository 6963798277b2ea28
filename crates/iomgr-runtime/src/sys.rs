//! Thin `poll(2)` wrapper and errno mapping shared by the backends

use std::time::Duration;

use iomgr_core::{Direction, IoMgrError, Resource};
use nix::errno::Errno;

/// Result of one `poll(2)` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStatus {
    /// Number of descriptors with non-zero `revents`
    Ready(usize),
    /// A signal arrived before anything became ready
    Interrupted,
}

/// Events that wake a readiness waiter for `direction`
#[inline]
pub(crate) fn poll_events(direction: Direction) -> libc::c_short {
    match direction {
        Direction::Read => libc::POLLIN,
        Direction::Write => libc::POLLOUT,
    }
}

/// Any of these ends the wait; errors are rediscovered by the retrying thread
#[inline]
pub(crate) fn is_ready(revents: libc::c_short) -> bool {
    revents & (libc::POLLIN | libc::POLLOUT | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0
}

/// Whole milliseconds for `poll(2)`, rounded up so a timer is never
/// checked before its deadline; `None` blocks indefinitely.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let micros = d.as_micros();
            let ms = micros.div_ceil(1000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

pub(crate) fn poll(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> Result<PollStatus, IoMgrError> {
    let ret = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_ms(timeout),
        )
    };
    if ret >= 0 {
        return Ok(PollStatus::Ready(ret as usize));
    }
    match Errno::last() {
        Errno::EINTR => Ok(PollStatus::Interrupted),
        errno => Err(errno_error(errno)),
    }
}

/// Map an errno to the I/O manager's error space
pub(crate) fn errno_error(errno: Errno) -> IoMgrError {
    match errno {
        Errno::EMFILE | Errno::ENFILE => IoMgrError::ResourceExhausted(Resource::Descriptors),
        errno => IoMgrError::Os(errno as i32),
    }
}
