//! Wakeup descriptor for parked pollers
//!
//! Writers bump a counter; the parked side polls the read end and drains
//! it. Multiple `notify()` calls before the reader drains coalesce into a
//! single wakeup (eventfd counter semantics). On Linux this is an eventfd;
//! other unix targets use a non-blocking pipe pair.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use iomgr_core::MgrResult;
use nix::errno::Errno;

use crate::sys::{self, PollStatus};

pub(crate) struct ControlFd {
    read: OwnedFd,
    /// Distinct from `read` only for the pipe fallback
    write: Option<OwnedFd>,
}

impl ControlFd {
    pub(crate) fn new() -> MgrResult<Self> {
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
                if fd < 0 {
                    return Err(sys::errno_error(Errno::last()));
                }
                Ok(Self {
                    read: unsafe { OwnedFd::from_raw_fd(fd) },
                    write: None,
                })
            } else {
                let mut fds = [0 as libc::c_int; 2];
                if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
                    return Err(sys::errno_error(Errno::last()));
                }
                let (read, write) = unsafe {
                    (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))
                };
                for fd in [fds[0], fds[1]] {
                    unsafe {
                        libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                    }
                }
                Ok(Self { read, write: Some(write) })
            }
        }
    }

    /// Descriptor to poll for readability
    #[inline]
    pub(crate) fn raw(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    fn write_fd(&self) -> RawFd {
        self.write.as_ref().unwrap_or(&self.read).as_raw_fd()
    }

    pub(crate) fn notify(&self) -> MgrResult<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.write_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            // EAGAIN: counter saturated or pipe full, a wakeup is already pending
            return match Errno::last() {
                Errno::EAGAIN => Ok(()),
                errno => Err(sys::errno_error(errno)),
            };
        }
        Ok(())
    }

    /// Consume pending wakeups; true if there were any
    pub(crate) fn drain(&self) -> bool {
        let mut buf = [0u8; 64];
        let mut any = false;
        loop {
            let ret = unsafe {
                libc::read(
                    self.raw(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if ret <= 0 {
                return any;
            }
            any = true;
            if self.write.is_none() {
                // eventfd hands back the whole counter in one read
                return any;
            }
        }
    }

    /// Park until notified or `timeout` elapses, then drain.
    ///
    /// Returns true if a wakeup was consumed. A signal ends the wait early
    /// and reports false.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> MgrResult<bool> {
        let mut fds = [libc::pollfd {
            fd: self.raw(),
            events: libc::POLLIN,
            revents: 0,
        }];
        match sys::poll(&mut fds, timeout)? {
            PollStatus::Ready(0) | PollStatus::Interrupted => Ok(false),
            PollStatus::Ready(_) => Ok(self.drain()),
        }
    }
}
