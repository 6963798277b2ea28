//! Error types for the I/O manager

use core::fmt;

use crate::id::ThreadId;
use crate::state::Direction;

/// Result type for I/O manager operations
pub type MgrResult<T> = Result<T, IoMgrError>;

/// Errors that can occur in I/O manager operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoMgrError {
    /// Backend selection or configuration is invalid (fatal at startup)
    Config(ConfigError),

    /// The backend cannot accept another registration
    ResourceExhausted(Resource),

    /// `stop()` already ran; no new registrations are accepted
    Stopped,

    /// Operation requires a running I/O manager
    NotRunning,

    /// `init_process()` was already called
    AlreadyInitialized,

    /// The thread already has an outstanding wait of this kind (caller bug)
    AlreadyWaiting {
        thread: ThreadId,
        direction: Option<Direction>,
    },

    /// The thread has no pending wait on this capability
    NotWaiting(ThreadId),

    /// Negative file descriptor
    InvalidFd(i32),

    /// Delay (in microseconds) whose deadline the monotonic clock cannot represent
    DelayOverflow(u64),

    /// A backend helper thread could not be started
    HelperSpawn,

    /// The fork child could not rebuild backend state
    ForkReinit,

    /// OS call failed with errno
    Os(i32),
}

impl fmt::Display for IoMgrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMgrError::Config(e) => write!(f, "configuration error: {}", e),
            IoMgrError::ResourceExhausted(r) => write!(f, "resource exhausted: {}", r),
            IoMgrError::Stopped => write!(f, "I/O manager stopped"),
            IoMgrError::NotRunning => write!(f, "I/O manager not running"),
            IoMgrError::AlreadyInitialized => write!(f, "I/O manager already initialized"),
            IoMgrError::AlreadyWaiting { thread, direction: Some(d) } => {
                write!(f, "thread {} already waiting for {}", thread, d)
            }
            IoMgrError::AlreadyWaiting { thread, direction: None } => {
                write!(f, "thread {} already has a pending delay", thread)
            }
            IoMgrError::NotWaiting(t) => write!(f, "thread {} has no pending wait", t),
            IoMgrError::InvalidFd(fd) => write!(f, "invalid file descriptor {}", fd),
            IoMgrError::DelayOverflow(us) => {
                write!(f, "delay of {}us overflows the monotonic clock", us)
            }
            IoMgrError::HelperSpawn => write!(f, "failed to spawn I/O helper thread"),
            IoMgrError::ForkReinit => write!(f, "failed to reinitialize I/O manager after fork"),
            IoMgrError::Os(errno) => write!(f, "OS error: errno {}", errno),
        }
    }
}

impl std::error::Error for IoMgrError {}

/// Backend configuration errors
///
/// `Unrecognised` and `Unavailable` are reported distinctly at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The name matches no known backend
    Unrecognised(String),

    /// The name is known but not built for this configuration
    Unavailable(String),

    /// A configuration value is out of range
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Unrecognised(name) => {
                write!(f, "unrecognised I/O manager backend '{}'", name)
            }
            ConfigError::Unavailable(name) => {
                write!(f, "I/O manager backend '{}' is not available in this build", name)
            }
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl From<ConfigError> for IoMgrError {
    fn from(e: ConfigError) -> Self {
        IoMgrError::Config(e)
    }
}

/// Which limit was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Per-capability readiness registrations
    PendingIo,
    /// Per-capability timers
    PendingTimers,
    /// Helper thread request queue
    RequestQueue,
    /// Kernel descriptors (eventfd, io_uring)
    Descriptors,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::PendingIo => write!(f, "pending I/O limit reached"),
            Resource::PendingTimers => write!(f, "pending timer limit reached"),
            Resource::RequestQueue => write!(f, "helper request queue full"),
            Resource::Descriptors => write!(f, "out of file descriptors"),
        }
    }
}

impl From<Resource> for IoMgrError {
    fn from(r: Resource) -> Self {
        IoMgrError::ResourceExhausted(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = IoMgrError::Config(ConfigError::Unrecognised("bogus".into()));
        assert_eq!(
            format!("{}", e),
            "configuration error: unrecognised I/O manager backend 'bogus'"
        );

        let e = IoMgrError::AlreadyWaiting {
            thread: ThreadId::new(7),
            direction: Some(Direction::Write),
        };
        assert_eq!(format!("{}", e), "thread t7 already waiting for write");
    }

    #[test]
    fn test_config_errors_are_distinct() {
        let unknown = ConfigError::Unrecognised("x".into());
        let unavailable = ConfigError::Unavailable("x".into());
        assert_ne!(unknown, unavailable);
        assert_ne!(unknown.to_string(), unavailable.to_string());
    }

    #[test]
    fn test_error_conversion() {
        let e: IoMgrError = Resource::PendingIo.into();
        assert!(matches!(e, IoMgrError::ResourceExhausted(Resource::PendingIo)));

        let e: IoMgrError = ConfigError::InvalidValue("x").into();
        assert!(matches!(e, IoMgrError::Config(ConfigError::InvalidValue(_))));
    }
}
