//! I/O manager configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls (programmatic)
//! 2. Environment variables (runtime)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use iomgr_runtime::config::IoManagerConfig;
//! use iomgr_runtime::backend::Threading;
//!
//! let config = IoManagerConfig::from_env()
//!     .backend("select")
//!     .threading(Threading::NonThreaded);
//! let kind = config.resolve_backend()?;
//! ```

pub mod defaults;

use iomgr_core::env::{env_flag, env_or, env_str};
use iomgr_core::ConfigError;

use crate::backend::{select_backend, BackendAvailability, BackendKind, Threading};

/// I/O manager configuration with builder pattern.
///
/// The backend choice is carried here as an explicit value and handed to
/// `IoManager::new`; nothing reads it from global state later.
#[derive(Debug, Clone)]
pub struct IoManagerConfig {
    /// Requested backend token (`auto` picks the default for `threading`)
    pub backend: String,
    /// Runtime threading configuration
    pub threading: Threading,
    /// Per-capability cap on outstanding readiness waits
    pub max_pending_io: usize,
    /// Per-capability cap on outstanding delays
    pub max_pending_timers: usize,
    /// Capacity of the capability -> helper request queue
    pub request_queue_capacity: usize,
    /// Requests the helper drains per loop iteration
    pub helper_batch: usize,
    /// io_uring submission queue depth
    pub uring_entries: u32,
}

impl Default for IoManagerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl IoManagerConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `IOMGR_BACKEND` - backend name (`select`, `mio`, `uring`, `auto`)
    /// - `IOMGR_THREADED` - threaded runtime (0/1)
    /// - `IOMGR_MAX_PENDING_IO` - readiness waits per capability
    /// - `IOMGR_MAX_PENDING_TIMERS` - delays per capability
    /// - `IOMGR_REQUEST_QUEUE_CAPACITY` - helper request queue size
    /// - `IOMGR_HELPER_BATCH` - requests drained per helper iteration
    /// - `IOMGR_URING_ENTRIES` - io_uring queue depth
    pub fn from_env() -> Self {
        let threaded = env_flag("IOMGR_THREADED", defaults::THREADED);
        Self {
            backend: env_str("IOMGR_BACKEND").unwrap_or_else(|| defaults::BACKEND.to_string()),
            threading: if threaded {
                Threading::Threaded
            } else {
                Threading::NonThreaded
            },
            max_pending_io: env_or("IOMGR_MAX_PENDING_IO", defaults::MAX_PENDING_IO),
            max_pending_timers: env_or("IOMGR_MAX_PENDING_TIMERS", defaults::MAX_PENDING_TIMERS),
            request_queue_capacity: env_or(
                "IOMGR_REQUEST_QUEUE_CAPACITY",
                defaults::REQUEST_QUEUE_CAPACITY,
            ),
            helper_batch: env_or("IOMGR_HELPER_BATCH", defaults::HELPER_BATCH),
            uring_entries: env_or("IOMGR_URING_ENTRIES", defaults::URING_ENTRIES),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            backend: defaults::BACKEND.to_string(),
            threading: if defaults::THREADED {
                Threading::Threaded
            } else {
                Threading::NonThreaded
            },
            max_pending_io: defaults::MAX_PENDING_IO,
            max_pending_timers: defaults::MAX_PENDING_TIMERS,
            request_queue_capacity: defaults::REQUEST_QUEUE_CAPACITY,
            helper_batch: defaults::HELPER_BATCH,
            uring_entries: defaults::URING_ENTRIES,
        }
    }

    // Builder methods

    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.backend = name.into();
        self
    }

    pub fn threading(mut self, threading: Threading) -> Self {
        self.threading = threading;
        self
    }

    pub fn max_pending_io(mut self, n: usize) -> Self {
        self.max_pending_io = n;
        self
    }

    pub fn max_pending_timers(mut self, n: usize) -> Self {
        self.max_pending_timers = n;
        self
    }

    pub fn request_queue_capacity(mut self, n: usize) -> Self {
        self.request_queue_capacity = n;
        self
    }

    pub fn helper_batch(mut self, n: usize) -> Self {
        self.helper_batch = n;
        self
    }

    pub fn uring_entries(mut self, n: u32) -> Self {
        self.uring_entries = n;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending_io == 0 {
            return Err(ConfigError::InvalidValue("max_pending_io must be > 0"));
        }
        if self.max_pending_timers == 0 {
            return Err(ConfigError::InvalidValue("max_pending_timers must be > 0"));
        }
        if self.request_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("request_queue_capacity must be > 0"));
        }
        if self.helper_batch == 0 {
            return Err(ConfigError::InvalidValue("helper_batch must be > 0"));
        }
        if !self.uring_entries.is_power_of_two() {
            return Err(ConfigError::InvalidValue("uring_entries must be a power of two"));
        }
        Ok(())
    }

    /// Validate, then map the requested backend token to a built backend.
    ///
    /// Unknown names and known-but-unbuilt names fail with distinct errors.
    pub fn resolve_backend(&self) -> Result<BackendKind, ConfigError> {
        self.validate()?;
        match select_backend(&self.backend, self.threading) {
            BackendAvailability::Available(kind) => Ok(kind),
            BackendAvailability::Unavailable => {
                Err(ConfigError::Unavailable(self.backend.clone()))
            }
            BackendAvailability::Unrecognised => {
                Err(ConfigError::Unrecognised(self.backend.clone()))
            }
        }
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("I/O Manager Configuration:");
        eprintln!("  backend:                {}", self.backend);
        eprintln!("  threading:              {:?}", self.threading);
        eprintln!("  max_pending_io:         {}", self.max_pending_io);
        eprintln!("  max_pending_timers:     {}", self.max_pending_timers);
        eprintln!("  request_queue_capacity: {}", self.request_queue_capacity);
        eprintln!("  helper_batch:           {}", self.helper_batch);
        eprintln!("  uring_entries:          {}", self.uring_entries);
    }
}
