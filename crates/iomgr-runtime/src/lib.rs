//! # iomgr-runtime
//!
//! Platform-specific side of the iomgr per-capability I/O manager.
//!
//! This crate provides:
//! - Backend selection (`select`, `mio`, `uring`)
//! - Per-capability wait state, the wait facade and the resolver
//! - Helper threads for the completion backends
//! - Process lifecycle: init, stop, exit, wakeup, reinit after fork
//! - Configuration with environment overrides

pub mod backend;
pub mod capability;
pub mod config;
pub mod manager;
pub mod timer;
pub mod waits;

mod control;
mod sys;

// Re-exports
pub use backend::{select_backend, BackendAvailability, BackendKind, BackendSet, Threading};
pub use capability::{CapabilityIo, CapabilityWaker};
pub use config::IoManagerConfig;
pub use manager::{fatal, IoManager, Phase};
pub use waits::{CancelOutcome, CapabilityStats};

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(unix)] {
        // poll(2), eventfd / pipe, io_uring on Linux
    } else {
        compile_error!("iomgr-runtime supports unix targets only");
    }
}
