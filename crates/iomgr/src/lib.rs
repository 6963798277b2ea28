//! # iomgr - per-capability I/O manager
//!
//! Lets a green-thread scheduler park user threads on descriptor readiness
//! or a timed delay, and hands them back when the wait resolves.
//!
//! ## Features
//!
//! - **Pluggable backends**: `select` (poll per capability), `mio` (helper
//!   thread), `uring` (io_uring helper, feature `io-uring`)
//! - **Per-capability state**: no locks on the wait path
//! - **Cancellation**: completion/cancel races resolve on the owning capability
//! - **GC hook**: heap objects pinned to a wait are reported while it is pending
//!
//! ## Quick Start
//!
//! ```ignore
//! use iomgr::{Direction, IoManagerConfig, ThreadId};
//!
//! let mgr = iomgr::start(IoManagerConfig::from_env())
//!     .unwrap_or_else(|e| iomgr::fatal("I/O manager", &e));
//! let mut cap = mgr.init_capability()?;
//!
//! cap.wait_for_readiness(ThreadId::new(1), Direction::Read, fd)?;
//! cap.wait_for_delay(ThreadId::new(2), 50_000)?;
//!
//! for t in cap.poll_once(true)? {
//!     // make t runnable
//! }
//! mgr.exit(true);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                  Scheduler (capability N)                  │
//! │     wait_for_readiness / wait_for_delay / cancel_*         │
//! └────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                    CapabilityIo                            │
//! │   WaitTable (FIFO io, deadline-ordered timers, GC roots)   │
//! └────────────────────────────────────────────────────────────┘
//!          │                                     │
//!          ▼                                     ▼
//!   ┌─────────────┐                  ┌──────────────────────────┐
//!   │   select    │                  │ completion port + eventfd│
//!   │  poll(2)    │                  └──────────────────────────┘
//!   └─────────────┘                              ▲ post
//!                                    ┌──────────────────────────┐
//!                                    │ helper: poll(2)/io_uring │
//!                                    └──────────────────────────┘
//! ```

// Re-export core types
pub use iomgr_core::{
    CapabilityId, Clock, ConfigError, Direction, Evacuate, HeapRef, IoMgrError, ManualClock,
    MgrResult, MonotonicClock, Resource, RunQueue, ThreadId, WaitState,
};

// Re-export kprint macros for debug logging
pub use iomgr_core::{kdebug, kerror, kinfo, ktrace, kwarn};
pub use iomgr_core::kprint::{
    init as init_logging, set_capability as set_log_capability, set_flush_enabled, set_log_level,
    LogLevel,
};

// Re-export env utilities
pub use iomgr_core::{env_flag, env_or, env_str};

// Re-export runtime types
pub use iomgr_runtime::{
    fatal, select_backend, BackendAvailability, BackendKind, BackendSet, CancelOutcome,
    CapabilityIo, CapabilityStats, CapabilityWaker, IoManager, IoManagerConfig, Phase, Threading,
};

/// Create the I/O manager for `config` and run process-wide setup
pub fn start(config: IoManagerConfig) -> MgrResult<IoManager> {
    let mgr = IoManager::new(config)?;
    mgr.init_process()?;
    Ok(mgr)
}
