//! # iomgr-core
//!
//! Core types for the iomgr per-capability I/O manager.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Backends, lifecycle and the wait facade live in `iomgr-runtime`.
//!
//! ## Modules
//!
//! - `id` - user thread and capability identifiers
//! - `state` - wait direction, wait state and the shared `WaitEntry`
//! - `queue` - arena-backed FIFO with O(1) remove-by-key
//! - `gc` - heap references and the evacuate contract
//! - `clock` - monotonic clock source
//! - `sched` - scheduler hook the resolver hands woken threads to
//! - `error` - error types
//! - `kprint` - kernel-style leveled logging macros
//! - `env` - environment variable utilities

pub mod id;
pub mod state;
pub mod queue;
pub mod gc;
pub mod clock;
pub mod sched;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{CapabilityId, ThreadId};
pub use state::{Direction, WaitEntry, WaitKind, WaitState};
pub use queue::{QueueKey, WaitQueue};
pub use gc::{Evacuate, HeapRef};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use sched::RunQueue;
pub use error::{ConfigError, IoMgrError, MgrResult, Resource};
pub use env::{env_flag, env_or, env_str};
