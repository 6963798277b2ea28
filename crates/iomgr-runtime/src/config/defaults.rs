//! Library defaults for `IoManagerConfig`

/// Backend token used when `IOMGR_BACKEND` is unset
pub const BACKEND: &str = "auto";

/// Threaded runtime unless told otherwise
pub const THREADED: bool = true;

/// Readiness registrations one capability may hold
pub const MAX_PENDING_IO: usize = 65_536;

/// Delay registrations one capability may hold
pub const MAX_PENDING_TIMERS: usize = 65_536;

/// Bounded request queue between capabilities and the helper thread
pub const REQUEST_QUEUE_CAPACITY: usize = 4096;

/// Requests the helper drains per loop iteration before polling
pub const HELPER_BATCH: usize = 256;

/// Submission queue depth for the io_uring helper (power of two)
pub const URING_ENTRIES: u32 = 256;
