//! I/O manager lifecycle
//!
//! ```text
//!   Uninitialized ──init_process──► Running ──stop──► Stopping ──exit──► Exited
//! ```
//!
//! `stop()` may be invoked once per capability during shutdown; one atomic
//! flag makes every call after the first a no-op. Capabilities can be set
//! up before `init_process()`: their registrations queue until the helper
//! thread starts.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use iomgr_core::{
    kdebug, kerror, kinfo, ktrace, CapabilityId, Clock, ConfigError, IoMgrError, MgrResult,
    MonotonicClock,
};

use crate::backend::completion::{CompletionPort, CompletionState, HelperShared, HelperThread};
use crate::backend::select::SelectState;
use crate::backend::BackendKind;
use crate::capability::{CapabilityIo, CapabilityIoState};
use crate::config::IoManagerConfig;

/// Process-wide lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Uninitialized = 0,
    Running = 1,
    Stopping = 2,
    Exited = 3,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Uninitialized,
            1 => Phase::Running,
            2 => Phase::Stopping,
            _ => Phase::Exited,
        }
    }
}

/// State every capability holds a reference to
pub(crate) struct ManagerShared {
    kind: BackendKind,
    config: IoManagerConfig,
    clock: Arc<dyn Clock>,
    phase: AtomicU8,
    stopped: AtomicBool,
}

impl ManagerShared {
    #[inline]
    pub(crate) fn config(&self) -> &IoManagerConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    #[inline]
    fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn transition(&self, from: Phase, to: Phase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// New waits are refused once `stop()` ran
    #[inline]
    pub(crate) fn check_accepting(&self) -> MgrResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(IoMgrError::Stopped);
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// The process-wide I/O manager
///
/// Share it between capability threads behind an `Arc`; every method takes
/// `&self`.
pub struct IoManager {
    shared: Arc<ManagerShared>,
    /// Request channel of the current helper (completion backends)
    helper_shared: Mutex<Option<Arc<HelperShared>>>,
    helper: Mutex<Option<HelperThread>>,
    /// Ports of live capabilities, for `wakeup()`
    ports: Mutex<Vec<Weak<CompletionPort>>>,
    next_cap: AtomicU32,
}

impl IoManager {
    /// Resolve the configured backend and set up process-wide state
    ///
    /// Fails with `ConfigError::Unrecognised` / `ConfigError::Unavailable`
    /// for a bad backend name; callers treat that as fatal.
    pub fn new(config: IoManagerConfig) -> MgrResult<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    pub fn with_clock(config: IoManagerConfig, clock: Arc<dyn Clock>) -> MgrResult<Self> {
        let kind = config.resolve_backend()?;
        let helper_shared = if kind.is_completion_based() {
            Some(HelperShared::new(config.request_queue_capacity)?)
        } else {
            None
        };
        kdebug!("I/O manager backend '{}' selected", kind);
        Ok(Self {
            shared: Arc::new(ManagerShared {
                kind,
                config,
                clock,
                phase: AtomicU8::new(Phase::Uninitialized as u8),
                stopped: AtomicBool::new(false),
            }),
            helper_shared: Mutex::new(helper_shared),
            helper: Mutex::new(None),
            ports: Mutex::new(Vec::new()),
            next_cap: AtomicU32::new(0),
        })
    }

    #[inline]
    pub fn kind(&self) -> BackendKind {
        self.shared.kind
    }

    #[inline]
    pub fn config(&self) -> &IoManagerConfig {
        &self.shared.config
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Process-wide setup; starts the helper thread for completion backends
    pub fn init_process(&self) -> MgrResult<()> {
        self.shared.check_accepting()?;
        if !self.shared.transition(Phase::Uninitialized, Phase::Running) {
            return Err(match self.phase() {
                Phase::Exited => IoMgrError::NotRunning,
                _ => IoMgrError::AlreadyInitialized,
            });
        }
        if let Some(helper_shared) = lock(&self.helper_shared).clone() {
            match HelperThread::spawn(self.kind(), helper_shared, &self.shared.config) {
                Ok(h) => *lock(&self.helper) = Some(h),
                Err(e) => {
                    self.shared.transition(Phase::Running, Phase::Uninitialized);
                    kerror!("I/O manager '{}' failed to start: {}", self.kind(), e);
                    return Err(e);
                }
            }
        }
        kinfo!("I/O manager '{}' running", self.kind());
        Ok(())
    }

    /// Per-capability setup
    pub fn init_capability(&self) -> MgrResult<CapabilityIo> {
        if self.phase() == Phase::Exited {
            return Err(IoMgrError::NotRunning);
        }
        let id = CapabilityId::new(self.next_cap.fetch_add(1, Ordering::Relaxed));
        let state = match self.kind() {
            BackendKind::ReadinessPoll => {
                CapabilityIoState::ReadinessPoll(SelectState::new(Arc::clone(&self.shared.clock)))
            }
            kind @ (BackendKind::AsyncCompletionPosix | BackendKind::AsyncCompletionNative) => {
                let helper = lock(&self.helper_shared)
                    .clone()
                    .ok_or(IoMgrError::NotRunning)?;
                let port = CompletionPort::new(id)?;
                lock(&self.ports).push(Arc::downgrade(&port));
                let native = kind == BackendKind::AsyncCompletionNative;
                let c = CompletionState::new(port, helper);
                if native {
                    CapabilityIoState::AsyncCompletionNative(c)
                } else {
                    CapabilityIoState::AsyncCompletionPosix(c)
                }
            }
            BackendKind::LegacyNative => {
                return Err(ConfigError::Unavailable(BackendKind::LegacyNative.name().into()).into())
            }
        };
        kdebug!("{} I/O state ready ({})", id, self.kind());
        Ok(CapabilityIo::new(id, state, Arc::clone(&self.shared)))
    }

    /// Begin shutdown. Only the first call has any effect.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.transition(Phase::Running, Phase::Stopping);
        if let Some(h) = lock(&self.helper).as_ref() {
            h.request_shutdown();
        }
        self.wakeup();
        kinfo!("I/O manager stopping");
    }

    /// Final teardown; `wait` joins the helper thread
    ///
    /// Tolerates an earlier `stop()` and repeated calls.
    pub fn exit(&self, wait: bool) {
        self.stop();
        if let Some(mut h) = lock(&self.helper).take() {
            if wait {
                h.join();
            } else {
                h.detach();
            }
        }
        self.shared.phase.store(Phase::Exited as u8, Ordering::Release);
        kdebug!("I/O manager exited");
    }

    /// Interrupt every capability's blocking poll (no-op for `select`)
    pub fn wakeup(&self) {
        if !self.kind().is_completion_based() {
            ktrace!("wakeup: nothing to interrupt for '{}'", self.kind());
            return;
        }
        let mut ports = lock(&self.ports);
        ports.retain(|w| match w.upgrade() {
            Some(port) => {
                port.wake();
                true
            }
            None => false,
        });
    }

    /// Interrupt one capability's blocking poll; false if it is gone
    pub fn wakeup_capability(&self, id: CapabilityId) -> bool {
        let ports = lock(&self.ports);
        for port in ports.iter().filter_map(Weak::upgrade) {
            if port.capability() == id {
                port.wake();
                return true;
            }
        }
        false
    }

    /// Rebuild backend state in a fork child
    ///
    /// Helper threads do not survive `fork()`. A fresh helper and a fresh
    /// port for `survivor` are created, its pending waits are re-registered,
    /// and every other capability's port is forgotten. Handles belonging to
    /// the vanished helper are leaked rather than touched.
    pub fn reinit_after_fork(&self, survivor: &mut CapabilityIo) -> MgrResult<()> {
        if !self.kind().is_completion_based() {
            kdebug!("reinit after fork: nothing to rebuild for '{}'", self.kind());
            return Ok(());
        }
        self.rebuild_for(survivor).map_err(|e| {
            kerror!("reinit after fork failed: {}", e);
            IoMgrError::ForkReinit
        })
    }

    fn rebuild_for(&self, survivor: &mut CapabilityIo) -> MgrResult<()> {
        let fresh = HelperShared::new(self.shared.config.request_queue_capacity)?;
        let port = CompletionPort::new(survivor.id())?;

        if let Some(old) = lock(&self.helper).take() {
            old.abandon();
        }
        *lock(&self.helper_shared) = Some(Arc::clone(&fresh));
        if self.phase() == Phase::Running {
            let h = HelperThread::spawn(self.kind(), Arc::clone(&fresh), &self.shared.config)?;
            *lock(&self.helper) = Some(h);
        }

        survivor.rebind(fresh, Arc::clone(&port))?;
        *lock(&self.ports) = vec![Arc::downgrade(&port)];
        kinfo!(
            "I/O manager rebuilt after fork: {} waits re-registered on {}",
            survivor.pending_io() + survivor.pending_timers(),
            survivor.id()
        );
        Ok(())
    }
}

impl Drop for IoManager {
    fn drop(&mut self) {
        self.exit(true);
    }
}

impl std::fmt::Debug for IoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoManager")
            .field("kind", &self.kind())
            .field("phase", &self.phase())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Report an unrecoverable I/O manager error and terminate the process
pub fn fatal(context: &str, err: &IoMgrError) -> ! {
    eprintln!("iomgr: fatal: {}: {}", context, err);
    std::process::exit(1)
}
