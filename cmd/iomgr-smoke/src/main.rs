//! I/O Manager End-to-End Smoke Test
//!
//! Drives one capability through the selected backend:
//!   Part A — Lifecycle: init_process, init_capability, double init
//!   Part B — Readiness then delay: a pipe becomes readable before a 50ms sleep ends
//!   Part C — Cancel before poll: a cancelled readiness wait never resolves
//!   Part D — Shutdown: stop is idempotent, waits are refused afterwards
//!
//! Run: ./target/release/iomgr-smoke [--io-manager=NAME] [--non-threaded]
//! IOMGR_* environment variables are honoured; flags override them.

use iomgr::{
    BackendKind, BackendSet, CancelOutcome, CapabilityIo, ConfigError, Direction, IoManager,
    IoManagerConfig, IoMgrError, Threading, ThreadId,
};

use nix::unistd::{pipe, write};

use std::os::fd::{AsRawFd, OwnedFd};
use std::thread;
use std::time::{Duration, Instant};

const READER: ThreadId = ThreadId::new(1);
const SLEEPER: ThreadId = ThreadId::new(2);
const CANCELLED: ThreadId = ThreadId::new(3);

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ── Command line ──

struct Args {
    backend: Option<String>,
    threading: Option<Threading>,
}

fn usage(threading: Threading) {
    println!("usage: iomgr-smoke [--io-manager=NAME] [--threaded|--non-threaded]");
    println!("  --io-manager=NAME   {}", BackendSet::new(threading).usage());
}

fn parse_args(default_threading: Threading) -> Args {
    let mut args = Args { backend: None, threading: None };
    for arg in std::env::args().skip(1) {
        if let Some(name) = arg.strip_prefix("--io-manager=") {
            args.backend = Some(name.to_string());
        } else if arg == "--threaded" {
            args.threading = Some(Threading::Threaded);
        } else if arg == "--non-threaded" {
            args.threading = Some(Threading::NonThreaded);
        } else if arg == "--help" || arg == "-h" {
            usage(args.threading.unwrap_or(default_threading));
            std::process::exit(0);
        } else {
            eprintln!("iomgr-smoke: unknown argument '{}'", arg);
            usage(args.threading.unwrap_or(default_threading));
            std::process::exit(2);
        }
    }
    args
}

/// Blocking polls until `want` shows up or `limit` passes
fn poll_until(cap: &mut CapabilityIo, want: ThreadId, limit: Duration) -> Result<Vec<ThreadId>, IoMgrError> {
    let start = Instant::now();
    let mut seen = Vec::new();
    while !seen.contains(&want) && start.elapsed() < limit {
        seen.extend(cap.poll_once(true)?);
    }
    Ok(seen)
}

// ── Part A: lifecycle ──

fn test_lifecycle(t: &mut TestRunner, mgr: &IoManager) -> Option<CapabilityIo> {
    t.section("Part A: Lifecycle");

    match mgr.init_process() {
        Ok(()) => t.pass("init_process"),
        Err(e) => {
            t.fail("init_process", &e.to_string());
            return None;
        }
    }
    t.check(
        "init_process twice is rejected",
        mgr.init_process() == Err(IoMgrError::AlreadyInitialized),
        "second init accepted",
    );

    match mgr.init_capability() {
        Ok(cap) => {
            t.check("capability uses selected backend", cap.kind() == mgr.kind(), "kind mismatch");
            t.check("new capability has no pending work", !cap.has_pending_work(), "pending work");
            Some(cap)
        }
        Err(e) => {
            t.fail("init_capability", &e.to_string());
            None
        }
    }
}

// ── Part B: readiness resolves before a longer delay ──

fn test_readiness_then_delay(t: &mut TestRunner, cap: &mut CapabilityIo) {
    t.section("Part B: Readiness then delay");

    let (r, w) = match pipe() {
        Ok(p) => p,
        Err(e) => {
            t.fail("pipe", &e.to_string());
            return;
        }
    };

    let start = Instant::now();
    let registered = cap
        .wait_for_readiness(READER, Direction::Read, r.as_raw_fd())
        .and_then(|()| cap.wait_for_delay(SLEEPER, 50_000));
    if let Err(e) = registered {
        t.fail("register readiness + delay", &e.to_string());
        return;
    }
    t.pass("register readiness + delay");
    t.check("two waits pending", cap.pending_io() == 1 && cap.pending_timers() == 1, "counts off");

    let writer = thread::spawn(move || -> OwnedFd {
        thread::sleep(Duration::from_millis(10));
        let _ = write(&w, b"ready");
        w
    });

    match poll_until(cap, READER, Duration::from_millis(45)) {
        Ok(first) => {
            t.check("reader wakes first", first.contains(&READER), &format!("got {:?}", first));
            t.check("sleeper still asleep", !first.contains(&SLEEPER), "woke early");
        }
        Err(e) => t.fail("first poll", &e.to_string()),
    }
    let _w = writer.join();

    match poll_until(cap, SLEEPER, Duration::from_secs(2)) {
        Ok(second) => {
            t.check("sleeper wakes after delay", second.contains(&SLEEPER), &format!("got {:?}", second));
            t.check("reader not woken twice", !second.contains(&READER), "duplicate wakeup");
            t.check(
                "delay respected",
                start.elapsed() >= Duration::from_millis(50),
                &format!("{:?}", start.elapsed()),
            );
        }
        Err(e) => t.fail("second poll", &e.to_string()),
    }
    t.check("nothing left pending", !cap.has_pending_work(), "pending work");
}

// ── Part C: cancel before the first poll ──

fn test_cancel_before_poll(t: &mut TestRunner, cap: &mut CapabilityIo) {
    t.section("Part C: Cancel before poll");

    let (r, w) = match pipe() {
        Ok(p) => p,
        Err(e) => {
            t.fail("pipe", &e.to_string());
            return;
        }
    };

    if let Err(e) = cap.wait_for_readiness(CANCELLED, Direction::Read, r.as_raw_fd()) {
        t.fail("register readiness", &e.to_string());
        return;
    }
    t.check(
        "cancel reports Cancelled",
        cap.cancel_readiness_wait(CANCELLED) == CancelOutcome::Cancelled,
        "not cancelled",
    );
    t.check("pending_io empty", cap.pending_io() == 0, "entry left behind");
    t.check(
        "second cancel reports NotWaiting",
        cap.cancel_readiness_wait(CANCELLED) == CancelOutcome::NotWaiting,
        "cancelled twice",
    );

    let _ = write(&w, b"late");
    thread::sleep(Duration::from_millis(20));
    let mut woken = Vec::new();
    for _ in 0..3 {
        match cap.poll_once(false) {
            Ok(v) => woken.extend(v),
            Err(e) => {
                t.fail("non-blocking poll", &e.to_string());
                return;
            }
        }
    }
    t.check("cancelled thread never wakes", !woken.contains(&CANCELLED), &format!("got {:?}", woken));
}

// ── Part D: shutdown ──

fn test_shutdown(t: &mut TestRunner, mgr: &IoManager, cap: &mut CapabilityIo) {
    t.section("Part D: Shutdown");

    for _ in 0..3 {
        mgr.stop();
    }
    t.check("stop is idempotent", mgr.is_stopped(), "not stopped");
    t.check(
        "waits refused after stop",
        cap.wait_for_delay(SLEEPER, 1_000) == Err(IoMgrError::Stopped),
        "wait accepted",
    );

    mgr.exit(true);
    t.check("exit joins helpers", mgr.phase() == iomgr::Phase::Exited, "not exited");
}

fn main() {
    let mut config = IoManagerConfig::from_env();
    let args = parse_args(config.threading);

    if let Some(threading) = args.threading {
        config = config.threading(threading);
    }
    let threading = config.threading;
    if let Some(name) = args.backend {
        config = config.backend(name);
    }

    let mgr = match IoManager::new(config) {
        Ok(m) => m,
        Err(IoMgrError::Config(e @ (ConfigError::Unavailable(_) | ConfigError::Unrecognised(_)))) => {
            eprintln!("iomgr-smoke: {}", e);
            usage(threading);
            std::process::exit(2);
        }
        Err(e) => iomgr::fatal("iomgr-smoke", &e),
    };

    println!("=== I/O Manager End-to-End Smoke Test ===");
    println!(
        "    backend: {} ({})",
        mgr.kind(),
        if mgr.kind() == BackendKind::ReadinessPoll { "per-capability poll" } else { "helper thread" }
    );
    mgr.config().print();

    let mut t = TestRunner::new();

    let Some(mut cap) = test_lifecycle(&mut t, &mgr) else {
        t.summary();
        std::process::exit(1);
    };
    test_readiness_then_delay(&mut t, &mut cap);
    test_cancel_before_poll(&mut t, &mut cap);
    test_shutdown(&mut t, &mgr, &mut cap);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
