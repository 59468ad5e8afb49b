// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fakes for the signal backend and the host
//! side, a fake `/proc` tree, and polling helpers.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::bridge::{AnrListener, HostRuntime, ThreadState};
use crate::config::WatchdogConfig;
use crate::gate::SignalBackend;
use crate::locator::DiagnosticThreadRef;
use crate::wake::WakeSemaphore;

/// Poll `cond` every few milliseconds until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = format!("{err:#}");
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Listener that records every timestamp it receives.
#[derive(Default)]
pub struct RecordingListener {
    timestamps: Mutex<Vec<i64>>,
    fail: AtomicBool,
    panic: AtomicBool,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Return `Err` from subsequent calls (after recording).
    pub fn fail_with_error(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Panic in subsequent calls (after recording).
    pub fn fail_with_panic(&self, panic: bool) {
        self.panic.store(panic, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.timestamps.lock().len()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.timestamps.lock().clone()
    }
}

impl AnrListener for RecordingListener {
    #[allow(clippy::panic)]
    fn on_anr_detected(&self, timestamp_ms: i64) -> anyhow::Result<()> {
        self.timestamps.lock().push(timestamp_ms);
        if self.panic.load(Ordering::SeqCst) {
            panic!("listener asked to panic");
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("listener asked to fail");
        }
        Ok(())
    }
}

/// Host runtime that tracks membership per thread.
pub struct FakeRuntime {
    members: Mutex<Vec<std::thread::ThreadId>>,
    unsupported: AtomicBool,
    refuse_attach: AtomicBool,
    attaches: AtomicU64,
    detaches: AtomicU64,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(Vec::new()),
            unsupported: AtomicBool::new(false),
            refuse_attach: AtomicBool::new(false),
            attaches: AtomicU64::new(0),
            detaches: AtomicU64::new(0),
        })
    }

    /// Mark the calling thread as a member without going through attach.
    pub fn adopt_current_thread(&self) {
        self.members.lock().push(std::thread::current().id());
    }

    pub fn set_unsupported(&self, unsupported: bool) {
        self.unsupported.store(unsupported, Ordering::SeqCst);
    }

    pub fn refuse_attach(&self, refuse: bool) {
        self.refuse_attach.store(refuse, Ordering::SeqCst);
    }

    pub fn attaches(&self) -> u64 {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> u64 {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl HostRuntime for FakeRuntime {
    fn thread_state(&self) -> ThreadState {
        if self.unsupported.load(Ordering::SeqCst) {
            return ThreadState::Unsupported;
        }
        if self.members.lock().contains(&std::thread::current().id()) {
            ThreadState::Attached
        } else {
            ThreadState::Detached
        }
    }

    fn attach_current_thread(&self) -> anyhow::Result<()> {
        if self.refuse_attach.load(Ordering::SeqCst) {
            anyhow::bail!("runtime refused attach");
        }
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.adopt_current_thread();
        Ok(())
    }

    fn detach_current_thread(&self) {
        let id = std::thread::current().id();
        self.members.lock().retain(|member| *member != id);
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

/// Signal backend that records calls instead of touching the OS. `raise`
/// plays the part of the installed handler.
pub struct FakeSignals {
    signal: Signal,
    wake: Mutex<Option<Arc<WakeSemaphore>>>,
    fail_install: AtomicBool,
    fail_forward: AtomicBool,
    installs: AtomicU64,
    blocks: AtomicU64,
    unblocks: AtomicU64,
    forwards: Mutex<Vec<DiagnosticThreadRef>>,
}

impl FakeSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            signal: Signal::SIGQUIT,
            wake: Mutex::new(None),
            fail_install: AtomicBool::new(false),
            fail_forward: AtomicBool::new(false),
            installs: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            unblocks: AtomicU64::new(0),
            forwards: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_install(&self, fail: bool) {
        self.fail_install.store(fail, Ordering::SeqCst);
    }

    pub fn fail_forward(&self, fail: bool) {
        self.fail_forward.store(fail, Ordering::SeqCst);
    }

    /// Simulate delivery of the liveness signal. Returns `false` when no
    /// handler is installed.
    pub fn raise(&self) -> bool {
        let wake = self.wake.lock().clone();
        match wake {
            Some(wake) => {
                self.block();
                wake.post()
            }
            None => false,
        }
    }

    pub fn installs(&self) -> u64 {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::SeqCst)
    }

    pub fn unblocks(&self) -> u64 {
        self.unblocks.load(Ordering::SeqCst)
    }

    pub fn forwards(&self) -> Vec<DiagnosticThreadRef> {
        self.forwards.lock().clone()
    }
}

impl SignalBackend for FakeSignals {
    fn signal(&self) -> Signal {
        self.signal
    }

    fn install(&self, wake: Arc<WakeSemaphore>) -> anyhow::Result<()> {
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(anyhow::Error::new(crate::error::WatchdogError::HandlerInstall));
        }
        self.installs.fetch_add(1, Ordering::SeqCst);
        *self.wake.lock() = Some(wake);
        Ok(())
    }

    fn block(&self) {
        self.blocks.fetch_add(1, Ordering::SeqCst);
    }

    fn unblock(&self) {
        self.unblocks.fetch_add(1, Ordering::SeqCst);
    }

    fn forward(&self, target: DiagnosticThreadRef) -> anyhow::Result<()> {
        if self.fail_forward.load(Ordering::SeqCst) {
            anyhow::bail!("tgkill refused");
        }
        self.forwards.lock().push(target);
        Ok(())
    }
}

/// Temporary directory laid out like `/proc/<pid>/task/<tid>/{comm,status}`.
pub struct FakeProcTree {
    dir: TempDir,
    pid: i32,
}

impl FakeProcTree {
    pub fn new(pid: i32) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join(pid.to_string()).join("task"))?;
        Ok(Self { dir, pid })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Add a thread whose status reports `sigblk` (hex) as its blocked mask.
    pub fn thread(self, tid: i32, comm: &str, sigblk: &str) -> anyhow::Result<Self> {
        let status = format!(
            "Name:\t{comm}\nState:\tS (sleeping)\nTgid:\t{pid}\nPid:\t{tid}\n\
             SigQ:\t0/31079\nSigPnd:\t0000000000000000\nShdPnd:\t0000000000000000\n\
             SigBlk:\t{sigblk}\nSigIgn:\t0000000000001000\nSigCgt:\t0000000000000000\n",
            pid = self.pid
        );
        self.raw_thread(tid, Some(&format!("{comm}\n")), Some(&status))
    }

    /// Add a thread directory with the given files; `None` leaves a file out.
    pub fn raw_thread(
        self,
        tid: i32,
        comm: Option<&str>,
        status: Option<&str>,
    ) -> anyhow::Result<Self> {
        let dir = self.task_dir().join(tid.to_string());
        fs::create_dir_all(&dir)?;
        if let Some(comm) = comm {
            fs::write(dir.join("comm"), comm)?;
        }
        if let Some(status) = status {
            fs::write(dir.join("status"), status)?;
        }
        Ok(self)
    }

    /// Config pointing at this tree for `signal`.
    pub fn config(&self, signal: Signal) -> WatchdogConfig {
        WatchdogConfig { signal, proc_root: self.root().to_path_buf(), ..Default::default() }
    }

    fn task_dir(&self) -> std::path::PathBuf {
        self.dir.path().join(self.pid.to_string()).join("task")
    }
}

/// Hex mask with only `signal`'s bit set, formatted like the kernel does.
pub fn mask_hex(signal: Signal) -> String {
    format!("{:016x}", 1u64 << (signal as i32 - 1))
}
