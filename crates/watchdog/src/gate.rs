// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{debug, error};

use crate::error::WatchdogError;
use crate::locator::DiagnosticThreadRef;
use crate::wake::WakeSemaphore;

/// OS signal plumbing used by the controller and the watchdog loop.
pub trait SignalBackend: Send + Sync {
    /// The liveness signal this backend manages.
    fn signal(&self) -> Signal;

    /// Install the process-wide handler that posts `wake` on delivery.
    fn install(&self, wake: Arc<WakeSemaphore>) -> anyhow::Result<()>;

    /// Add the liveness signal to the calling thread's mask.
    fn block(&self);

    /// Remove the liveness signal from the calling thread's mask.
    fn unblock(&self);

    /// Re-raise the liveness signal at one specific thread.
    fn forward(&self, target: DiagnosticThreadRef) -> anyhow::Result<()>;
}

/// Wake posted by the installed handler. Set once, before `sigaction`, so the
/// handler only ever does an atomic load to find it.
static HANDLER_WAKE: OnceLock<Arc<WakeSemaphore>> = OnceLock::new();

/// Handler-side failures, drained and logged by the watchdog thread.
static HANDLER_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Real backend: `sigaction`, `pthread_sigmask` and `tgkill`.
#[derive(Debug, Clone, Copy)]
pub struct PosixSignals {
    signal: Signal,
}

impl PosixSignals {
    pub fn new(signal: Signal) -> Self {
        Self { signal }
    }
}

fn liveness_set(signal: Signal) -> SigSet {
    let mut set = SigSet::empty();
    set.add(signal);
    set
}

impl SignalBackend for PosixSignals {
    fn signal(&self) -> Signal {
        self.signal
    }

    // sigaction is unsafe: it replaces process-wide signal disposition
    #[allow(unsafe_code)]
    fn install(&self, wake: Arc<WakeSemaphore>) -> anyhow::Result<()> {
        let slot = HANDLER_WAKE.get_or_init(|| Arc::clone(&wake));
        if !Arc::ptr_eq(slot, &wake) {
            return Err(anyhow::Error::new(WatchdogError::HandlerOwned)
                .context("liveness handler already posts to another watchdog"));
        }

        let action = SigAction::new(
            SigHandler::SigAction(handle_liveness_signal),
            SaFlags::SA_SIGINFO,
            SigSet::empty(),
        );
        // SAFETY: the handler only touches a OnceLock, atomics, the saved
        // signal mask in its ucontext and write(2), all async-signal-safe.
        unsafe { sigaction(self.signal, &action) }
            .with_context(|| format!("sigaction({}) failed", self.signal.as_str()))
            .context(WatchdogError::HandlerInstall)?;
        debug!(signal = self.signal.as_str(), "liveness handler installed");
        Ok(())
    }

    fn block(&self) {
        if let Err(e) = liveness_set(self.signal).thread_block() {
            error!(signal = self.signal.as_str(), "failed to block liveness signal: {e}");
        }
    }

    fn unblock(&self) {
        if let Err(e) = liveness_set(self.signal).thread_unblock() {
            error!(signal = self.signal.as_str(), "failed to unblock liveness signal: {e}");
        }
    }

    // tgkill has no safe wrapper in nix
    #[allow(unsafe_code)]
    fn forward(&self, target: DiagnosticThreadRef) -> anyhow::Result<()> {
        // SAFETY: tgkill only reads its three integer arguments.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_tgkill,
                target.pid.as_raw(),
                target.tid.as_raw(),
                self.signal as libc::c_int,
            )
        };
        Errno::result(rc).map(drop).with_context(|| {
            format!(
                "tgkill({}, {}, {}) failed",
                target.pid,
                target.tid,
                self.signal.as_str()
            )
        })
    }
}

/// Runs on whichever thread the kernel picked, interrupting arbitrary code.
/// Keeps the signal blocked on that thread until the watchdog has forwarded
/// it, then wakes the watchdog. errno is preserved for the interrupted code.
///
/// The kernel restores the mask saved in `context` on return, so the block
/// goes there; `pthread_sigmask` from inside the handler would be undone.
// sigaddset on the kernel-provided ucontext
#[allow(unsafe_code)]
extern "C" fn handle_liveness_signal(
    sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    context: *mut libc::c_void,
) {
    let saved_errno = Errno::last_raw();

    let blocked = !context.is_null() && {
        // SAFETY: with SA_SIGINFO the third argument points at the
        // ucontext_t of the interrupted thread, valid for the handler's
        // duration. sigaddset is async-signal-safe.
        let rc = unsafe {
            libc::sigaddset(&mut (*context.cast::<libc::ucontext_t>()).uc_sigmask, sig)
        };
        rc == 0
    };
    let posted = HANDLER_WAKE.get().is_some_and(|wake| wake.post());
    if !blocked || !posted {
        HANDLER_FAILURES.fetch_add(1, Ordering::Relaxed);
    }

    Errno::set_raw(saved_errno);
}

/// Number of handler invocations that failed to block or post since the
/// last call.
pub fn take_handler_failures() -> u64 {
    HANDLER_FAILURES.swap(0, Ordering::Relaxed)
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
