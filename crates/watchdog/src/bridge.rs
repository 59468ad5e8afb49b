// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error};

use crate::controller::Shared;
use crate::error::WatchdogError;

/// The host's single notification entry point.
///
/// Called from the watchdog thread, possibly many times, and possibly from a
/// thread the host has never seen before.
pub trait AnrListener: Send + Sync {
    fn on_anr_detected(&self, timestamp_ms: i64) -> anyhow::Result<()>;
}

impl<F> AnrListener for F
where
    F: Fn(i64) -> anyhow::Result<()> + Send + Sync,
{
    fn on_anr_detected(&self, timestamp_ms: i64) -> anyhow::Result<()> {
        self(timestamp_ms)
    }
}

/// Membership of the calling thread in the host's managed runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Attached,
    Detached,
    /// The runtime refused the query, e.g. an interface version mismatch.
    Unsupported,
}

/// Managed runtime (a VM, an interpreter) that threads must join before
/// calling into host code.
pub trait HostRuntime: Send + Sync {
    fn thread_state(&self) -> ThreadState;
    fn attach_current_thread(&self) -> anyhow::Result<()>;
    fn detach_current_thread(&self);
}

/// Host callback target, plus the runtime it lives in if any.
#[derive(Clone)]
pub struct HostBridge {
    listener: Arc<dyn AnrListener>,
    runtime: Option<Arc<dyn HostRuntime>>,
}

impl HostBridge {
    /// Host code callable from any native thread.
    pub fn native(listener: Arc<dyn AnrListener>) -> Self {
        Self { listener, runtime: None }
    }

    /// Host code that requires the caller to be attached to `runtime`.
    pub fn managed(listener: Arc<dyn AnrListener>, runtime: Arc<dyn HostRuntime>) -> Self {
        Self { listener, runtime: Some(runtime) }
    }
}

impl fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBridge").field("managed", &self.runtime.is_some()).finish()
    }
}

/// Result of one notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    Disabled,
    Unbound,
    AttachFailed,
    CallbackFailed,
}

/// Record that this thread attached itself. Dropped by the thread-local
/// destructor when the thread exits, which detaches it again.
struct RuntimeAttachment {
    runtime: Arc<dyn HostRuntime>,
}

impl Drop for RuntimeAttachment {
    fn drop(&mut self) {
        self.runtime.detach_current_thread();
    }
}

thread_local! {
    static ATTACHMENT: RefCell<Option<RuntimeAttachment>> = const { RefCell::new(None) };
}

/// Make sure the calling thread may call into `runtime`. Threads that were
/// already members are left alone and never detached by us.
fn ensure_attached(runtime: &Arc<dyn HostRuntime>) -> anyhow::Result<()> {
    match runtime.thread_state() {
        ThreadState::Attached => Ok(()),
        ThreadState::Unsupported => Err(anyhow::Error::new(WatchdogError::RuntimeVersion)),
        ThreadState::Detached => {
            runtime.attach_current_thread().context(WatchdogError::RuntimeAttach)?;
            let previous = ATTACHMENT.with(|slot| {
                let mut slot = slot.borrow_mut();
                let same = slot.as_ref().is_some_and(|a| Arc::ptr_eq(&a.runtime, runtime));
                if same {
                    None
                } else {
                    slot.replace(RuntimeAttachment { runtime: Arc::clone(runtime) })
                }
            });
            // Detach from a runtime we no longer report to.
            drop(previous);
            debug!("attached watchdog thread to host runtime");
            Ok(())
        }
    }
}

/// Forwards detections across the host boundary, subject to the enabled
/// flag and the currently bound bridge.
pub(crate) struct NotificationBridge {
    shared: Arc<Shared>,
}

impl NotificationBridge {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn notify(&self, timestamp_ms: i64) -> NotifyOutcome {
        // Lock only long enough to read the flag and clone the handle.
        let bridge = {
            let state = self.shared.state.lock();
            if !state.enabled {
                debug!(timestamp_ms, "ANR watchdog disabled, discarding detected ANR");
                return NotifyOutcome::Disabled;
            }
            match &state.bridge {
                Some(bridge) => bridge.clone(),
                None => {
                    error!(timestamp_ms, "no host bridge registered");
                    return NotifyOutcome::Unbound;
                }
            }
        };

        if let Some(runtime) = &bridge.runtime {
            if let Err(e) = ensure_attached(runtime) {
                error!(timestamp_ms, "cannot reach host runtime: {e:#}");
                return NotifyOutcome::AttachFailed;
            }
        }

        debug!(timestamp_ms, "ANR detected, notifying host");
        let listener = Arc::clone(&bridge.listener);
        match catch_unwind(AssertUnwindSafe(|| listener.on_anr_detected(timestamp_ms))) {
            Ok(Ok(())) => NotifyOutcome::Delivered,
            Ok(Err(e)) => {
                let e = e.context(WatchdogError::HostCallback);
                error!(timestamp_ms, "host notification failed: {e:#}");
                NotifyOutcome::CallbackFailed
            }
            Err(_) => {
                error!(timestamp_ms, "{}: host notification panicked", WatchdogError::HostCallback);
                NotifyOutcome::CallbackFailed
            }
        }
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
