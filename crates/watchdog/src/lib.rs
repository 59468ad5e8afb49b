// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal-driven ANR watchdog.
//!
//! The OS reports an unresponsive app by sending the liveness signal
//! (`SIGQUIT` on Android) to the process, where the runtime's own
//! "Signal Catcher" thread normally picks it up and writes a thread dump.
//! This crate intercepts that signal, hands the detection to a dedicated
//! watchdog thread, notifies the host, and then re-targets the signal at the
//! catcher thread so the OS-side dump still happens.

#![cfg(any(target_os = "linux", target_os = "android"))]

pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod locator;
pub mod logging;
pub mod test_support;
pub mod wake;
pub mod worker;

pub use bridge::{AnrListener, HostBridge, HostRuntime, ThreadState};
pub use config::{LogConfig, LogFormat, WatchdogConfig};
pub use controller::{AnrWatchdog, WatchdogStatus};
pub use error::WatchdogError;
pub use locator::DiagnosticThreadRef;

/// Enable ANR detection on the process-wide watchdog.
///
/// Returns `false` if the worker thread or the signal handler could not be
/// set up. A missing catcher thread is not a failure.
pub fn enable_anr_watchdog(bridge: HostBridge) -> bool {
    AnrWatchdog::global().enable(bridge)
}

/// Stop forwarding detections to the host. Always succeeds.
pub fn disable_anr_watchdog() {
    AnrWatchdog::global().disable();
}
