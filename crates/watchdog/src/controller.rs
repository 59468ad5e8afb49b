// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::bridge::HostBridge;
use crate::config::WatchdogConfig;
use crate::error::WatchdogError;
use crate::gate::{PosixSignals, SignalBackend};
use crate::locator::{DiagnosticThreadRef, SignalCatcherLocator};
use crate::wake::WakeSemaphore;
use crate::worker::{LoopStats, WatchdogLoop};

/// Everything guarded by the controller lock.
#[derive(Default)]
pub(crate) struct ControllerState {
    pub(crate) enabled: bool,
    pub(crate) bridge: Option<HostBridge>,
    wake: Option<Arc<WakeSemaphore>>,
    worker: Option<JoinHandle<()>>,
    handler_installed: bool,
}

/// State shared between the controller and the watchdog thread.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<ControllerState>,
    /// Written once under `state` during enable, read lock-free afterwards.
    pub(crate) target: OnceLock<DiagnosticThreadRef>,
    pub(crate) stats: LoopStats,
}

/// Point-in-time view of the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogStatus {
    pub enabled: bool,
    /// Worker running and handler installed.
    pub armed: bool,
    pub diagnostic_thread: Option<DiagnosticThreadRef>,
    pub detections: u64,
    pub notified: u64,
    pub dropped: u64,
    pub forwarded: u64,
}

/// The ANR watchdog. One armed instance per process; see [`AnrWatchdog::global`].
pub struct AnrWatchdog {
    config: WatchdogConfig,
    signals: Arc<dyn SignalBackend>,
    shared: Arc<Shared>,
}

static GLOBAL: OnceLock<AnrWatchdog> = OnceLock::new();

impl AnrWatchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        let signals = Arc::new(PosixSignals::new(config.signal));
        Self::with_backend(config, signals)
    }

    pub fn with_backend(config: WatchdogConfig, signals: Arc<dyn SignalBackend>) -> Self {
        Self { config, signals, shared: Arc::new(Shared::default()) }
    }

    /// The process-wide watchdog, created with default settings on first use
    /// unless [`AnrWatchdog::configure_global`] ran first.
    pub fn global() -> &'static AnrWatchdog {
        GLOBAL.get_or_init(|| AnrWatchdog::new(WatchdogConfig::default()))
    }

    /// Create the process-wide watchdog with `config`. Fails if it already
    /// exists.
    pub fn configure_global(config: WatchdogConfig) -> anyhow::Result<&'static AnrWatchdog> {
        config.validate().context(WatchdogError::InvalidConfig)?;
        let mut created = false;
        let watchdog = GLOBAL.get_or_init(|| {
            created = true;
            AnrWatchdog::new(config)
        });
        if !created {
            anyhow::bail!("global ANR watchdog already initialized");
        }
        Ok(watchdog)
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Turn detection on and bind `bridge` as the notification target.
    ///
    /// The first successful call spawns the watchdog thread and installs the
    /// handler; later calls only re-bind the bridge and set the flag.
    pub fn enable(&self, bridge: HostBridge) -> bool {
        match self.try_enable(bridge) {
            Ok(()) => {
                info!(signal = self.config.signal.as_str(), "ANR watchdog enabled");
                true
            }
            Err(e) => {
                error!("failed to enable ANR watchdog: {e:#}");
                false
            }
        }
    }

    fn try_enable(&self, bridge: HostBridge) -> anyhow::Result<()> {
        self.config.validate().context(WatchdogError::InvalidConfig)?;

        // Scan /proc before taking the lock; only the result is written under it.
        let located = match self.shared.target.get() {
            Some(_) => None,
            None => {
                let found = SignalCatcherLocator::from_config(&self.config).locate();
                if found.is_none() {
                    warn!("signal catcher not found, ANR dumps may be lost after detection");
                }
                found
            }
        };

        let mut state = self.shared.state.lock();
        state.bridge = Some(bridge);
        if let Some(target) = located {
            let _ = self.shared.target.set(target);
        }

        let wake = match &state.wake {
            Some(wake) => Arc::clone(wake),
            None => {
                let wake = Arc::new(WakeSemaphore::new()?);
                state.wake = Some(Arc::clone(&wake));
                wake
            }
        };

        if state.worker.is_none() {
            let worker =
                WatchdogLoop::new(Arc::clone(&wake), Arc::clone(&self.signals), Arc::clone(&self.shared));
            state.worker = Some(worker.spawn(&self.config.worker_thread_name)?);
        }

        if !state.handler_installed {
            // On failure the worker stays parked on the wake and is reused
            // by the next enable.
            self.signals.install(Arc::clone(&wake))?;
            state.handler_installed = true;
        }

        self.signals.unblock();
        state.enabled = true;
        Ok(())
    }

    /// Stop notifying the host. The thread and handler stay in place.
    pub fn disable(&self) {
        self.shared.state.lock().enabled = false;
        info!("ANR watchdog disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.state.lock().enabled
    }

    pub fn status(&self) -> WatchdogStatus {
        let (enabled, armed) = {
            let state = self.shared.state.lock();
            (state.enabled, state.handler_installed && state.worker.is_some())
        };
        let stats = &self.shared.stats;
        WatchdogStatus {
            enabled,
            armed,
            diagnostic_thread: self.shared.target.get().copied(),
            detections: stats.detections.load(Ordering::Relaxed),
            notified: stats.notified.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            forwarded: stats.forwarded.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
