// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tracing::{error, info, warn};

use crate::bridge::{NotificationBridge, NotifyOutcome};
use crate::controller::Shared;
use crate::error::WatchdogError;
use crate::gate::{self, SignalBackend};
use crate::wake::WakeSemaphore;

/// Pause before waiting again after the wake pipe itself failed.
const WAIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Counters updated by the watchdog thread. A controller spawns at most one
/// worker, so there is a single writer.
#[derive(Debug, Default)]
pub struct LoopStats {
    pub detections: AtomicU64,
    pub notified: AtomicU64,
    pub dropped: AtomicU64,
    pub forwarded: AtomicU64,
}

/// Outcome of a single handling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub timestamp_ms: i64,
    pub outcome: NotifyOutcome,
    pub forwarded: bool,
}

/// Milliseconds since the Unix epoch, or -1 if the clock is before it.
pub fn epoch_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        Err(_) => -1,
    }
}

/// The dedicated watchdog thread: idle on the wake semaphore, then
/// timestamp, notify, forward and re-arm.
pub(crate) struct WatchdogLoop {
    wake: Arc<WakeSemaphore>,
    signals: Arc<dyn SignalBackend>,
    shared: Arc<Shared>,
    notifier: NotificationBridge,
}

impl WatchdogLoop {
    pub(crate) fn new(
        wake: Arc<WakeSemaphore>,
        signals: Arc<dyn SignalBackend>,
        shared: Arc<Shared>,
    ) -> Self {
        let notifier = NotificationBridge::new(Arc::clone(&shared));
        Self { wake, signals, shared, notifier }
    }

    pub(crate) fn spawn(self, name: &str) -> anyhow::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || self.run())
            .context(WatchdogError::ThreadSpawn)
    }

    fn run(self) {
        info!(signal = self.signals.signal().as_str(), "ANR watchdog thread started");
        loop {
            if let Err(e) = self.wake.wait() {
                error!("failed to wait for wake, ANR detection stalled: {e:#}");
                thread::sleep(WAIT_RETRY_DELAY);
                continue;
            }
            self.handle_wake();
        }
    }

    /// One Handling pass. Every step after the timestamp runs regardless of
    /// how notification went; the final unblock is unconditional.
    pub(crate) fn handle_wake(&self) -> Detection {
        let timestamp_ms = epoch_millis();
        let stats = &self.shared.stats;
        stats.detections.fetch_add(1, Ordering::Relaxed);

        let failures = gate::take_handler_failures() + self.wake.take_post_failures();
        if failures > 0 {
            warn!(failures, "liveness handler failed to block or post");
        }

        let outcome = self.notifier.notify(timestamp_ms);
        match outcome {
            NotifyOutcome::Delivered => stats.notified.fetch_add(1, Ordering::Relaxed),
            _ => stats.dropped.fetch_add(1, Ordering::Relaxed),
        };

        let forwarded = match self.shared.target.get() {
            Some(target) => match self.signals.forward(*target) {
                Ok(()) => {
                    stats.forwarded.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(e) => {
                    error!(tid = target.tid.as_raw(), "failed to forward liveness signal: {e:#}");
                    false
                }
            },
            None => {
                warn!("signal catcher thread unknown, liveness signal not forwarded");
                false
            }
        };

        self.signals.unblock();
        Detection { timestamp_ms, outcome, forwarded }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
