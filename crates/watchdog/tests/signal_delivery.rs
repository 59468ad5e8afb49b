// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end run against real signals. A thread named "Signal Catcher"
//! stands in for the runtime's dump thread: it keeps SIGUSR2 blocked and
//! collects forwarded copies with `sigwait`.
//!
//! Installing the handler is process-wide, so this file holds one test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, raise, SigSet, Signal};
use nix::unistd::{gettid, Pid};

use anr_watchdog::locator::{is_signal_in_mask, parse_blocked_mask};
use anr_watchdog::test_support::{wait_for, RecordingListener};
use anr_watchdog::worker::epoch_millis;
use anr_watchdog::{AnrWatchdog, HostBridge, WatchdogConfig};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Catcher {
    tid: Pid,
    received: Arc<AtomicU64>,
    start: mpsc::Sender<()>,
}

/// Spawn the stand-in catcher. It parks on a channel until `start` fires so
/// that discovery sees SIGUSR2 in its blocked mask, then loops in `sigwait`.
fn spawn_catcher() -> anyhow::Result<Catcher> {
    let (tid_tx, tid_rx) = mpsc::channel();
    let (start_tx, start_rx) = mpsc::channel::<()>();
    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);

    thread::Builder::new().name("Signal Catcher".to_owned()).spawn(move || {
        let mut set = SigSet::empty();
        set.add(Signal::SIGUSR2);
        if set.thread_block().is_err() {
            return;
        }
        if tid_tx.send(gettid()).is_err() || start_rx.recv().is_err() {
            return;
        }
        while set.wait().is_ok() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })?;

    let tid = tid_rx.recv_timeout(TIMEOUT)?;
    Ok(Catcher { tid, received, start: start_tx })
}

fn current_thread_blocks(signal: Signal) -> anyhow::Result<bool> {
    let status = std::fs::read_to_string(format!("/proc/self/task/{}/status", gettid()))?;
    let mask =
        parse_blocked_mask(&status).ok_or_else(|| anyhow::anyhow!("no SigBlk line in status"))?;
    Ok(is_signal_in_mask(mask, signal))
}

fn detections(watchdog: &AnrWatchdog) -> u64 {
    watchdog.status().detections
}

#[test]
fn liveness_signal_round_trip() -> anyhow::Result<()> {
    let catcher = spawn_catcher()?;
    let config = WatchdogConfig { signal: Signal::SIGUSR2, ..Default::default() };
    let watchdog = AnrWatchdog::configure_global(config)?;

    let listener = RecordingListener::new();
    assert!(watchdog.enable(HostBridge::native(listener.clone())));
    let status = watchdog.status();
    assert!(status.armed);
    assert_eq!(status.diagnostic_thread.map(|t| t.tid), Some(catcher.tid));
    catcher.start.send(())?;

    // First ANR: host notified, catcher receives the forwarded copy.
    let before = epoch_millis();
    kill(Pid::this(), Signal::SIGUSR2)?;
    assert!(wait_for(TIMEOUT, || listener.count() == 1));
    let delay = listener.timestamps()[0] - before;
    assert!((0..TIMEOUT.as_millis() as i64).contains(&delay), "timestamp off by {delay}ms");
    assert!(wait_for(TIMEOUT, || catcher.received.load(Ordering::SeqCst) == 1));

    // The thread the handler ran on keeps the signal blocked after the
    // handler returns, and the watchdog pass does not unblock it.
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let raiser = thread::spawn(move || -> anyhow::Result<(bool, bool)> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGUSR2);
        set.thread_unblock()?;
        raise(Signal::SIGUSR2)?;
        let after_handler = current_thread_blocks(Signal::SIGUSR2)?;
        done_rx.recv()?;
        let after_pass = current_thread_blocks(Signal::SIGUSR2)?;
        Ok((after_handler, after_pass))
    });
    assert!(wait_for(TIMEOUT, || detections(watchdog) == 2));
    assert!(wait_for(TIMEOUT, || catcher.received.load(Ordering::SeqCst) == 2));
    done_tx.send(())?;
    let (after_handler, after_pass) =
        raiser.join().map_err(|_| anyhow::anyhow!("raiser panicked"))??;
    assert!(after_handler, "liveness signal unblocked when the handler returned");
    assert!(after_pass, "watchdog pass unblocked the interrupted thread");
    assert_eq!(listener.count(), 2);

    // Disabled: no notification, but the catcher still gets its signal.
    anr_watchdog::disable_anr_watchdog();
    kill(Pid::this(), Signal::SIGUSR2)?;
    assert!(wait_for(TIMEOUT, || detections(watchdog) == 3));
    assert!(wait_for(TIMEOUT, || catcher.received.load(Ordering::SeqCst) == 3));
    assert_eq!(listener.count(), 2);

    // Still armed for another occurrence.
    kill(Pid::this(), Signal::SIGUSR2)?;
    assert!(wait_for(TIMEOUT, || detections(watchdog) == 4));
    assert!(wait_for(TIMEOUT, || catcher.received.load(Ordering::SeqCst) == 4));

    // Re-enable through the free function with a new bridge.
    let second = RecordingListener::new();
    assert!(anr_watchdog::enable_anr_watchdog(HostBridge::native(second.clone())));
    kill(Pid::this(), Signal::SIGUSR2)?;
    assert!(wait_for(TIMEOUT, || second.count() == 1));
    assert_eq!(listener.count(), 2);

    let status = watchdog.status();
    assert_eq!(status.notified, 3);
    assert_eq!(status.dropped, 2);
    Ok(())
}
