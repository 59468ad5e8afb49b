// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discovery of the OS diagnostic ("Signal Catcher") thread.
//!
//! The catcher is found by scanning `<proc>/<pid>/task/*`: its `comm` must
//! start with the configured name and its `status` must report the liveness
//! signal as blocked. Unreadable or malformed entries are treated as
//! non-matches; threads can exit while the scan is running.

use std::fs;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::config::WatchdogConfig;

/// `{pid, tid}` of the diagnostic thread, the target of `tgkill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagnosticThreadRef {
    pub pid: Pid,
    pub tid: Pid,
}

pub struct SignalCatcherLocator {
    proc_root: PathBuf,
    pid: Pid,
    thread_name: String,
    signal: Signal,
}

impl SignalCatcherLocator {
    /// Locator for the current process.
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            proc_root: config.proc_root.clone(),
            pid: Pid::this(),
            thread_name: config.catcher_thread_name.clone(),
            signal: config.signal,
        }
    }

    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = pid;
        self
    }

    /// Scan the thread table once. Threads are visited in ascending tid
    /// order so repeated scans of an unchanged table agree.
    pub fn locate(&self) -> Option<DiagnosticThreadRef> {
        let task_dir = self.task_dir();
        let entries = match fs::read_dir(&task_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %task_dir.display(), "cannot enumerate threads: {e}");
                return None;
            }
        };

        let mut tids: Vec<i32> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str().and_then(parse_tid))
            .collect();
        tids.sort_unstable();

        let found = tids.into_iter().map(Pid::from_raw).find(|&tid| self.is_catcher(tid));
        match found {
            Some(tid) => {
                info!(pid = self.pid.as_raw(), tid = tid.as_raw(), "found signal catcher thread");
                Some(DiagnosticThreadRef { pid: self.pid, tid })
            }
            None => {
                warn!(
                    pid = self.pid.as_raw(),
                    signal = self.signal.as_str(),
                    "no {:?} thread with the liveness signal blocked",
                    self.thread_name
                );
                None
            }
        }
    }

    fn task_dir(&self) -> PathBuf {
        self.proc_root.join(self.pid.as_raw().to_string()).join("task")
    }

    fn is_catcher(&self, tid: Pid) -> bool {
        self.name_matches(tid) && self.signal_blocked(tid)
    }

    fn name_matches(&self, tid: Pid) -> bool {
        let path = self.task_dir().join(tid.as_raw().to_string()).join("comm");
        match fs::read(&path) {
            Ok(comm) => comm.starts_with(self.thread_name.as_bytes()),
            Err(_) => false,
        }
    }

    fn signal_blocked(&self, tid: Pid) -> bool {
        let path = self.task_dir().join(tid.as_raw().to_string()).join("status");
        let Ok(status) = fs::read_to_string(&path) else {
            return false;
        };
        match parse_blocked_mask(&status) {
            Some(mask) => is_signal_in_mask(mask, self.signal),
            None => {
                debug!(tid = tid.as_raw(), "no parsable SigBlk line");
                false
            }
        }
    }
}

/// Thread directory names are plain positive decimal ids.
pub fn parse_tid(name: &str) -> Option<i32> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok().filter(|&tid| tid > 0)
}

/// Extract the hex mask from the `SigBlk:` line of a status file.
pub fn parse_blocked_mask(status: &str) -> Option<u64> {
    let line = status.lines().find_map(|line| line.strip_prefix("SigBlk:"))?;
    let hex = line.trim();
    if hex.is_empty() {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// Signal `n` occupies bit `n - 1` of a kernel signal mask.
pub fn is_signal_in_mask(mask: u64, signal: Signal) -> bool {
    let bit = signal as i32 - 1;
    (0..64).contains(&bit) && mask & (1u64 << bit) != 0
}

#[cfg(test)]
#[path = "locator_tests.rs"]
mod tests;
