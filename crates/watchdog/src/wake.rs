// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Context;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{pipe2, read, write};

use crate::error::WatchdogError;

/// Binary semaphore that can be posted from a signal handler.
///
/// Built on a self-pipe guarded by a pending flag: at most one byte is ever
/// in flight, so posts that arrive before the waiter consumes the current
/// wake are coalesced into it.
#[derive(Debug)]
pub struct WakeSemaphore {
    pending: AtomicBool,
    post_failures: AtomicU64,
    rx: OwnedFd,
    tx: OwnedFd,
}

impl WakeSemaphore {
    pub fn new() -> anyhow::Result<Self> {
        let (rx, tx) = pipe2(OFlag::O_CLOEXEC).context(WatchdogError::WakePrimitive)?;
        Ok(Self { pending: AtomicBool::new(false), post_failures: AtomicU64::new(0), rx, tx })
    }

    /// Wake the waiter. Async-signal-safe: one atomic swap and at most one
    /// `write(2)`, no allocation, no locks.
    ///
    /// Returns `false` only if the pipe write failed.
    pub fn post(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return true;
        }
        loop {
            match write(&self.tx, &[1]) {
                Ok(_) => return true,
                Err(Errno::EINTR) => continue,
                Err(_) => {
                    self.pending.store(false, Ordering::Release);
                    self.post_failures.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }
        }
    }

    /// Block until the next post, then re-arm before returning.
    ///
    /// Re-arming happens here, ahead of the caller's handling pass. A post
    /// landing between the byte being read and the re-arm is absorbed into
    /// the pass that is about to run; any later post writes a fresh byte.
    pub fn wait(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 1];
        loop {
            match read(&self.rx, &mut buf) {
                Ok(0) => anyhow::bail!("wake pipe closed"),
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("wake pipe read failed"),
            }
        }
        self.pending.swap(false, Ordering::AcqRel);
        Ok(())
    }

    /// Whether a wake has been posted and not yet consumed.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of failed posts since the last call.
    pub fn take_post_failures(&self) -> u64 {
        self.post_failures.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "wake_tests.rs"]
mod tests;
