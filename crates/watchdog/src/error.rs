// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure categories of the watchdog. Attached as context to `anyhow`
/// errors so callers can `downcast_ref` the category out of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchdogError {
    InvalidConfig,
    WakePrimitive,
    ThreadSpawn,
    HandlerInstall,
    HandlerOwned,
    RuntimeAttach,
    RuntimeVersion,
    HostCallback,
}

impl WatchdogError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::WakePrimitive => "WAKE_PRIMITIVE",
            Self::ThreadSpawn => "THREAD_SPAWN",
            Self::HandlerInstall => "HANDLER_INSTALL",
            Self::HandlerOwned => "HANDLER_OWNED",
            Self::RuntimeAttach => "RUNTIME_ATTACH",
            Self::RuntimeVersion => "RUNTIME_VERSION",
            Self::HostCallback => "HOST_CALLBACK",
        }
    }

    /// Setup failures make `enable` return false; everything else only
    /// drops a single notification.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig
                | Self::WakePrimitive
                | Self::ThreadSpawn
                | Self::HandlerInstall
                | Self::HandlerOwned
        )
    }
}

impl fmt::Display for WatchdogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for WatchdogError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
