// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};

/// Install a global fmt subscriber for hosts that do not bring their own.
///
/// Returns `false` when a subscriber is already installed, in which case the
/// existing one keeps receiving the watchdog's events.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.format {
        LogFormat::Json => fmt::fmt().with_env_filter(filter).json().try_init(),
        LogFormat::Text => fmt::fmt().with_env_filter(filter).try_init(),
    };
    result.is_ok()
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
