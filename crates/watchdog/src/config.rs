// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use anyhow::Context;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::error::WatchdogError;

/// Name of the ART thread that dumps stacks on `SIGQUIT`.
pub const DEFAULT_CATCHER_THREAD_NAME: &str = "Signal Catcher";
pub const DEFAULT_WORKER_THREAD_NAME: &str = "anr-watchdog";
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Kernel limit on `comm`, excluding the trailing NUL.
const MAX_THREAD_NAME_LEN: usize = 15;

/// Watchdog settings. Every field has a default matching a stock Android
/// process, so most hosts never construct this by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Liveness signal the OS raises on ANR.
    #[serde(with = "signal_name")]
    pub signal: Signal,
    /// Name prefix of the OS diagnostic thread.
    pub catcher_thread_name: String,
    /// Root of the process-information filesystem.
    pub proc_root: PathBuf,
    /// Name given to the watchdog thread.
    pub worker_thread_name: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            signal: Signal::SIGQUIT,
            catcher_thread_name: DEFAULT_CATCHER_THREAD_NAME.to_owned(),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_owned(),
        }
    }
}

impl WatchdogConfig {
    /// Parse a JSON object handed over by the host. Missing keys keep their
    /// defaults.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context(WatchdogError::InvalidConfig)?;
        config.validate().context(WatchdogError::InvalidConfig)?;
        Ok(config)
    }

    /// Defaults overridden by `ANR_WATCHDOG_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(name) = env_var("ANR_WATCHDOG_SIGNAL") {
            config.signal = parse_signal(&name).context(WatchdogError::InvalidConfig)?;
        }
        if let Some(name) = env_var("ANR_WATCHDOG_CATCHER_NAME") {
            config.catcher_thread_name = name;
        }
        if let Some(root) = env_var("ANR_WATCHDOG_PROC_ROOT") {
            config.proc_root = PathBuf::from(root);
        }
        config.validate().context(WatchdogError::InvalidConfig)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if matches!(self.signal, Signal::SIGKILL | Signal::SIGSTOP) {
            anyhow::bail!("{} cannot be caught", self.signal.as_str());
        }
        validate_thread_name("catcher_thread_name", &self.catcher_thread_name)?;
        validate_thread_name("worker_thread_name", &self.worker_thread_name)?;
        if self.proc_root.as_os_str().is_empty() {
            anyhow::bail!("proc_root must not be empty");
        }
        Ok(())
    }
}

fn validate_thread_name(field: &str, name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        anyhow::bail!("{field} must not be empty");
    }
    if name.len() > MAX_THREAD_NAME_LEN {
        anyhow::bail!("{field} exceeds {MAX_THREAD_NAME_LEN} bytes: {name:?}");
    }
    if name.contains('\0') {
        anyhow::bail!("{field} contains a NUL byte");
    }
    Ok(())
}

fn env_var(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Accepts `SIGQUIT`, `sigquit` and `QUIT`.
pub fn parse_signal(name: &str) -> anyhow::Result<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") { upper } else { format!("SIG{upper}") };
    full.parse::<Signal>().map_err(|_| anyhow::anyhow!("unknown signal: {name}"))
}

mod signal_name {
    use nix::sys::signal::Signal;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(signal: &Signal, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(signal.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Signal, D::Error> {
        let name = String::deserialize(d)?;
        super::parse_signal(&name).map_err(serde::de::Error::custom)
    }
}

/// Log output format.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `anr_watchdog=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), format: LogFormat::Text }
    }
}

impl LogConfig {
    /// Defaults overridden by `ANR_WATCHDOG_LOG_LEVEL` and
    /// `ANR_WATCHDOG_LOG_FORMAT`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(level) = env_var("ANR_WATCHDOG_LOG_LEVEL") {
            config.level = level;
        }
        if let Some(format) = env_var("ANR_WATCHDOG_LOG_FORMAT") {
            config.format = format.parse()?;
        }
        Ok(config)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
