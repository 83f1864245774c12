//! Configuration for the connection manager and the demo binary
//!
//! Every knob has a default; an optional TOML file named by `LIVELINK_CONFIG`
//! overrides any subset of them. Durations are given in milliseconds.

use crate::remote::TcpServiceConfig;
use anyhow::{Context, Result};
use livelink_shared::{defaults, duration_ms, ConfigError, RetryConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the TOML settings file
pub const CONFIG_ENV: &str = "LIVELINK_CONFIG";

/// Configuration for the connection lifecycle and health monitoring
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bound on a single connect attempt
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Bound on a single health probe
    #[serde(rename = "keep_alive_interval_ms", with = "duration_ms")]
    pub keep_alive_interval: Duration,
    /// Reopen the session after a failed probe
    pub auto_reconnect: bool,
    /// Reconnection attempts before the manager gives up
    pub max_reconnect_attempts: u32,
    /// Attempt `n` waits `n * reconnect_base_delay`
    #[serde(rename = "reconnect_base_delay_ms", with = "duration_ms")]
    pub reconnect_base_delay: Duration,
    /// Pause between the end of one probe and the start of the next
    #[serde(rename = "health_check_interval_ms", with = "duration_ms")]
    pub health_check_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
            keep_alive_interval: Duration::from_millis(defaults::KEEP_ALIVE_INTERVAL_MS),
            auto_reconnect: true,
            max_reconnect_attempts: defaults::MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: Duration::from_millis(defaults::RECONNECT_BASE_DELAY_MS),
            health_check_interval: Duration::from_millis(defaults::HEALTH_CHECK_INTERVAL_MS),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::ZeroHealthCheckInterval);
        }
        // Bounds every probe; zero would fail them all
        if self.keep_alive_interval.is_zero() {
            return Err(ConfigError::ZeroKeepAliveInterval);
        }
        Ok(())
    }
}

/// Everything the demo binary needs, as read from the settings file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retry: RetryConfig,
    pub connection: ConnectionConfig,
    pub service: TcpServiceConfig,
}

impl Settings {
    /// Load from the file named by `LIVELINK_CONFIG`, or fall back to defaults
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        settings.retry.validate()?;
        settings.connection.validate()?;
        Ok(settings)
    }
}
