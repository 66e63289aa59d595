//! Settings schema.
//!
//! Every struct uses `#[serde(default)]` so a settings file only needs the
//! keys it wants to change.

use std::time::Duration;

use herald_logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.herald/settings.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// Schema version.
    pub version: String,
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Registry capacities and expiry.
    pub registry: RegistrySettings,
    /// Shutdown behaviour.
    pub shutdown: ShutdownSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Where notifications are rendered.
    pub presenter: PresenterSettings,
}

impl Default for HeraldSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            registry: RegistrySettings::default(),
            shutdown: ShutdownSettings::default(),
            logging: LoggingSettings::default(),
            presenter: PresenterSettings::default(),
        }
    }
}

impl HeraldSettings {
    /// Reject values that would leave the server unusable.
    pub fn validate(&self) -> Result<()> {
        if self.registry.session_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "registry.sessionCapacity must be at least 1".into(),
            ));
        }
        if self.registry.notification_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "registry.notificationCapacity must be at least 1".into(),
            ));
        }
        if self.registry.reaper_max_wait_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "registry.reaperMaxWaitSecs must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) is shorter than heartbeatIntervalMs ({})",
                self.server.heartbeat_timeout_ms, self.server.heartbeat_interval_ms
            )));
        }
        Ok(())
    }
}

/// Listener and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket/HTTP port.
    pub port: u16,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_bytes: usize,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Drop clients silent for longer than this, in milliseconds.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9001,
            max_message_bytes: 64 * 1024,
            heartbeat_interval_ms: 8_000,
            heartbeat_timeout_ms: 16_000,
        }
    }
}

impl ServerSettings {
    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence allowed before a client is dropped.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Registry capacities and expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Concurrent session limit.
    pub session_capacity: usize,
    /// Live notification limit, shared by all sessions.
    pub notification_capacity: usize,
    /// Run the expiry reaper.
    pub expiry_enabled: bool,
    /// Longest reaper sleep, in seconds.
    pub reaper_max_wait_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            session_capacity: 32,
            notification_capacity: 256,
            expiry_enabled: true,
            reaper_max_wait_secs: 300,
        }
    }
}

/// Shutdown behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSettings {
    /// How long to wait for connections and the reaper to finish, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl ShutdownSettings {
    /// Drain timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Presenter selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenterKind {
    /// Boxed card on stdout.
    #[default]
    Terminal,
    /// Structured `info` event.
    Log,
}

/// Where notifications are rendered.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenterSettings {
    /// Which presenter to use.
    pub kind: PresenterKind,
}
