//! Registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capacity and expiry knobs for the registries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    /// Maximum concurrent sessions.
    pub session_capacity: usize,
    /// Maximum live notifications across all sessions.
    pub notification_capacity: usize,
    /// Maintain the expiry index and run the reaper.
    pub expiry_enabled: bool,
    /// Longest the reaper sleeps before re-checking the index.
    pub reaper_max_wait_secs: u64,
}

impl RegistryConfig {
    /// Reaper wait cap as a `Duration`.
    pub fn reaper_max_wait(&self) -> Duration {
        Duration::from_secs(self.reaper_max_wait_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_capacity: 32,
            notification_capacity: 256,
            expiry_enabled: true,
            reaper_max_wait_secs: 300,
        }
    }
}
