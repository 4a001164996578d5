//! Session configuration
//!
//! Built by the host and handed to the session on connect. All durations are
//! carried as milliseconds so the config can cross the worker boundary as a
//! plain value and deserialize from application settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

fn default_keepalive_interval_ms() -> u64 {
    1000
}

fn default_max_keepalive_failures() -> u32 {
    3
}

/// Configuration of one logical session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket endpoint, `ws://HOST:PORT/ws/` or `wss://HOST:PORT/ws/`
    pub url: String,
    /// Reconnect budget: attempts before the session surrenders
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Fixed backoff between reconnect attempts
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Inbound silence threshold before a keepalive probe is sent
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Unanswered keepalives before the socket is declared stale
    #[serde(default = "default_max_keepalive_failures")]
    pub max_keepalive_failures: u32,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            max_keepalive_failures: default_max_keepalive_failures(),
        }
    }

    /// Build the conventional endpoint URL for a host and port
    pub fn endpoint(host: &str, port: u16, tls: bool) -> String {
        let scheme = if tls { "wss" } else { "ws" };
        format!("{scheme}://{host}:{port}/ws/")
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_keepalive_failures(mut self, failures: u32) -> Self {
        self.max_keepalive_failures = failures;
        self
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}
