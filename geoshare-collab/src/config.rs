//! Relay and client configuration.
//!
//! Both structs have working defaults, deserialize from JSON with every field
//! optional. Command-line and environment overrides live in the binary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::publisher::PositioningOptions;

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Connections beyond this are closed right after the handshake
    pub max_participants: usize,
    /// Frames buffered per channel before a slow channel starts skipping
    pub broadcast_capacity: usize,
    /// Broadcast `participant-left` when a channel closes
    pub announce_departures: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_participants: 100,
            broadcast_capacity: 256,
            announce_departures: false,
        }
    }
}

impl RelayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }
}

/// Client session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL of the relay
    pub server_url: String,
    /// Reconnect automatically after the channel drops
    pub reconnect: bool,
    pub reconnect_delay_ms: u64,
    /// Staleness sweep period
    pub reap_interval_ms: u64,
    /// Maximum silence before a remote participant is evicted.
    /// Defaults to the sweep period.
    pub liveness_threshold_ms: Option<u64>,
    /// Buffer size of the session's inbound queues
    pub event_buffer: usize,
    pub positioning: PositioningOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            reconnect: true,
            reconnect_delay_ms: 1_000,
            reap_interval_ms: 30_000,
            liveness_threshold_ms: None,
            event_buffer: 256,
            positioning: PositioningOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Sweep period; never zero.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }

    pub fn liveness_threshold(&self) -> Duration {
        match self.liveness_threshold_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.reap_interval(),
        }
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config = serde_json::from_str(&text).map_err(ConfigError::Parse)?;
    log::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Config read error: {e}"),
            Self::Parse(e) => write!(f, "Config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}
