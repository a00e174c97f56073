//! Bus configuration with TOML loading and defaults.
//!
//! The bootstrap layer hands the bus a [`BusConfig`] before start; every field
//! has a serde default so a partial TOML file (or none at all) works.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4520
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

fn default_max_peers() -> usize {
    100
}

/// Tuning surface for one bus instance (server or session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Host to bind (server) or dial (session).
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// A peer silent longer than this is evicted by the sweep.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// How often the liveness sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum accepted length of a single inbound line.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Maximum concurrently connected peers.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_frame_bytes: default_max_frame_bytes(),
            max_peers: default_max_peers(),
        }
    }
}

impl BusConfig {
    /// `host:port`, as passed to bind/connect.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Load a [`BusConfig`] from a TOML file, falling back to defaults.
///
/// Missing file is not an error; unreadable or unparseable files are logged
/// and replaced by defaults so the bus still comes up.
pub fn load_config(path: Option<&Path>) -> BusConfig {
    let Some(path) = path else {
        return BusConfig::default();
    };

    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return BusConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<BusConfig>(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse config, using defaults"
                );
                BusConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Failed to read config file, using defaults"
            );
            BusConfig::default()
        }
    }
}
