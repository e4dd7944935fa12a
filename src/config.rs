//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Network listen configuration.
    pub listen: ListenConfig,
    /// Optional TLS configuration; presence enables TLS on the listener.
    pub tls: Option<TlsConfig>,
    /// Relay behaviour (pings, timeouts, encryption warning).
    #[serde(default)]
    pub relay: RelayConfig,
    /// Message of the Day configuration.
    #[serde(default)]
    pub motd: MotdConfig,
    /// Statistics endpoint configuration.
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:6837").
    pub address: SocketAddr,
}

/// TLS listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM format).
    pub cert_path: String,
    /// Path to private key file (PEM format).
    pub key_path: String,
}

/// Relay behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Seconds between server pings (default: 30, 0 disables pings).
    #[serde(default = "default_time_between_pings")]
    pub time_between_pings: u64,
    /// Pings an unresponsive client may miss before being dropped
    /// (default: 2, 0 disables the timeout).
    #[serde(default = "default_pings_until_timeout")]
    pub pings_until_timeout: u32,
    /// Warn clients joining a channel whose name does not mark it as
    /// end-to-end encrypted (default: true).
    #[serde(default = "default_true")]
    pub warn_if_not_encrypted: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            time_between_pings: default_time_between_pings(),
            pings_until_timeout: default_pings_until_timeout(),
            warn_if_not_encrypted: true,
        }
    }
}

fn default_time_between_pings() -> u64 {
    30
}

fn default_pings_until_timeout() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl RelayConfig {
    /// Interval between ping sentinels; `None` disables the ticker.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.time_between_pings > 0).then(|| Duration::from_secs(self.time_between_pings))
    }

    /// Whether an expired read deadline drops the client.
    pub fn timeout_enforced(&self) -> bool {
        self.time_between_pings > 0 && self.pings_until_timeout > 0
    }

    /// Total time that may pass without receiving anything from a client.
    ///
    /// When timeouts are disabled the reader still needs to unblock
    /// periodically to observe a stopped session, hence the one-minute
    /// fallback.
    pub fn read_deadline(&self) -> Duration {
        if self.timeout_enforced() {
            Duration::from_secs(self.time_between_pings * u64::from(self.pings_until_timeout))
        } else {
            Duration::from_secs(60)
        }
    }

    /// TCP keep-alive period for accepted sockets.
    pub fn keepalive_period(&self) -> Duration {
        if self.time_between_pings > 0 {
            Duration::from_secs(self.time_between_pings)
        } else {
            Duration::from_secs(15)
        }
    }
}

/// Message of the Day (MOTD) configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MotdConfig {
    /// Path to a MOTD text file.
    pub file: Option<String>,
    /// Inline MOTD lines (used when `file` is not set).
    #[serde(default)]
    pub lines: Vec<String>,
}

impl MotdConfig {
    /// Load the MOTD text. Empty text disables the connect-time MOTD.
    pub fn load_text(&self) -> String {
        if let Some(ref path) = self.file {
            match std::fs::read_to_string(path) {
                Ok(content) => return content.trim().to_string(),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to read MOTD file");
                }
            }
        }
        self.lines.join("\n").trim().to_string()
    }
}

/// Statistics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StatsConfig {
    /// Password gating the `stat` verb; empty disables the endpoint.
    #[serde(default)]
    pub password: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
