//! Configuration system for mcast nodes.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MCAST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/mcast/config.toml
//!   3. ~/.config/mcast/config.toml

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McastConfig {
    pub node: NodeConfig,
    pub bootstrap: BootstrapConfig,
    pub relay: RelaySettings,
    pub network: NetworkConfig,
    pub metrics: MetricsConfig,
    pub api: ApiConfig,
}

/// Which protocol a node runs. Chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Flood-based peer.
    #[default]
    #[serde(alias = "node")]
    Overlay,
    /// Broker in front of content servers.
    Rendezvous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Used only when no bootstrap address is configured.
    pub role: NodeRole,
    /// TCP address for the control channel.
    pub listen: SocketAddr,
    /// Address announced to peers. Empty = `listen`.
    pub advertise: String,
    /// Static neighbours (peers, or content servers for a rendezvous point).
    /// Ignored when a bootstrap address is configured.
    pub neighbours: Vec<SocketAddr>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Bootstrap service address. Empty = use the static [node] section.
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// First local port handed to a relay. Ports are never reused.
    pub first_port: u16,
    /// Host combined with bare ports received from content servers.
    pub bind_host: IpAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bound on every outbound control exchange (connect, write, read).
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between PING probes to each content server.
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Status API port on 127.0.0.1. 0 = disabled.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Overlay,
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5000),
            advertise: String::new(),
            neighbours: Vec::new(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            first_port: 8000,
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 5000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9101 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("mcast")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl McastConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            McastConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MCAST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&McastConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Address peers should use to reach this node.
    pub fn advertise_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.node.advertise.is_empty() {
            return Ok(self.node.listen);
        }
        self.node
            .advertise
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.node.advertise.clone()))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.network.io_timeout_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics.interval_secs.max(1))
    }

    /// Apply MCAST_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `MCAST_<SECTION>__<FIELD>` overrides from `lookup`.
    /// Values that do not parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MCAST_NODE__ROLE") {
            match v.as_str() {
                "overlay" | "node" => self.node.role = NodeRole::Overlay,
                "rendezvous" => self.node.role = NodeRole::Rendezvous,
                _ => {}
            }
        }
        if let Some(a) = lookup("MCAST_NODE__LISTEN").and_then(|v| v.parse().ok()) {
            self.node.listen = a;
        }
        if let Some(v) = lookup("MCAST_NODE__ADVERTISE") {
            self.node.advertise = v;
        }
        // comma-separated; one bad entry rejects the whole list
        if let Some(v) = lookup("MCAST_NODE__NEIGHBOURS") {
            let parsed: Result<Vec<SocketAddr>, _> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            if let Ok(neighbours) = parsed {
                self.node.neighbours = neighbours;
            }
        }
        if let Some(v) = lookup("MCAST_BOOTSTRAP__ADDRESS") {
            self.bootstrap.address = v;
        }
        if let Some(p) = lookup("MCAST_RELAY__FIRST_PORT").and_then(|v| v.parse().ok()) {
            self.relay.first_port = p;
        }
        if let Some(h) = lookup("MCAST_RELAY__BIND_HOST").and_then(|v| v.parse().ok()) {
            self.relay.bind_host = h;
        }
        if let Some(ms) = lookup("MCAST_NETWORK__IO_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.network.io_timeout_ms = ms;
        }
        if let Some(secs) = lookup("MCAST_METRICS__INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.metrics.interval_secs = secs;
        }
        if let Some(p) = lookup("MCAST_API__PORT").and_then(|v| v.parse().ok()) {
            self.api.port = p;
        }
    }
}
