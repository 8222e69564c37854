//! Configuration system for Waypoint.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WAYPOINT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/waypoint/config.toml
//!   3. ~/.config/waypoint/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::node::{NodeId, RawNodeRecord};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    pub registry: RegistryConfig,
    pub selector: SelectorConfig,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often the ledger is polled for membership changes.
    pub refresh_interval_secs: u64,
    /// Upper bound on a single ledger fetch.
    pub fetch_timeout_secs: u64,
    /// Fixed membership for the static registry (tests, bootstrapping).
    pub static_nodes: Vec<StaticNodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticNodeConfig {
    pub node_id: NodeId,
    /// SEC1 public key, hex encoded.
    #[serde(default)]
    pub signing_key: String,
    pub http_address: String,
    #[serde(default = "default_true")]
    pub in_canonical_network: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// One of: stable, manual, ordered, random, closest. Empty = stable.
    pub strategy: String,
    /// Preference list for manual/ordered/closest.
    pub preferred_nodes: Vec<NodeId>,
    /// Latency cache lifetime for closest. 0 = default (300s).
    pub cache_expiry_secs: u64,
    /// TCP connect probe timeout for closest. 0 = default (2000ms).
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Ceiling on a single wait for a peer cursor.
    pub max_wait_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(300);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            fetch_timeout_secs: 10,
            static_nodes: Vec::new(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: "stable".to_string(),
            preferred_nodes: Vec::new(),
            cache_expiry_secs: DEFAULT_CACHE_EXPIRY.as_secs(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { max_wait_secs: 10 }
    }
}

fn default_true() -> bool {
    true
}

// ── Durations ─────────────────────────────────────────────────────────────────

impl RegistryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

impl SelectorConfig {
    pub fn cache_expiry(&self) -> Duration {
        match self.cache_expiry_secs {
            0 => DEFAULT_CACHE_EXPIRY,
            secs => Duration::from_secs(secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        match self.connect_timeout_ms {
            0 => DEFAULT_CONNECT_TIMEOUT,
            ms => Duration::from_millis(ms),
        }
    }
}

impl TrackerConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs.max(1))
    }
}

impl StaticNodeConfig {
    /// Convert to a raw record. An undecodable key yields an empty key, which
    /// marks the resulting node invalid.
    pub fn to_record(&self) -> RawNodeRecord {
        RawNodeRecord {
            node_id: self.node_id,
            signing_key_pub: hex::decode(self.signing_key.trim_start_matches("0x"))
                .unwrap_or_default(),
            http_address: self.http_address.clone(),
            in_canonical_network: self.in_canonical_network,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("waypoint")
}

fn home_dir() -> PathBuf {
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl WaypointConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            WaypointConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WAYPOINT_CONFIG")
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
            let text = toml::to_string_pretty(&WaypointConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply WAYPOINT_* overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("WAYPOINT_SELECTOR__STRATEGY") {
            self.selector.strategy = v.trim().to_lowercase();
        }
        if let Some(v) = var("WAYPOINT_SELECTOR__PREFERRED_NODES") {
            let parsed: Result<Vec<NodeId>, _> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            if let Ok(nodes) = parsed {
                self.selector.preferred_nodes = nodes;
            }
        }
        if let Some(secs) = var("WAYPOINT_REGISTRY__REFRESH_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.registry.refresh_interval_secs = secs;
        }
        if let Some(secs) = var("WAYPOINT_TRACKER__MAX_WAIT_SECS").and_then(|v| v.parse().ok()) {
            self.tracker.max_wait_secs = secs;
        }
    }
}
