//! Configuration system for nearcard.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $NEARCARD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/nearcard/config.toml
//!   3. ~/.config/nearcard/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NearcardConfig {
    pub radio: RadioConfig,
    pub broadcast: BroadcastConfig,
    pub scan: ScanConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Network interface carrying the emulated broadcast medium.
    pub interface: String,
    /// UDP port adverts are sent to and received on.
    pub port: u16,
    /// How often a held advert is repeated on the medium.
    pub advertise_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// How long each packet is advertised before moving to the next.
    pub packet_dwell_ms: u64,
    /// Pause after every full circle of packets.
    pub circle_gap_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long a single scan waits before returning a snapshot.
    pub dwell_ms: u64,
    /// Partial entries not refreshed within this window are dropped.
    pub entry_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Durable flags (broadcast on/off) survive restarts here.
    pub state_path: PathBuf,
    /// The local user's own profile.
    pub profile_path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: 9100,
            advertise_interval_ms: 100,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            packet_dwell_ms: 200,
            circle_gap_ms: 2_000,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            dwell_ms: 3_000,
            entry_ttl_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: data_dir().join("state.json"),
            profile_path: data_dir().join("profile.json"),
        }
    }
}

impl BroadcastConfig {
    pub fn packet_dwell(&self) -> Duration {
        Duration::from_millis(self.packet_dwell_ms)
    }

    pub fn circle_gap(&self) -> Duration {
        Duration::from_millis(self.circle_gap_ms)
    }
}

impl ScanConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }
}

impl RadioConfig {
    pub fn advertise_interval(&self) -> Duration {
        Duration::from_millis(self.advertise_interval_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("nearcard")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("nearcard")
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl NearcardConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            NearcardConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config document. Missing sections and keys take defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("NEARCARD_CONFIG")
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
            let text = toml::to_string_pretty(&NearcardConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply NEARCARD_* overrides read through `lookup`.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("NEARCARD_RADIO__INTERFACE") {
            self.radio.interface = v;
        }
        if let Some(p) = lookup("NEARCARD_RADIO__PORT").and_then(|v| v.parse().ok()) {
            self.radio.port = p;
        }
        if let Some(ms) = lookup("NEARCARD_SCAN__DWELL_MS").and_then(|v| v.parse().ok()) {
            self.scan.dwell_ms = ms;
        }
        if let Some(ms) = lookup("NEARCARD_BROADCAST__PACKET_DWELL_MS").and_then(|v| v.parse().ok())
        {
            self.broadcast.packet_dwell_ms = ms;
        }
    }
}
