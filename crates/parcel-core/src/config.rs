//! Configuration system for Parcel.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PARCEL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/parcel/config.toml
//!   3. ~/.config/parcel/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::plan::DEFAULT_CHUNK_SIZE;
use crate::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParcelConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub sessions: SessionConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP binding listens on.
    pub bind: String,
    pub port: u16,
    /// Largest accepted chunk payload.
    pub max_chunk_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Filesystem,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Root directory (filesystem) or database file (sqlite; a path without an
    /// extension is treated as a directory holding `parcel.db`). Unused for memory.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Discard in-progress sessions idle longer than this. 0 = never.
    pub ttl_secs: u64,
    /// How often the janitor runs.
    pub janitor_interval_secs: u64,
    /// How long a completed session answers resends of its final chunk.
    pub tombstone_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub chunk_size: u64,
    pub retry: RetryPolicy,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
            max_chunk_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Filesystem,
            path: data_dir().join("uploads"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            janitor_interval_secs: 60,
            tombstone_ttl_secs: 600,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("parcel")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("parcel")
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

impl ParcelConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            ParcelConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PARCEL_CONFIG")
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
            let text = toml::to_string_pretty(&ParcelConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PARCEL_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PARCEL_SERVER__BIND") {
            self.server.bind = v;
        }
        if let Some(p) = lookup("PARCEL_SERVER__PORT").and_then(|v| v.parse().ok()) {
            self.server.port = p;
        }
        if let Some(n) = lookup("PARCEL_SERVER__MAX_CHUNK_BYTES").and_then(|v| v.parse().ok()) {
            self.server.max_chunk_bytes = n;
        }
        if let Some(v) = lookup("PARCEL_STORAGE__BACKEND") {
            match v.to_ascii_lowercase().as_str() {
                "memory" => self.storage.backend = BackendKind::Memory,
                "filesystem" | "fs" => self.storage.backend = BackendKind::Filesystem,
                "sqlite" => self.storage.backend = BackendKind::Sqlite,
                _ => {}
            }
        }
        if let Some(v) = lookup("PARCEL_STORAGE__PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Some(n) = lookup("PARCEL_SESSIONS__TTL_SECS").and_then(|v| v.parse().ok()) {
            self.sessions.ttl_secs = n;
        }
        if let Some(n) = lookup("PARCEL_SESSIONS__TOMBSTONE_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.sessions.tombstone_ttl_secs = n;
        }
        if let Some(v) = lookup("PARCEL_CLIENT__SERVER_URL") {
            self.client.server_url = v;
        }
        if let Some(n) = lookup("PARCEL_CLIENT__CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.client.chunk_size = n;
        }
        if let Some(n) = lookup("PARCEL_CLIENT__MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.client.retry.max_attempts = n;
        }
    }
}
