//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via DEPOT_CONFIG)
//! 3. Environment variables

use depot_protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT, MAX_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Transfer and admission configuration.
    pub transfer: TransferConfig,
    /// Index backend configuration.
    pub index: IndexConfig,
    /// Storage backend configuration.
    pub storage: StorageConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DEPOT_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.transfer.apply_env_overrides();
        self.index.apply_env_overrides();
        self.storage.apply_env_overrides();
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds (no bytes received).
    pub idle_timeout_secs: u64,
    /// Per-packet socket write timeout in seconds.
    pub write_timeout_secs: u64,
    /// Timeout for one index or storage call in seconds.
    pub backend_timeout_secs: u64,
    /// Hard cap on connection lifetime in seconds.
    pub max_lifetime_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum accepted inbound frame size in bytes.
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            idle_timeout_secs: 300,
            write_timeout_secs: 30,
            backend_timeout_secs: 10,
            max_lifetime_secs: 3600,
            max_connections: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("DEPOT_BIND", &mut self.bind_addr);
        env_parse("DEPOT_IDLE_TIMEOUT", &mut self.idle_timeout_secs);
        env_parse("DEPOT_WRITE_TIMEOUT", &mut self.write_timeout_secs);
        env_parse("DEPOT_BACKEND_TIMEOUT", &mut self.backend_timeout_secs);
        env_parse("DEPOT_MAX_LIFETIME", &mut self.max_lifetime_secs);
        env_parse("DEPOT_MAX_CONNECTIONS", &mut self.max_connections);
        env_parse("DEPOT_MAX_FRAME_SIZE", &mut self.max_frame_size);
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

/// Transfer and admission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Size of one outbound content chunk in bytes.
    pub chunk_size: usize,
    /// Ceiling on bytes queued for transfer per connection.
    pub max_queue_bytes_per_connection: u64,
    /// Process-wide ceiling on bytes admitted but not yet sent.
    pub max_inflight_bytes: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            max_queue_bytes_per_connection: 256 * 1024 * 1024,
            max_inflight_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl TransferConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("DEPOT_CHUNK_SIZE", &mut self.chunk_size);
        env_parse(
            "DEPOT_MAX_QUEUE_BYTES",
            &mut self.max_queue_bytes_per_connection,
        );
        env_parse("DEPOT_MAX_INFLIGHT_BYTES", &mut self.max_inflight_bytes);
    }
}

/// Index backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Folder holding the metadata tree.
    pub folder: PathBuf,
    /// Hex unique-id of the base-graphics package listed first, so a
    /// bare client can bootstrap.
    pub bootstrap_unique_id: Option<String>,
    /// Interval between index reloads in seconds (0 = reload at startup only).
    pub reload_interval_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("content-index"),
            bootstrap_unique_id: None,
            reload_interval_secs: 0,
        }
    }
}

impl IndexConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("DEPOT_INDEX_FOLDER", &mut self.folder);
        if let Ok(id) = std::env::var("DEPOT_BOOTSTRAP_UNIQUE_ID") {
            if !id.is_empty() {
                self.bootstrap_unique_id = Some(id);
            }
        }
        env_parse("DEPOT_INDEX_RELOAD_INTERVAL", &mut self.reload_interval_secs);
    }

    /// Reload interval, if periodic reloading is enabled.
    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_interval_secs > 0).then(|| Duration::from_secs(self.reload_interval_secs))
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Folder holding the content blobs.
    pub folder: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("content-storage"),
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("DEPOT_STORAGE_FOLDER", &mut self.folder);
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}
