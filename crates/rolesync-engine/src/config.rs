//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "ROLESYNC_DATA_DIR";

/// Complete engine configuration. Every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Fleet pass timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between fleet passes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Skip tenants previously found unsyncable.
    #[serde(default)]
    pub only_syncable: bool,
}

/// Durable job queue and its workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempts per job, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Idle poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long done and failed jobs are kept, in seconds.
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain ids with a deployed contract factory. Empty accepts any.
    #[serde(default = "default_supported_chain_ids")]
    pub supported_chain_ids: Vec<u64>,
    /// Upper bound on subscriber index pages read per pass.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_job_retention_secs() -> u64 {
    7 * 24 * 3600
}

fn default_supported_chain_ids() -> Vec<u64> {
    // Base, Base Sepolia
    vec![8453, 84532]
}

fn default_max_pages() -> u32 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            only_syncable: false,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            job_retention_secs: default_job_retention_secs(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            supported_chain_ids: default_supported_chain_ids(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

impl EngineConfig {
    /// Load `config.toml` from the data directory.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml_str(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("rolesync.db")
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            home_subdir("Library/Application Support/Rolesync")
        }
        #[cfg(target_os = "windows")]
        {
            home_subdir("Rolesync")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            home_subdir(".rolesync")
        }
    }
}

/// Fallback home directory resolution.
fn home_subdir(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/rolesync"))
}
