use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    #[serde(default = "default_address")]
    pub address: String,
    /// Seconds between snapshot file saves; 0 saves after every accepted update
    #[serde(default = "default_store_interval_secs")]
    pub store_interval_secs: u64,
    /// Snapshot file; empty disables file persistence
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,
    /// Load the last known values on start
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// SQLite file for the durable store; unset disables it
    #[serde(default)]
    pub database_path: Option<String>,
    /// Records buffered before the batch writer commits
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,
    /// Shared signing key; unset disables verification
    #[serde(default)]
    pub key: Option<String>,
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_store_interval_secs() -> u64 {
    300
}

fn default_file_storage_path() -> String {
    "/tmp/metrics-db.json".to_string()
}

fn default_restore() -> bool {
    true
}

fn default_batch_capacity() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            store_interval_secs: default_store_interval_secs(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_path: None,
            batch_capacity: default_batch_capacity(),
            key: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.batch_capacity == 0 {
            anyhow::bail!("batch_capacity must be at least 1");
        }
        Ok(config)
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        let path = self.file_storage_path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// `None` when every accepted update is saved synchronously.
    pub fn store_interval(&self) -> Option<Duration> {
        (self.store_interval_secs > 0).then(|| Duration::from_secs(self.store_interval_secs))
    }
}
