//! Configuration management for the restore agent.
//!
//! Optional settings come from a TOML file; per-run inputs come from the
//! command line and are validated into an immutable [`RestoreConfig`].

use crate::transfer::RetryPolicy;
use crate::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost:8088";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Snapshotter address (host:port)
    #[serde(default = "default_host")]
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per upload, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_max_attempts() -> u32 {
    crate::transfer::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    crate::transfer::retry::DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host() }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }
}

/// Raw restore inputs as given by the operator.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub backup_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub metadir: Option<PathBuf>,
    pub datadir: Option<PathBuf>,
    pub database: Option<String>,
    pub source_database: Option<String>,
    pub retention: Option<String>,
    pub shard: Option<String>,
    pub retry: RetryPolicy,
}

impl RestoreOptions {
    pub fn new(backup_dir: impl Into<PathBuf>, database: impl Into<String>) -> Self {
        Self {
            backup_dir: Some(backup_dir.into()),
            database: Some(database.into()),
            ..Self::default()
        }
    }

    /// Check flag combinations and fill in defaults.
    pub fn validate(self) -> Result<RestoreConfig> {
        let backup_dir = self
            .backup_dir
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| RestoreError::Config("path with backup files required".to_string()))?;

        let destination_database = non_empty(self.database)
            .ok_or_else(|| RestoreError::Config("-database is a required parameter".to_string()))?;

        let source_database = non_empty(self.source_database).unwrap_or_else(|| destination_database.clone());
        let retention = non_empty(self.retention);

        let shard = match non_empty(self.shard) {
            Some(shard) => {
                if retention.is_none() {
                    return Err(RestoreError::Config(
                        "-retention is required to restore shard".to_string(),
                    ));
                }
                let id = shard
                    .parse::<u64>()
                    .map_err(|_| RestoreError::Config(format!("-shard must be a shard ID, got {:?}", shard)))?;
                Some(id)
            }
            None => None,
        };

        Ok(RestoreConfig {
            backup_dir,
            host: non_empty(self.host).unwrap_or_else(default_host),
            metadir: self.metadir,
            datadir: self.datadir,
            destination_database,
            source_database,
            retention,
            shard,
            retry: self.retry,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Validated inputs for one restore run.
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    backup_dir: PathBuf,
    host: String,
    metadir: Option<PathBuf>,
    datadir: Option<PathBuf>,
    destination_database: String,
    source_database: String,
    retention: Option<String>,
    shard: Option<u64>,
    retry: RetryPolicy,
}

impl RestoreConfig {
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn metadir(&self) -> Option<&Path> {
        self.metadir.as_deref()
    }

    pub fn datadir(&self) -> Option<&Path> {
        self.datadir.as_deref()
    }

    pub fn destination_database(&self) -> &str {
        &self.destination_database
    }

    pub fn source_database(&self) -> &str {
        &self.source_database
    }

    pub fn retention(&self) -> Option<&str> {
        self.retention.as_deref()
    }

    /// Restrict the upload to the archive of this legacy shard ID.
    pub fn shard(&self) -> Option<u64> {
        self.shard
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}
