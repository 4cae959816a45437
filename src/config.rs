// src/config.rs

//! Manages controller configuration: loading, per-field defaults, and
//! validation.

use crate::core::model::{AdminConfig, WorkerConfig};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

/// Which `StateStore` backend to construct at startup. Consumed only here
/// — no worker or handler downstream of `StateStore` inspects this flag.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateBackendKind {
    Local,
    Remote,
}

impl Default for StateBackendKind {
    fn default() -> Self {
        Self::Local
    }
}

/// Connection parameters for the remote key-value table backend. Only
/// meaningful when `state_backend = "remote"`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RemoteTableConfig {
    #[serde(default = "default_remote_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_remote_table_name")]
    pub table_name: String,
    #[serde(default)]
    pub region: Option<String>,
}

fn default_remote_endpoint() -> String {
    "http://localhost:8070".to_string()
}
fn default_remote_table_name() -> String {
    "repo-sync-controller".to_string()
}

/// Where and how the Secret Store's encrypted credential blob is kept.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SecretStoreConfig {
    #[serde(default = "default_secrets_path")]
    pub path: String,
    #[serde(default = "default_secrets_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

impl Default for SecretStoreConfig {
    fn default() -> Self {
        Self {
            path: default_secrets_path(),
            cache_ttl_seconds: default_secrets_cache_ttl(),
        }
    }
}

fn default_secrets_path() -> String {
    "data/secrets.json".to_string()
}
fn default_secrets_cache_ttl() -> u64 {
    60
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8878
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_state_file_path() -> String {
    "data/state.json".to_string()
}
fn default_backup_dir() -> String {
    "data/backups".to_string()
}
fn default_backup_retain_count() -> usize {
    24
}
fn default_backup_interval_minutes() -> u32 {
    60
}
fn default_migration_cli_path() -> String {
    "migration-cli".to_string()
}

/// The raw shape read from TOML; field-for-field identical to [`Config`]
/// except it exists purely so every field can carry `#[serde(default)]`
/// without polluting the resolved type with serde attributes.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    state_backend: StateBackendKind,
    #[serde(default = "default_state_file_path")]
    state_file_path: String,
    #[serde(default = "default_backup_dir")]
    backup_dir: String,
    #[serde(default = "default_backup_retain_count")]
    backup_retain_count: usize,
    #[serde(default = "default_backup_interval_minutes")]
    backup_interval_minutes: u32,
    #[serde(default)]
    remote_table: RemoteTableConfig,
    #[serde(default)]
    secret_store: SecretStoreConfig,
    #[serde(default = "default_migration_cli_path")]
    migration_cli_path: String,
    #[serde(default)]
    worker: WorkerConfig,
    #[serde(default)]
    admin: AdminConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            state_backend: StateBackendKind::default(),
            state_file_path: default_state_file_path(),
            backup_dir: default_backup_dir(),
            backup_retain_count: default_backup_retain_count(),
            backup_interval_minutes: default_backup_interval_minutes(),
            remote_table: RemoteTableConfig::default(),
            secret_store: SecretStoreConfig::default(),
            migration_cli_path: default_migration_cli_path(),
            worker: WorkerConfig::default(),
            admin: AdminConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// The final, validated controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub state_backend: StateBackendKind,
    pub state_file_path: String,
    pub backup_dir: String,
    pub backup_retain_count: usize,
    pub backup_interval_minutes: u32,
    pub remote_table: RemoteTableConfig,
    pub secret_store: SecretStoreConfig,
    pub migration_cli_path: String,
    pub worker: WorkerConfig,
    pub admin: AdminConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        let raw = RawConfig::default();
        Self {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            state_backend: raw.state_backend,
            state_file_path: raw.state_file_path,
            backup_dir: raw.backup_dir,
            backup_retain_count: raw.backup_retain_count,
            backup_interval_minutes: raw.backup_interval_minutes,
            remote_table: raw.remote_table,
            secret_store: raw.secret_store,
            migration_cli_path: raw.migration_cli_path,
            worker: raw.worker,
            admin: raw.admin,
            metrics: raw.metrics,
        }
    }
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig =
            toml::from_str(&contents).with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            state_backend: raw.state_backend,
            state_file_path: raw.state_file_path,
            backup_dir: raw.backup_dir,
            backup_retain_count: raw.backup_retain_count,
            backup_interval_minutes: raw.backup_interval_minutes,
            remote_table: raw.remote_table,
            secret_store: raw.secret_store,
            migration_cli_path: raw.migration_cli_path,
            worker: raw.worker,
            admin: raw.admin,
            metrics: raw.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration, rejecting nonsensical
    /// combinations at startup rather than deep inside a worker.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }

        if self.state_backend == StateBackendKind::Local && self.state_file_path.trim().is_empty() {
            return Err(anyhow!("state_file_path cannot be empty when state_backend = local"));
        }
        if self.state_backend == StateBackendKind::Remote && self.remote_table.table_name.trim().is_empty() {
            return Err(anyhow!("remote_table.table_name cannot be empty when state_backend = remote"));
        }
        if self.backup_retain_count == 0 {
            warn!("backup_retain_count is 0: no state backups will be retained");
        }

        self.worker
            .validate()
            .map_err(|e| anyhow!("invalid worker configuration: {e}"))?;

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!("metrics.port cannot be the same as the main server port"));
            }
        }

        if self.migration_cli_path.trim().is_empty() {
            return Err(anyhow!("migration_cli_path cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = Config::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn metrics_port_colliding_with_main_port_is_rejected() {
        let mut config = Config::default();
        config.metrics.enabled = true;
        config.metrics.port = config.port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn remote_backend_requires_table_name() {
        let mut config = Config::default();
        config.state_backend = StateBackendKind::Remote;
        config.remote_table.table_name = String::new();
        assert!(config.validate().is_err());
    }
}
