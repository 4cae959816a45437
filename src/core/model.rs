// src/core/model.rs

//! The canonical data model owned by the State Store: sync configurations,
//! repo records, and the process-wide worker/admin configuration singletons.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An opaque, unique identifier for a [`SyncConfig`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct SyncId(pub String);

impl SyncId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SyncId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque identifier for a [`RepoRecord`], unique across all syncs.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct RepoId(pub String);

impl RepoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RepoId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One side (source or target) of a sync pair.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostEndpoint {
    pub host_label: String,
    pub rest_base: String,
    pub graphql_url: String,
    pub enterprise: bool,
    pub org: String,
}

/// A source-org -> target-org replication pair.
///
/// Credentials are never embedded here; they live in the Secret Store keyed
/// by `id`. A `SyncConfig` read from a persisted backend always has its
/// token fields absent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    pub id: SyncId,
    pub name: String,
    pub source: HostEndpoint,
    pub target: HostEndpoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    #[serde(default)]
    pub archived: bool,
}

/// The public GitHub API root, used whenever an endpoint's URL is absent or
/// already points at the public host.
const PUBLIC_REST_BASE: &str = "https://api.github.com";
const PUBLIC_GRAPHQL_URL: &str = "https://api.github.com/graphql";
const PUBLIC_HOST_LABEL: &str = "github.com";

impl HostEndpoint {
    /// Derives `{restBase, graphqlUrl, hostLabel}` from an optional URL and
    /// an org name. An empty/absent URL, or one pointing at the public host,
    /// resolves to the public API roots; any other URL is treated as the
    /// REST base and its GraphQL URL is `<scheme>://<host>/api/graphql`.
    pub fn derive(url: Option<&str>, org: &str, enterprise: bool) -> Self {
        let trimmed = url.map(str::trim).filter(|u| !u.is_empty());
        match trimmed {
            None => Self::public(org),
            Some(raw) => match url::Url::parse(raw) {
                Ok(parsed) if is_public_host(parsed.host_str()) => Self::public(org),
                Ok(parsed) => {
                    let host = parsed.host_str().unwrap_or(PUBLIC_HOST_LABEL).to_string();
                    let scheme = parsed.scheme();
                    let rest_base = raw.trim_end_matches('/').to_string();
                    Self {
                        host_label: host.clone(),
                        rest_base,
                        graphql_url: format!("{scheme}://{host}/api/graphql"),
                        enterprise,
                        org: org.to_string(),
                    }
                }
                Err(_) => Self::public(org),
            },
        }
    }

    fn public(org: &str) -> Self {
        Self {
            host_label: PUBLIC_HOST_LABEL.to_string(),
            rest_base: PUBLIC_REST_BASE.to_string(),
            graphql_url: PUBLIC_GRAPHQL_URL.to_string(),
            enterprise: false,
            org: org.to_string(),
        }
    }
}

fn is_public_host(host: Option<&str>) -> bool {
    matches!(host, Some(h) if h.eq_ignore_ascii_case(PUBLIC_HOST_LABEL) || h.eq_ignore_ascii_case("api.github.com"))
}

impl SyncConfig {
    /// Whether the org/enterprise fields of either endpoint would change if
    /// replaced with `new_source`/`new_target`. A `true` result means every
    /// owned active [`RepoRecord`] must be reclassified to `unknown`.
    pub fn classification_invalidated_by(
        &self,
        new_source: &HostEndpoint,
        new_target: &HostEndpoint,
    ) -> bool {
        self.source.org != new_source.org
            || self.source.enterprise != new_source.enterprise
            || self.target.org != new_target.org
            || self.target.enterprise != new_target.enterprise
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Internal,
}

/// The lifecycle state of a single repository under a sync.
///
/// Transitions: `unknown -> unsynced -> queued -> syncing -> {synced | failed}`,
/// with re-entry to `unsynced` (retry) and to `unknown` (timeout or config
/// change) permitted at any point before a terminal state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RepoStatus {
    Unknown,
    Unsynced,
    Queued,
    Syncing,
    Synced,
    Failed,
    Deleted,
}

impl RepoStatus {
    pub fn is_in_flight(self) -> bool {
        matches!(self, RepoStatus::Queued | RepoStatus::Syncing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RepoStatus::Synced | RepoStatus::Failed)
    }
}

/// Optional, source-derived repository metadata refreshed by the Status Worker.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RepoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_language: Option<String>,
    #[serde(default)]
    pub language_sizes: HashMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_kb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_count: Option<u64>,
    #[serde(default)]
    pub archived_at_source: bool,
}

/// Describes a downloaded migration log, persisted by the Progress Worker's
/// post-terminal hook (local backend only).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogsDescriptor {
    pub path: String,
    pub downloaded_at: DateTime<Utc>,
}

/// A single repository tracked under a [`SyncConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoRecord {
    pub id: RepoId,
    pub sync_id: SyncId,
    pub name: String,
    pub visibility: Visibility,
    pub status: RepoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<i64>,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pushed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RepoMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogsDescriptor>,
}

impl RepoRecord {
    pub fn new(sync_id: SyncId, name: String, visibility: Visibility, now: DateTime<Utc>) -> Self {
        Self {
            id: RepoId::new(),
            sync_id,
            name,
            visibility,
            status: RepoStatus::Unknown,
            migration_id: None,
            queued_at: None,
            started_at: None,
            ended_at: None,
            elapsed_seconds: None,
            last_update: now,
            last_polled_at: None,
            last_checked: None,
            last_pushed: None,
            error_message: None,
            archived: false,
            metadata: None,
            logs: None,
        }
    }
}

fn default_discovery_interval() -> u32 {
    1
}
fn default_status_interval() -> u32 {
    1
}
fn default_recheck_age() -> u32 {
    5
}
fn default_batch_size() -> u32 {
    1
}
fn default_migration_interval() -> u32 {
    1
}
fn default_max_concurrent_queued() -> u32 {
    10
}
fn default_progress_interval() -> u32 {
    1
}
fn default_stale_timeout() -> u32 {
    120
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryWorkerConfig {
    #[serde(default = "default_discovery_interval")]
    pub run_interval_minutes: u32,
}

impl Default for DiscoveryWorkerConfig {
    fn default() -> Self {
        Self {
            run_interval_minutes: default_discovery_interval(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusWorkerConfig {
    #[serde(default = "default_status_interval")]
    pub run_interval_minutes: u32,
    #[serde(default = "default_recheck_age")]
    pub recheck_age_minutes: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for StatusWorkerConfig {
    fn default() -> Self {
        Self {
            run_interval_minutes: default_status_interval(),
            recheck_age_minutes: default_recheck_age(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationWorkerConfig {
    #[serde(default = "default_migration_interval")]
    pub run_interval_minutes: u32,
    #[serde(default = "default_max_concurrent_queued")]
    pub max_concurrent_queued: u32,
}

impl Default for MigrationWorkerConfig {
    fn default() -> Self {
        Self {
            run_interval_minutes: default_migration_interval(),
            max_concurrent_queued: default_max_concurrent_queued(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressWorkerConfig {
    #[serde(default = "default_progress_interval")]
    pub run_interval_minutes: u32,
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_minutes: u32,
}

impl Default for ProgressWorkerConfig {
    fn default() -> Self {
        Self {
            run_interval_minutes: default_progress_interval(),
            stale_timeout_minutes: default_stale_timeout(),
        }
    }
}

/// Process-wide, persisted tuning knobs for the four workers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub discovery: DiscoveryWorkerConfig,
    #[serde(default)]
    pub status: StatusWorkerConfig,
    #[serde(default)]
    pub migration: MigrationWorkerConfig,
    #[serde(default)]
    pub progress: ProgressWorkerConfig,
}

impl WorkerConfig {
    /// Validates the configured ranges from spec.md §6. Called whenever an
    /// operator updates the config via `PUT /api/worker-config`.
    pub fn validate(&self) -> Result<(), String> {
        fn in_range(value: u32, lo: u32, hi: u32, field: &str) -> Result<(), String> {
            if value < lo || value > hi {
                Err(format!("{field} must be between {lo} and {hi}, got {value}"))
            } else {
                Ok(())
            }
        }
        in_range(
            self.discovery.run_interval_minutes,
            1,
            60,
            "discovery.runIntervalMinutes",
        )?;
        in_range(
            self.status.run_interval_minutes,
            1,
            60,
            "status.runIntervalMinutes",
        )?;
        in_range(
            self.status.recheck_age_minutes,
            1,
            60,
            "status.recheckAgeMinutes",
        )?;
        in_range(self.status.batch_size, 1, 50, "status.batchSize")?;
        in_range(
            self.migration.run_interval_minutes,
            1,
            60,
            "migration.runIntervalMinutes",
        )?;
        in_range(
            self.migration.max_concurrent_queued,
            1,
            100,
            "migration.maxConcurrentQueued",
        )?;
        in_range(
            self.progress.run_interval_minutes,
            1,
            60,
            "progress.runIntervalMinutes",
        )?;
        in_range(
            self.progress.stale_timeout_minutes,
            30,
            1440,
            "progress.staleTimeoutMinutes",
        )?;
        Ok(())
    }
}

/// Toggle and allowlist for the policy layer that gates mutating API calls.
/// Parsing operator identity out of request headers is out of scope here;
/// the core only consumes `is_allowed`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    pub enabled: bool,
    pub allowlist: Vec<String>,
}

impl AdminConfig {
    pub fn is_allowed(&self, operator: &str) -> bool {
        !self.enabled || self.allowlist.iter().any(|a| a == operator)
    }
}
