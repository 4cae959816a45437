// src/core/state/remote.rs

//! The remote backend: every sync and repo is a row in a composite-key
//! key-value table, keyed `(pk, sk)`. On startup the table is
//! paginated-scanned once into the same in-memory [`Cache`] the local
//! backend uses; every mutation after that is written through
//! synchronously. Credentials are never persisted here — only a redacted
//! `SyncConfig`, which never carries them in the first place.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::info;

use crate::core::errors::{ControllerError, Result};
use crate::core::model::{AdminConfig, WorkerConfig};
use crate::core::state::cache::Cache;

pub const PK_SYNC: &str = "SYNC";
pub const PK_REPO: &str = "REPO";
pub const PK_CONFIG: &str = "CONFIG";
pub const SK_WORKER_CONFIG: &str = "WORKER_CONFIG";
pub const SK_ADMIN_CONFIG: &str = "ADMIN_CONFIG";

/// One row of the remote table, identified by its composite key.
#[derive(Clone, Debug)]
pub struct TableRow {
    pub pk: String,
    pub sk: String,
    pub item: serde_json::Value,
}

/// The generic capability a remote key-value table backend must provide.
/// Kept deliberately small so a concrete table client (HTTP-based here, or
/// a vendor SDK in a real deployment) only has three operations to
/// implement.
#[async_trait]
pub trait RemoteTableClient: Send + Sync {
    async fn scan_all(&self) -> Result<Vec<TableRow>>;
    async fn put_item(&self, row: TableRow) -> Result<()>;
    async fn delete_item(&self, pk: &str, sk: &str) -> Result<()>;
}

/// A [`RemoteTableClient`] that speaks to a generic HTTP key-value table
/// service: `GET {base}/scan?cursor=` for pagination, `PUT {base}/items`,
/// `DELETE {base}/items/{pk}/{sk}`.
pub struct HttpTableClient {
    http: reqwest::Client,
    base_url: String,
    table_name: String,
}

impl HttpTableClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            table_name: table_name.into(),
        }
    }
}

#[derive(serde::Deserialize)]
struct ScanPage {
    items: Vec<RawRow>,
    next_cursor: Option<String>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RawRow {
    pk: String,
    sk: String,
    item: serde_json::Value,
}

#[async_trait]
impl RemoteTableClient for HttpTableClient {
    async fn scan_all(&self) -> Result<Vec<TableRow>> {
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(format!("{}/tables/{}/scan", self.base_url, self.table_name));
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }
            let page: ScanPage = request.send().await?.json().await?;
            rows.extend(page.items.into_iter().map(|r| TableRow {
                pk: r.pk,
                sk: r.sk,
                item: r.item,
            }));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(rows)
    }

    async fn put_item(&self, row: TableRow) -> Result<()> {
        let body = RawRow {
            pk: row.pk,
            sk: row.sk,
            item: row.item,
        };
        let response = self
            .http
            .put(format!("{}/tables/{}/items", self.base_url, self.table_name))
            .json(&body)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ControllerError::Persistence(format!(
                "remote table put failed with {}",
                response.status()
            )))
        }
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/tables/{}/items/{}/{}", self.base_url, self.table_name, pk, sk))
            .send()
            .await?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(ControllerError::Persistence(format!(
                "remote table delete failed with {}",
                response.status()
            )))
        }
    }
}

/// Remote, table-backed state storage. The write-through discipline means
/// there is no debounce here — every mutation is durable by the time the
/// caller's future resolves.
pub struct RemoteBackend {
    pub(crate) cache: Arc<Mutex<Cache>>,
    client: Arc<dyn RemoteTableClient>,
}

impl RemoteBackend {
    /// Performs the one-time paginated startup scan, populating `cache`
    /// from every `SYNC#`/`REPO#` row found.
    pub async fn open(client: Arc<dyn RemoteTableClient>) -> Result<Self> {
        let rows = client.scan_all().await?;
        let mut cache = Cache::new();
        let mut sync_count = 0;
        let mut repo_count = 0;
        for row in rows {
            match row.pk.as_str() {
                PK_SYNC => {
                    if let Ok(sync) = serde_json::from_value(row.item) {
                        cache.upsert_sync(sync);
                        sync_count += 1;
                    }
                }
                PK_REPO => {
                    if let Ok(repo) = serde_json::from_value(row.item) {
                        cache.upsert_repo(repo);
                        repo_count += 1;
                    }
                }
                _ => {}
            }
        }
        cache.clear_dirty();
        info!(sync_count, repo_count, "loaded state from remote table");
        Ok(Self {
            cache: Arc::new(Mutex::new(cache)),
            client,
        })
    }

    pub(crate) async fn put_sync_row<T: Serialize>(&self, id: &str, value: &T) -> Result<()> {
        self.client
            .put_item(TableRow {
                pk: PK_SYNC.into(),
                sk: format!("SYNC#{id}"),
                item: serde_json::to_value(value)?,
            })
            .await
    }

    pub(crate) async fn delete_sync_row(&self, id: &str) -> Result<()> {
        self.client.delete_item(PK_SYNC, &format!("SYNC#{id}")).await
    }

    pub(crate) async fn put_repo_row<T: Serialize>(&self, id: &str, value: &T) -> Result<()> {
        self.client
            .put_item(TableRow {
                pk: PK_REPO.into(),
                sk: format!("REPO#{id}"),
                item: serde_json::to_value(value)?,
            })
            .await
    }

    pub async fn put_worker_config(&self, config: &WorkerConfig) -> Result<()> {
        self.client
            .put_item(TableRow {
                pk: PK_CONFIG.into(),
                sk: SK_WORKER_CONFIG.into(),
                item: serde_json::to_value(config)?,
            })
            .await
    }

    pub async fn put_admin_config(&self, config: &AdminConfig) -> Result<()> {
        self.client
            .put_item(TableRow {
                pk: PK_CONFIG.into(),
                sk: SK_ADMIN_CONFIG.into(),
                item: serde_json::to_value(config)?,
            })
            .await
    }

    pub async fn fetch_config<T: DeserializeOwned>(&self, sk: &str) -> Result<Option<T>> {
        let rows = self.client.scan_all().await?;
        for row in rows {
            if row.pk == PK_CONFIG && row.sk == sk {
                return Ok(Some(serde_json::from_value(row.item)?));
            }
        }
        Ok(None)
    }
}
