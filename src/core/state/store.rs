// src/core/state/store.rs

//! `StateStore`: the single capability surface every worker and API handler
//! uses to read and mutate syncs and repo records. Binds one of the two
//! backends at startup from a single config flag; nothing downstream of
//! this module inspects which one is active, except `supports_log_download`
//! (see spec's open question on remote-backend log download).

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::errors::Result;
use crate::core::model::{AdminConfig, RepoId, RepoRecord, RepoStatus, SyncConfig, SyncId, WorkerConfig};
use crate::core::secrets::SecretStore;
use crate::core::state::cache::Cache;
use crate::core::state::local::LocalBackend;
use crate::core::state::remote::RemoteBackend;

/// A transient join of a stored [`SyncConfig`] with its current credentials,
/// used only at worker call sites — its lifetime never outlives the
/// operation that requested it.
#[derive(Clone)]
pub struct RuntimeView {
    pub sync: SyncConfig,
    pub source_token: Option<String>,
    pub target_token: Option<String>,
}

enum Backend {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

pub struct StateStore {
    backend: Backend,
    secrets: Arc<SecretStore>,
}

impl StateStore {
    pub fn local(backend: LocalBackend, secrets: Arc<SecretStore>) -> Self {
        Self {
            backend: Backend::Local(backend),
            secrets,
        }
    }

    pub fn remote(backend: RemoteBackend, secrets: Arc<SecretStore>) -> Self {
        Self {
            backend: Backend::Remote(backend),
            secrets,
        }
    }

    fn cache(&self) -> &Arc<Mutex<Cache>> {
        match &self.backend {
            Backend::Local(b) => &b.cache,
            Backend::Remote(b) => &b.cache,
        }
    }

    /// Access to the Secret Store, for credential-update API handlers that
    /// need to write through without going via `runtime_view`.
    pub fn secrets(&self) -> &Arc<SecretStore> {
        &self.secrets
    }

    /// Whether the post-terminal log-download hook may run. Only the local
    /// backend assumes a durable filesystem beside the state document.
    pub fn supports_log_download(&self) -> bool {
        matches!(self.backend, Backend::Local(_))
    }

    /// The directory migration logs are downloaded into. `None` under the
    /// remote backend, which assumes no durable local filesystem.
    pub fn logs_dir(&self) -> Option<std::path::PathBuf> {
        match &self.backend {
            Backend::Local(b) => Some(b.logs_dir()),
            Backend::Remote(_) => None,
        }
    }

    async fn persist_sync(&self, sync: &SyncConfig) -> Result<()> {
        match &self.backend {
            Backend::Local(b) => {
                b.schedule_flush();
                Ok(())
            }
            Backend::Remote(b) => b.put_sync_row(&sync.id.0, sync).await,
        }
    }

    async fn persist_repo(&self, repo: &RepoRecord) -> Result<()> {
        match &self.backend {
            Backend::Local(b) => {
                b.schedule_flush();
                Ok(())
            }
            Backend::Remote(b) => b.put_repo_row(&repo.id.0, repo).await,
        }
    }

    async fn persist_sync_deletion(&self, id: &SyncId) -> Result<()> {
        match &self.backend {
            Backend::Local(b) => {
                b.schedule_flush();
                Ok(())
            }
            Backend::Remote(b) => b.delete_sync_row(&id.0).await,
        }
    }

    /// Bypasses any debounce window — used by operator-initiated API calls.
    pub async fn flush_now(&self) -> Result<()> {
        match &self.backend {
            Backend::Local(b) => b.flush_now().await,
            Backend::Remote(_) => Ok(()),
        }
    }

    pub async fn rotate_backup(&self) -> Result<()> {
        match &self.backend {
            Backend::Local(b) => b.rotate_backup().await,
            Backend::Remote(_) => Ok(()),
        }
    }

    // --- Syncs ---------------------------------------------------------

    pub async fn get_sync(&self, id: &SyncId) -> Option<SyncConfig> {
        self.cache().lock().await.get_sync(id)
    }

    pub async fn list_syncs(&self) -> Vec<SyncConfig> {
        self.cache().lock().await.list_syncs()
    }

    pub async fn upsert_sync(&self, sync: SyncConfig) -> Result<()> {
        self.cache().lock().await.upsert_sync(sync.clone());
        self.persist_sync(&sync).await
    }

    pub async fn delete_sync(&self, id: &SyncId) -> Result<bool> {
        let removed = self.cache().lock().await.delete_sync(id);
        let existed = removed.is_some();
        if existed {
            self.persist_sync_deletion(id).await?;
        }
        Ok(existed)
    }

    /// Archives a sync and cascades to its repos; if the org/enterprise
    /// fields also changed, reclassifies every active repo to `unknown`.
    pub async fn archive_sync(&self, id: &SyncId) -> Result<bool> {
        let ok = {
            let mut cache = self.cache().lock().await;
            cache.archive_sync(id)
        };
        if ok && let Some(sync) = self.get_sync(id).await {
            self.persist_sync(&sync).await?;
        }
        Ok(ok)
    }

    pub async fn unarchive_sync(&self, id: &SyncId) -> Result<bool> {
        let ok = {
            let mut cache = self.cache().lock().await;
            cache.unarchive_sync(id)
        };
        if ok && let Some(sync) = self.get_sync(id).await {
            self.persist_sync(&sync).await?;
        }
        Ok(ok)
    }

    /// Applies the sync update, and if `classification_invalidated_by`
    /// fires, reclassifies every owned active repo to `unknown`.
    pub async fn update_sync_endpoints(
        &self,
        id: &SyncId,
        mut sync: SyncConfig,
    ) -> Result<()> {
        let invalidate = self
            .get_sync(id)
            .await
            .map(|existing| existing.classification_invalidated_by(&sync.source, &sync.target))
            .unwrap_or(false);
        sync.updated_at = chrono::Utc::now();
        {
            let mut cache = self.cache().lock().await;
            cache.upsert_sync(sync.clone());
            if invalidate {
                cache.invalidate_classification(id);
            }
        }
        self.persist_sync(&sync).await?;
        if invalidate {
            for repo in self.list_repos_by_sync(id).await {
                self.persist_repo(&repo).await?;
            }
        }
        Ok(())
    }

    /// Joins `sync_id`'s stored config with its current credentials. Per
    /// §9, the returned value must not outlive the calling operation.
    pub async fn runtime_view(&self, sync_id: &SyncId) -> Result<Option<RuntimeView>> {
        let Some(sync) = self.get_sync(sync_id).await else {
            return Ok(None);
        };
        let creds = self.secrets.get(sync_id).await?;
        Ok(Some(RuntimeView {
            sync,
            source_token: creds.source_token,
            target_token: creds.target_token,
        }))
    }

    // --- Repos -----------------------------------------------------------

    pub async fn get_repo(&self, id: &RepoId) -> Option<RepoRecord> {
        self.cache().lock().await.get_repo(id)
    }

    pub async fn find_by_sync_and_name(&self, sync_id: &SyncId, name: &str) -> Option<RepoRecord> {
        self.cache().lock().await.find_by_sync_and_name(sync_id, name)
    }

    pub async fn list_repos(&self) -> Vec<RepoRecord> {
        self.cache().lock().await.list_repos()
    }

    pub async fn list_repos_by_sync(&self, sync_id: &SyncId) -> Vec<RepoRecord> {
        self.cache().lock().await.list_repos_by_sync(sync_id)
    }

    pub async fn list_active_repos(&self, sync_id: &SyncId) -> Vec<RepoRecord> {
        self.cache().lock().await.list_active_repos(sync_id)
    }

    pub async fn list_incomplete_repos(&self) -> Vec<RepoRecord> {
        self.cache().lock().await.list_incomplete_repos()
    }

    pub async fn count_in_flight(&self) -> usize {
        self.cache().lock().await.count_in_flight()
    }

    pub async fn upsert_repo(&self, repo: RepoRecord) -> Result<()> {
        self.cache().lock().await.upsert_repo(repo.clone());
        self.persist_repo(&repo).await
    }

    pub async fn set_status(&self, id: &RepoId, status: RepoStatus, err: Option<String>) -> Result<Option<RepoRecord>> {
        let updated = self.cache().lock().await.set_status(id, status, err);
        if let Some(repo) = &updated {
            self.persist_repo(repo).await?;
            if status == RepoStatus::Synced
                && let Some(sync) = self.get_sync(&repo.sync_id).await
            {
                self.persist_sync(&sync).await?;
            }
        }
        Ok(updated)
    }

    // --- Worker/admin config ---------------------------------------------

    pub async fn read_worker_config(&self) -> Result<Option<WorkerConfig>> {
        match &self.backend {
            Backend::Local(b) => b.read_worker_config().await,
            Backend::Remote(b) => b.fetch_config(crate::core::state::remote::SK_WORKER_CONFIG).await,
        }
    }

    pub async fn write_worker_config(&self, config: &WorkerConfig) -> Result<()> {
        match &self.backend {
            Backend::Local(b) => b.write_worker_config(config).await,
            Backend::Remote(b) => b.put_worker_config(config).await,
        }
    }

    pub async fn read_admin_config(&self) -> Result<Option<AdminConfig>> {
        match &self.backend {
            Backend::Local(b) => b.read_admin_config().await,
            Backend::Remote(b) => b.fetch_config(crate::core::state::remote::SK_ADMIN_CONFIG).await,
        }
    }

    pub async fn write_admin_config(&self, config: &AdminConfig) -> Result<()> {
        match &self.backend {
            Backend::Local(b) => b.write_admin_config(config).await,
            Backend::Remote(b) => b.put_admin_config(config).await,
        }
    }
}
