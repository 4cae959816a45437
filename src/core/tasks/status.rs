// src/core/tasks/status.rs

//! The Status Worker: picks the stalest/unknown repos per sync and
//! compares source vs target to classify them `synced`/`unsynced`,
//! refreshing metadata along the way.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tracing::{error, info};

use crate::core::metrics::WORKER_TICKS_TOTAL;
use crate::core::model::{RepoRecord, RepoStatus, SyncConfig, WorkerConfig};
use crate::core::provider::ProviderClient;
use crate::core::state::StateStore;
use crate::core::tasks::generation::Generation;
use crate::core::tasks::handle::{WorkerCommand, WorkerStatus};

const IDLE_SLEEP_AFTER_WORK: Duration = Duration::from_millis(100);

pub struct StatusWorker {
    store: Arc<StateStore>,
    provider: Arc<dyn ProviderClient>,
    worker_config: Arc<RwLock<WorkerConfig>>,
    status: WorkerStatus,
    generation: Arc<Generation>,
}

impl StatusWorker {
    pub fn new(
        store: Arc<StateStore>,
        provider: Arc<dyn ProviderClient>,
        worker_config: Arc<RwLock<WorkerConfig>>,
        status: WorkerStatus,
        generation: Arc<Generation>,
    ) -> Self {
        Self {
            store,
            provider,
            worker_config,
            status,
            generation,
        }
    }

    pub async fn run(self, mut commands: watch::Receiver<WorkerCommand>) {
        loop {
            if !self.status.is_running() {
                match commands.changed().await {
                    Ok(()) => {
                        if matches!(*commands.borrow_and_update(), WorkerCommand::Stop) {
                            continue;
                        }
                        self.status.set_running(true);
                    }
                    Err(_) => return,
                }
            }

            let my_generation = self.generation.current();
            let did_work = self.run_all_syncs().await;
            self.status.record_run().await;

            let wait = if did_work {
                IDLE_SLEEP_AFTER_WORK
            } else {
                let minutes = self.worker_config.read().await.status.run_interval_minutes;
                Duration::from_secs(minutes as u64 * 60)
            };
            let next_at = Utc::now() + chrono::Duration::from_std(wait).unwrap_or_default();
            self.status.set_next_run_at(Some(next_at)).await;

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = commands.changed() => {
                    match changed {
                        Ok(()) => {
                            if *commands.borrow_and_update() == WorkerCommand::Stop {
                                self.status.set_running(false);
                            }
                        }
                        Err(_) => return,
                    }
                }
            }

            if !self.generation.is_current(my_generation) {
                continue;
            }
        }
    }

    fn should_stop(&self, captured_generation: u64) -> bool {
        !self.status.is_running() || !self.generation.is_current(captured_generation)
    }

    async fn run_all_syncs(&self) -> bool {
        let mut did_work = false;
        let my_generation = self.generation.current();
        for sync in self.store.list_syncs().await {
            if self.should_stop(my_generation) {
                break;
            }
            if !sync.enabled || sync.archived {
                continue;
            }
            WORKER_TICKS_TOTAL.with_label_values(&["status"]).inc();
            match self.run_one_sync(&sync, my_generation).await {
                Ok(checked) => did_work |= checked,
                Err(e) => error!(sync = %sync.name, error = %e, "status iteration failed"),
            }
        }
        self.status.set_current(None).await;
        did_work
    }

    async fn select_batch(&self, sync: &SyncConfig, batch_size: usize) -> Vec<RepoRecord> {
        let repos = self.store.list_active_repos(&sync.id).await;
        let mut unknown: Vec<_> = repos.iter().filter(|r| r.status == RepoStatus::Unknown).cloned().collect();
        if !unknown.is_empty() {
            unknown.truncate(batch_size);
            return unknown;
        }
        let mut stale: Vec<_> = repos
            .into_iter()
            .filter(|r| !matches!(r.status, RepoStatus::Unknown | RepoStatus::Queued | RepoStatus::Syncing))
            .collect();
        stale.sort_by_key(|r| r.last_checked.unwrap_or(chrono::DateTime::<Utc>::MIN_UTC));
        stale.truncate(batch_size);
        stale
    }

    async fn run_one_sync(&self, sync: &SyncConfig, my_generation: u64) -> crate::core::errors::Result<bool> {
        let Some(view) = self.store.runtime_view(&sync.id).await? else {
            return Ok(false);
        };
        let (Some(source_token), Some(target_token)) = (view.source_token, view.target_token) else {
            return Ok(false);
        };

        let recheck_minutes;
        let batch_size;
        {
            let config = self.worker_config.read().await;
            recheck_minutes = config.status.recheck_age_minutes;
            batch_size = config.status.batch_size as usize;
        }
        let recheck_cutoff = Utc::now() - chrono::Duration::minutes(recheck_minutes as i64);

        let mut batch = self.select_batch(sync, batch_size).await;
        batch.retain(|r| r.status == RepoStatus::Unknown || r.last_checked.is_none_or(|t| t < recheck_cutoff));

        let mut did_work = false;
        for repo in batch {
            if self.should_stop(my_generation) {
                break;
            }
            self.status.set_current(Some(format!("{}/{}", sync.name, repo.name))).await;
            self.check_one_repo(sync, &repo, &source_token, &target_token).await?;
            did_work = true;
        }
        Ok(did_work)
    }

    async fn check_one_repo(
        &self,
        sync: &SyncConfig,
        repo: &RepoRecord,
        source_token: &str,
        target_token: &str,
    ) -> crate::core::errors::Result<()> {
        let target = self.provider.repo_timestamps(&sync.target, target_token, &repo.name).await?;
        let source = self.provider.repo_timestamps(&sync.source, source_token, &repo.name).await?;
        let source_pushed_at = source.and_then(|t| t.pushed_at);
        let needs_migration = match target.and_then(|t| t.pushed_at) {
            None => true,
            Some(target_pushed) => match source_pushed_at {
                Some(source_pushed) => source_pushed > target_pushed,
                None => true,
            },
        };
        let metadata = self.provider.fetch_repo_metadata(&sync.source, source_token, &repo.name).await.ok();

        let new_status = if needs_migration { RepoStatus::Unsynced } else { RepoStatus::Synced };
        let mut updated = repo.clone();
        updated.status = new_status;
        updated.last_checked = Some(Utc::now());
        updated.last_pushed = source_pushed_at;
        updated.last_update = Utc::now();
        if let Some(meta) = metadata {
            updated.metadata = Some(meta);
        }
        self.store.upsert_repo(updated).await?;
        info!(sync = %sync.name, repo = %repo.name, status = %new_status, "status check complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{HostEndpoint, RepoMetadata, SyncId, Visibility};
    use crate::core::provider::{DiscoveredRepo, MigrationNode, RepoTimestamps, TokenValidation};
    use crate::core::secrets::{FileSecretBackend, SyncCredentials};
    use crate::core::state::local::LocalBackend;
    use async_trait::async_trait;
    use std::time::Duration as StdDuration;

    struct FakeProvider {
        source_pushed_at: Option<chrono::DateTime<Utc>>,
        target_exists: bool,
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        async fn list_org_repos(&self, _e: &HostEndpoint, _t: &str) -> crate::core::errors::Result<Vec<DiscoveredRepo>> {
            Ok(vec![])
        }
        async fn repo_timestamps(&self, endpoint: &HostEndpoint, _t: &str, _n: &str) -> crate::core::errors::Result<Option<RepoTimestamps>> {
            if endpoint.host_label.contains("target") && !self.target_exists {
                return Ok(None);
            }
            if endpoint.host_label.contains("target") {
                return Ok(Some(RepoTimestamps { pushed_at: None }));
            }
            Ok(Some(RepoTimestamps { pushed_at: self.source_pushed_at }))
        }
        async fn fetch_repo_metadata(&self, _e: &HostEndpoint, _t: &str, _n: &str) -> crate::core::errors::Result<RepoMetadata> {
            Ok(RepoMetadata::default())
        }
        async fn delete_repo(&self, _e: &HostEndpoint, _t: &str, _n: &str) -> crate::core::errors::Result<()> {
            Ok(())
        }
        async fn validate_token(&self, _e: &HostEndpoint, _t: &str) -> crate::core::errors::Result<TokenValidation> {
            Ok(TokenValidation { scopes: vec![], is_fine_grained: false, saml_sso_required: false })
        }
        async fn org_exists(&self, _e: &HostEndpoint, _t: &str) -> crate::core::errors::Result<bool> {
            Ok(true)
        }
        async fn fetch_migration_node(&self, _e: &HostEndpoint, _t: &str, _id: &str) -> crate::core::errors::Result<Option<MigrationNode>> {
            Ok(None)
        }
    }

    async fn test_store(dir: &tempfile::TempDir) -> Arc<StateStore> {
        let backend = LocalBackend::open(dir.path().join("state.json"), dir.path().join("backups"), 24)
            .await
            .unwrap();
        let secrets = Arc::new(crate::core::secrets::SecretStore::new(
            Arc::new(FileSecretBackend::new(dir.path().join("secrets.json"))),
            StdDuration::from_secs(60),
        ));
        Arc::new(StateStore::local(backend, secrets))
    }

    #[tokio::test]
    async fn unknown_repo_with_absent_target_classifies_unsynced() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let mut source_endpoint = HostEndpoint::derive(None, "acme", false);
        source_endpoint.host_label = "source.example.com".into();
        let mut target_endpoint = source_endpoint.clone();
        target_endpoint.host_label = "target.example.com".into();
        let now = Utc::now();
        let sync = SyncConfig {
            id: SyncId::new(),
            name: "acme-mirror".into(),
            source: source_endpoint,
            target: target_endpoint,
            created_at: now,
            updated_at: now,
            last_synced_at: None,
            enabled: true,
            archived: false,
        };
        store.upsert_sync(sync.clone()).await.unwrap();
        store
            .secrets()
            .put(&sync.id, SyncCredentials { source_token: Some("s".into()), target_token: Some("t".into()) })
            .await
            .unwrap();
        let repo = RepoRecord::new(sync.id.clone(), "alpha".into(), Visibility::Private, now);
        store.upsert_repo(repo.clone()).await.unwrap();

        let pushed_at = "2024-01-10T00:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap();
        let provider: Arc<dyn ProviderClient> = Arc::new(FakeProvider { source_pushed_at: Some(pushed_at), target_exists: false });
        let worker = StatusWorker::new(
            store.clone(),
            provider,
            Arc::new(RwLock::new(WorkerConfig::default())),
            WorkerStatus::new(),
            Arc::new(Generation::new()),
        );
        worker.run_one_sync(&sync, 0).await.unwrap();

        let updated = store.get_repo(&repo.id).await.unwrap();
        assert_eq!(updated.status, RepoStatus::Unsynced);
        assert_eq!(updated.last_pushed, Some(pushed_at));
        assert!(updated.last_checked.is_some());
    }
}
