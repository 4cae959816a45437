// src/core/tasks/progress.rs

//! The Progress Worker: drives every `queued|syncing` record to terminal by
//! polling the provider's migration-node API, reclaiming stale in-flight
//! records, and downloading migration logs once a job finishes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

use crate::core::metrics::{PROGRESS_ERRORS_TOTAL, PROGRESS_STALE_RECLAIMED_TOTAL, WORKER_TICKS_TOTAL};
use crate::core::model::{LogsDescriptor, RepoRecord, RepoStatus, SyncConfig, WorkerConfig};
use crate::core::provider::{MigrationNode, ProviderClient};
use crate::core::state::StateStore;
use crate::core::tasks::generation::Generation;
use crate::core::tasks::handle::{WorkerCommand, WorkerStatus};

const BACKOFF_AFTER_EXCEPTION: Duration = Duration::from_secs(10);

pub struct ProgressWorker {
    store: Arc<StateStore>,
    provider: Arc<dyn ProviderClient>,
    worker_config: Arc<RwLock<WorkerConfig>>,
    status: WorkerStatus,
    generation: Arc<Generation>,
    http: reqwest::Client,
}

impl ProgressWorker {
    pub fn new(
        store: Arc<StateStore>,
        provider: Arc<dyn ProviderClient>,
        worker_config: Arc<RwLock<WorkerConfig>>,
        status: WorkerStatus,
        generation: Arc<Generation>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();
        Self {
            store,
            provider,
            worker_config,
            status,
            generation,
            http,
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
            let wait = match self.run_all_syncs(my_generation).await {
                Ok(()) => {
                    let minutes = self.worker_config.read().await.progress.run_interval_minutes;
                    Duration::from_secs(minutes as u64 * 60)
                }
                Err(e) => {
                    PROGRESS_ERRORS_TOTAL.inc();
                    error!(error = %e, "progress tick failed, backing off");
                    BACKOFF_AFTER_EXCEPTION
                }
            };
            self.status.record_run().await;
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

    async fn run_all_syncs(&self, my_generation: u64) -> crate::core::errors::Result<()> {
        for sync in self.store.list_syncs().await {
            if self.should_stop(my_generation) {
                break;
            }
            if !sync.enabled || sync.archived {
                continue;
            }
            WORKER_TICKS_TOTAL.with_label_values(&["progress"]).inc();
            self.run_one_sync(&sync, my_generation).await?;
        }
        self.status.set_current(None).await;
        Ok(())
    }

    async fn run_one_sync(&self, sync: &SyncConfig, my_generation: u64) -> crate::core::errors::Result<()> {
        let Some(view) = self.store.runtime_view(&sync.id).await? else {
            return Ok(());
        };
        let Some(target_token) = view.target_token else {
            return Ok(());
        };

        let stale_minutes = self.worker_config.read().await.progress.stale_timeout_minutes;
        let stale_cutoff = Utc::now() - chrono::Duration::minutes(stale_minutes as i64);

        let in_flight: Vec<_> = self
            .store
            .list_active_repos(&sync.id)
            .await
            .into_iter()
            .filter(|r| r.status.is_in_flight())
            .collect();

        for repo in in_flight {
            if self.should_stop(my_generation) {
                break;
            }
            self.status.set_current(Some(format!("{}/{}", sync.name, repo.name))).await;
            self.poll_one_repo(sync, &repo, &target_token, stale_cutoff).await?;
        }
        Ok(())
    }

    async fn poll_one_repo(
        &self,
        sync: &SyncConfig,
        repo: &RepoRecord,
        target_token: &str,
        stale_cutoff: chrono::DateTime<Utc>,
    ) -> crate::core::errors::Result<()> {
        let in_flight_since = repo.started_at;

        let Some(migration_id) = &repo.migration_id else {
            if in_flight_since.is_some_and(|t| t < stale_cutoff) {
                self.reclaim_stale(repo, "status lost: no migration id recorded").await?;
            }
            return Ok(());
        };

        let node = self.provider.fetch_migration_node(&sync.target, target_token, migration_id).await?;
        let Some(node) = node else {
            if in_flight_since.is_some_and(|t| t < stale_cutoff) {
                self.reclaim_stale(repo, "status not found at provider").await?;
            }
            return Ok(());
        };

        let mapped = map_provider_state(&node.state);
        if mapped.is_none() {
            warn!(sync = %sync.name, repo = %repo.name, provider_state = %node.state, "unrecognized provider migration state");
        }
        let new_status = mapped.unwrap_or(RepoStatus::Unknown);

        let mut updated = repo.clone();
        updated.last_polled_at = Some(Utc::now());
        updated.last_checked = Some(Utc::now());
        self.store.upsert_repo(updated.clone()).await?;

        if new_status != repo.status {
            if let Some(persisted) = self
                .store
                .set_status(&repo.id, new_status, node.failure_reason.clone())
                .await?
            {
                updated = persisted;
            }
        }

        if new_status.is_terminal() && repo.status != new_status {
            self.download_log_if_supported(sync, &updated, &node).await;
        }
        Ok(())
    }

    async fn reclaim_stale(&self, repo: &RepoRecord, message: &str) -> crate::core::errors::Result<()> {
        PROGRESS_STALE_RECLAIMED_TOTAL.inc();
        info!(repo = %repo.name, reason = message, "reclaiming stale in-flight repo to unknown");
        let mut updated = repo.clone();
        updated.migration_id = None;
        self.store.upsert_repo(updated).await?;
        self.store.set_status(&repo.id, RepoStatus::Unknown, Some(message.to_string())).await?;
        Ok(())
    }

    async fn download_log_if_supported(&self, sync: &SyncConfig, repo: &RepoRecord, node: &MigrationNode) {
        if !self.store.supports_log_download() {
            return;
        }
        let Some(dir) = self.store.logs_dir() else {
            return;
        };
        let Some(log_url) = &node.migration_log_url else {
            return;
        };
        match self.fetch_and_persist_log(&dir, repo, log_url).await {
            Ok(descriptor) => {
                let mut updated = repo.clone();
                updated.logs = Some(descriptor);
                if let Err(e) = self.store.upsert_repo(updated).await {
                    warn!(sync = %sync.name, repo = %repo.name, error = %e, "failed to persist log descriptor");
                }
            }
            Err(e) => {
                warn!(sync = %sync.name, repo = %repo.name, error = %e, "migration log download failed, continuing without it");
            }
        }
    }

    async fn fetch_and_persist_log(&self, dir: &PathBuf, repo: &RepoRecord, log_url: &str) -> crate::core::errors::Result<LogsDescriptor> {
        tokio::fs::create_dir_all(dir).await?;
        let response = self.http.get(log_url).send().await?;
        let bytes = response.error_for_status()?.bytes().await?;
        let path = dir.join(format!("{}.log", repo.id.0));
        tokio::fs::write(&path, &bytes).await?;
        debug!(repo = %repo.name, path = %path.display(), bytes = bytes.len(), "migration log downloaded");
        Ok(LogsDescriptor {
            path: path.to_string_lossy().into_owned(),
            downloaded_at: Utc::now(),
        })
    }
}

/// Case-insensitive provider-state → internal-state mapping. `None` means
/// an unrecognized state, left to the caller to map to `unknown` + warn.
fn map_provider_state(state: &str) -> Option<RepoStatus> {
    match state.to_ascii_lowercase().as_str() {
        "pending" | "pending_validation" | "queued" => Some(RepoStatus::Queued),
        "in_progress" | "exporting" | "exported" | "importing" => Some(RepoStatus::Syncing),
        "succeeded" | "imported" => Some(RepoStatus::Synced),
        "failed" => Some(RepoStatus::Failed),
        _ => None,
    }
}
