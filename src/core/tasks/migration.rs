// src/core/tasks/migration.rs

//! The Migration Worker: converts `unsynced` repos into provider-side
//! migration jobs, honoring a global (not per-sync) concurrency cap
//! re-checked against live state before every enqueue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

use crate::core::metrics::{IN_FLIGHT_REPOS, MIGRATION_ENQUEUES_TOTAL, WORKER_TICKS_TOTAL};
use crate::core::model::{RepoRecord, RepoStatus, SyncConfig, WorkerConfig};
use crate::core::provider::cli::{self, CliOutcome};
use crate::core::provider::ProviderClient;
use crate::core::state::StateStore;
use crate::core::tasks::generation::Generation;
use crate::core::tasks::handle::{WorkerCommand, WorkerStatus};

pub struct MigrationWorker {
    store: Arc<StateStore>,
    provider: Arc<dyn ProviderClient>,
    worker_config: Arc<RwLock<WorkerConfig>>,
    status: WorkerStatus,
    generation: Arc<Generation>,
    cli_binary_path: String,
}

impl MigrationWorker {
    pub fn new(
        store: Arc<StateStore>,
        provider: Arc<dyn ProviderClient>,
        worker_config: Arc<RwLock<WorkerConfig>>,
        status: WorkerStatus,
        generation: Arc<Generation>,
        cli_binary_path: String,
    ) -> Self {
        Self {
            store,
            provider,
            worker_config,
            status,
            generation,
            cli_binary_path,
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
            self.run_tick().await;
            self.status.record_run().await;

            let minutes = self.worker_config.read().await.migration.run_interval_minutes;
            let wait = Duration::from_secs(minutes as u64 * 60);
            let next_at = Utc::now() + chrono::Duration::minutes(minutes as i64);
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

    async fn run_tick(&self) {
        for sync in self.store.list_syncs().await {
            if !sync.enabled || sync.archived {
                continue;
            }
            let cap = self.worker_config.read().await.migration.max_concurrent_queued as usize;
            if self.store.count_in_flight().await >= cap {
                return;
            }
            WORKER_TICKS_TOTAL.with_label_values(&["migration"]).inc();
            if let Err(e) = self.enqueue_one_for_sync(&sync, cap).await {
                error!(sync = %sync.name, error = %e, "migration tick failed");
            }
        }
        IN_FLIGHT_REPOS.set(self.store.count_in_flight().await as f64);
        self.status.set_current(None).await;
    }

    async fn enqueue_one_for_sync(&self, sync: &SyncConfig, cap: usize) -> crate::core::errors::Result<()> {
        if self.store.count_in_flight().await >= cap {
            return Ok(());
        }
        let repos = self.store.list_active_repos(&sync.id).await;
        let Some(repo) = repos.into_iter().find(|r| r.status == RepoStatus::Unsynced) else {
            return Ok(());
        };

        let Some(view) = self.store.runtime_view(&sync.id).await? else {
            return Ok(());
        };
        let (Some(source_token), Some(target_token)) = (view.source_token.clone(), view.target_token.clone()) else {
            warn!(sync = %sync.name, "migration skipped: credentials incomplete");
            return Ok(());
        };

        self.status.set_current(Some(format!("{}/{}", sync.name, repo.name))).await;
        self.enqueue_repo(sync, &repo, &source_token, &target_token).await
    }

    fn build_args_and_env(&self, sync: &SyncConfig, repo: &RepoRecord, source_token: &str, target_token: &str) -> (Vec<String>, HashMap<String, String>) {
        let mut args = vec![
            "--source-org".to_string(),
            sync.source.org.clone(),
            "--target-org".to_string(),
            sync.target.org.clone(),
            "--repo".to_string(),
            repo.name.clone(),
            "--queue-only".to_string(),
            "--visibility".to_string(),
            repo.visibility.to_string(),
        ];
        if sync.source.host_label != "github.com" {
            args.push("--source-base-url".to_string());
            args.push(sync.source.rest_base.clone());
        }
        if sync.target.host_label != "github.com" {
            args.push("--target-base-url".to_string());
            args.push(sync.target.rest_base.clone());
        }
        let mut env = HashMap::new();
        env.insert("SOURCE_TOKEN".to_string(), source_token.to_string());
        env.insert("TARGET_TOKEN".to_string(), target_token.to_string());
        (args, env)
    }

    /// Runs a single repo through the CLI, retrying once past a target-name
    /// collision. Exposed beyond this module so an operator-initiated retry
    /// can drive the exact same path the background tick uses.
    pub(crate) async fn enqueue_repo(
        &self,
        sync: &SyncConfig,
        repo: &RepoRecord,
        source_token: &str,
        target_token: &str,
    ) -> crate::core::errors::Result<()> {
        let (args, env) = self.build_args_and_env(sync, repo, source_token, target_token);
        let outcome = cli::enqueue(&self.cli_binary_path, &args, &env).await?;

        let outcome = if !outcome.succeeded() && outcome.is_target_collision() {
            info!(sync = %sync.name, repo = %repo.name, "target collision detected, deleting and retrying enqueue");
            if let Err(e) = self.provider.delete_repo(&sync.target, target_token, &repo.name).await {
                MIGRATION_ENQUEUES_TOTAL.with_label_values(&["delete_failed"]).inc();
                self.store
                    .set_status(&repo.id, RepoStatus::Failed, Some(format!("target collision, delete failed: {e}")))
                    .await?;
                return Ok(());
            }
            cli::enqueue(&self.cli_binary_path, &args, &env).await?
        } else {
            outcome
        };

        if !outcome.succeeded() {
            MIGRATION_ENQUEUES_TOTAL.with_label_values(&["cli_failure"]).inc();
            self.store
                .set_status(&repo.id, RepoStatus::Failed, Some(outcome.combined_output))
                .await?;
            return Ok(());
        }

        let Some(migration_id) = cli::extract_migration_id(&outcome.combined_output) else {
            MIGRATION_ENQUEUES_TOTAL.with_label_values(&["id_not_found"]).inc();
            self.store
                .set_status(&repo.id, RepoStatus::Failed, Some(outcome.combined_output))
                .await?;
            return Ok(());
        };

        let mut updated = repo.clone();
        updated.status = RepoStatus::Queued;
        updated.queued_at = Some(Utc::now());
        updated.migration_id = Some(migration_id);
        updated.started_at = None;
        updated.ended_at = None;
        updated.elapsed_seconds = None;
        updated.last_update = Utc::now();
        self.store.upsert_repo(updated).await?;
        MIGRATION_ENQUEUES_TOTAL.with_label_values(&["queued"]).inc();
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[derive(Default)]
    struct NoopProvider {
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for NoopProvider {
        async fn list_org_repos(&self, _e: &HostEndpoint, _t: &str) -> crate::core::errors::Result<Vec<DiscoveredRepo>> {
            Ok(vec![])
        }
        async fn repo_timestamps(&self, _e: &HostEndpoint, _t: &str, _n: &str) -> crate::core::errors::Result<Option<RepoTimestamps>> {
            Ok(None)
        }
        async fn fetch_repo_metadata(&self, _e: &HostEndpoint, _t: &str, _n: &str) -> crate::core::errors::Result<RepoMetadata> {
            Ok(RepoMetadata::default())
        }
        async fn delete_repo(&self, _e: &HostEndpoint, _t: &str, _n: &str) -> crate::core::errors::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
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

    fn sample_sync() -> SyncConfig {
        let now = Utc::now();
        let endpoint = HostEndpoint::derive(None, "acme", false);
        SyncConfig {
            id: SyncId::new(),
            name: "acme-mirror".into(),
            source: endpoint.clone(),
            target: endpoint,
            created_at: now,
            updated_at: now,
            last_synced_at: None,
            enabled: true,
            archived: false,
        }
    }

    #[tokio::test]
    async fn build_args_includes_base_urls_for_non_default_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let mut sync = sample_sync();
        sync.target = HostEndpoint::derive(Some("https://ghe.example.com/api/v3"), "acme", true);
        let worker = MigrationWorker::new(
            store,
            Arc::new(NoopProvider::default()),
            Arc::new(RwLock::new(WorkerConfig::default())),
            WorkerStatus::new(),
            Arc::new(Generation::new()),
            "migration-cli".into(),
        );
        let repo = RepoRecord::new(sync.id.clone(), "alpha".into(), Visibility::Public, Utc::now());
        let (args, env) = worker.build_args_and_env(&sync, &repo, "src-tok", "tgt-tok");
        assert!(args.contains(&"--target-base-url".to_string()));
        assert_eq!(env.get("SOURCE_TOKEN").map(String::as_str), Some("src-tok"));
    }

    #[tokio::test]
    async fn enqueue_with_target_collision_deletes_then_retries_and_queues() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let sync = sample_sync();
        store.upsert_sync(sync.clone()).await.unwrap();
        store
            .secrets()
            .put(&sync.id, SyncCredentials { source_token: Some("s".into()), target_token: Some("t".into()) })
            .await
            .unwrap();
        let mut repo = RepoRecord::new(sync.id.clone(), "alpha".into(), Visibility::Public, Utc::now());
        repo.status = RepoStatus::Unsynced;
        store.upsert_repo(repo.clone()).await.unwrap();

        // A one-shot script: first invocation reports a target-name collision
        // and fails, second invocation (post-delete) succeeds with an id.
        // `build_args_and_env` always passes the same flags regardless of
        // call count, so the script tells the calls apart with a marker file.
        let marker = dir.path().join("enqueue-marker");
        let cli_path = dir.path().join("fake-migration-cli.sh");
        let script = format!(
            "#!/bin/sh\nif [ -f {marker} ]; then echo 'migration id: 4242'; exit 0; \
             else touch {marker}; echo 'Error: target already contains a repository with the name alpha'; exit 1; fi\n",
            marker = marker.display()
        );
        std::fs::write(&cli_path, script).unwrap();
        let mut perms = std::fs::metadata(&cli_path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&cli_path, perms).unwrap();

        let provider = Arc::new(NoopProvider::default());
        let worker = MigrationWorker::new(
            store.clone(),
            provider.clone(),
            Arc::new(RwLock::new(WorkerConfig::default())),
            WorkerStatus::new(),
            Arc::new(Generation::new()),
            cli_path.to_string_lossy().into_owned(),
        );

        worker.enqueue_repo(&sync, &repo, "s", "t").await.unwrap();

        assert_eq!(provider.deletes.load(Ordering::SeqCst), 1);
        let final_repo = store.get_repo(&repo.id).await.unwrap();
        assert_eq!(final_repo.status, RepoStatus::Queued);
        assert_eq!(final_repo.migration_id.as_deref(), Some("4242"));
    }

    #[tokio::test]
    async fn admission_control_blocks_enqueue_when_cap_reached() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let sync = sample_sync();
        store.upsert_sync(sync.clone()).await.unwrap();
        store
            .secrets()
            .put(&sync.id, SyncCredentials { source_token: Some("s".into()), target_token: Some("t".into()) })
            .await
            .unwrap();
        let mut queued_repo = RepoRecord::new(sync.id.clone(), "already-queued".into(), Visibility::Public, Utc::now());
        queued_repo.status = RepoStatus::Queued;
        store.upsert_repo(queued_repo).await.unwrap();
        let mut pending_repo = RepoRecord::new(sync.id.clone(), "pending".into(), Visibility::Public, Utc::now());
        pending_repo.status = RepoStatus::Unsynced;
        store.upsert_repo(pending_repo.clone()).await.unwrap();

        let mut worker_config = WorkerConfig::default();
        worker_config.migration.max_concurrent_queued = 1;
        let worker = MigrationWorker::new(
            store.clone(),
            Arc::new(NoopProvider::default()),
            Arc::new(RwLock::new(worker_config)),
            WorkerStatus::new(),
            Arc::new(Generation::new()),
            "/bin/true".into(),
        );
        worker.run_tick().await;

        let unchanged = store.get_repo(&pending_repo.id).await.unwrap();
        assert_eq!(unchanged.status, RepoStatus::Unsynced);
    }
}
