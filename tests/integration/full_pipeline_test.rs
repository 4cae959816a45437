// tests/integration/full_pipeline_test.rs

//! Exercises Migration and Progress cooperating through the public
//! `StateStore`/`WorkerHandle` surface: Migration enqueues an `unsynced`
//! repo, Progress polls its migration node to a terminal state, and the
//! owning sync's `last_synced_at` is updated as a side effect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use repo_sync_controller::core::model::{RepoRecord, RepoStatus, WorkerConfig};
use repo_sync_controller::core::provider::MigrationNode;
use repo_sync_controller::core::secrets::SyncCredentials;
use repo_sync_controller::core::tasks::generation::Generation;
use repo_sync_controller::core::tasks::handle::{WorkerCommand, WorkerStatus};
use repo_sync_controller::core::tasks::{MigrationWorker, ProgressWorker};
use tokio::sync::{watch, RwLock};

use super::helpers::{sample_sync, sample_visibility, test_store, FakeProvider};

async fn poll_for_status(
    store: &repo_sync_controller::core::state::StateStore,
    id: &repo_sync_controller::core::model::RepoId,
    want: RepoStatus,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if store.get_repo(id).await.map(|r| r.status) == Some(want) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("repo never reached {want:?} within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn migration_enqueues_then_progress_drives_repo_to_synced() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_store(&dir).await;
    let sync = sample_sync("acme-mirror");
    store.upsert_sync(sync.clone()).await.unwrap();
    store
        .secrets()
        .put(
            &sync.id,
            SyncCredentials {
                source_token: Some("src-token".into()),
                target_token: Some("tgt-token".into()),
            },
        )
        .await
        .unwrap();

    let mut repo = RepoRecord::new(sync.id.clone(), "widgets".into(), sample_visibility(), Utc::now());
    repo.status = RepoStatus::Unsynced;
    store.upsert_repo(repo.clone()).await.unwrap();

    let worker_config = Arc::new(RwLock::new(WorkerConfig::default()));
    let provider = Arc::new(FakeProvider::default());

    // A one-shot script standing in for the migration CLI: always succeeds
    // and reports a fixed migration id.
    let cli_path = dir.path().join("migration-cli.sh");
    tokio::fs::write(&cli_path, "#!/bin/sh\necho 'migration id: 777'\nexit 0\n")
        .await
        .unwrap();
    let mut perms = tokio::fs::metadata(&cli_path).await.unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    tokio::fs::set_permissions(&cli_path, perms).await.unwrap();

    let migration = MigrationWorker::new(
        store.clone(),
        provider.clone(),
        worker_config.clone(),
        WorkerStatus::new(),
        Arc::new(Generation::new()),
        cli_path.to_string_lossy().into_owned(),
    );
    let (migration_tx, migration_rx) = watch::channel(WorkerCommand::Stop);
    let migration_task = tokio::spawn(migration.run(migration_rx));
    migration_tx.send(WorkerCommand::Start).unwrap();

    poll_for_status(&store, &repo.id, RepoStatus::Queued, Duration::from_secs(5)).await;
    migration_tx.send(WorkerCommand::Stop).unwrap();
    migration_task.abort();

    let queued = store.get_repo(&repo.id).await.unwrap();
    assert_eq!(queued.migration_id.as_deref(), Some("777"));

    provider.set_node(Some(MigrationNode {
        state: "succeeded".into(),
        created_at: Utc::now(),
        failure_reason: None,
        migration_log_url: None,
    }));

    let progress = ProgressWorker::new(
        store.clone(),
        provider.clone(),
        worker_config,
        WorkerStatus::new(),
        Arc::new(Generation::new()),
    );
    let (progress_tx, progress_rx) = watch::channel(WorkerCommand::Stop);
    let progress_task = tokio::spawn(progress.run(progress_rx));
    progress_tx.send(WorkerCommand::Start).unwrap();

    poll_for_status(&store, &repo.id, RepoStatus::Synced, Duration::from_secs(5)).await;
    progress_tx.send(WorkerCommand::Stop).unwrap();
    progress_task.abort();

    let finished = store.get_repo(&repo.id).await.unwrap();
    assert!(finished.elapsed_seconds.is_some());
    assert!(finished.ended_at.is_some());
    let owning_sync = store.get_sync(&sync.id).await.unwrap();
    assert!(owning_sync.last_synced_at.is_some());
}

#[tokio::test]
async fn retrying_a_repo_resets_it_for_a_fresh_migration_pass() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_store(&dir).await;
    let sync = sample_sync("acme-mirror");
    store.upsert_sync(sync.clone()).await.unwrap();

    let mut repo = RepoRecord::new(sync.id.clone(), "gadgets".into(), sample_visibility(), Utc::now());
    repo.status = RepoStatus::Failed;
    repo.error_message = Some("boom".into());
    repo.migration_id = Some("stale-id".into());
    store.upsert_repo(repo.clone()).await.unwrap();

    // What the retry API handler does first: reset to unsynced and clear the
    // failure bookkeeping, before driving Migration's single-repo path.
    let mut reset = store.get_repo(&repo.id).await.unwrap();
    reset.status = RepoStatus::Unsynced;
    reset.migration_id = None;
    reset.error_message = None;
    store.upsert_repo(reset).await.unwrap();

    let refreshed = store.get_repo(&repo.id).await.unwrap();
    assert_eq!(refreshed.status, RepoStatus::Unsynced);
    assert!(refreshed.migration_id.is_none());
    assert!(refreshed.error_message.is_none());
}

#[tokio::test]
async fn migration_retries_past_a_target_collision_through_the_real_worker() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_store(&dir).await;
    let sync = sample_sync("acme-mirror");
    store.upsert_sync(sync.clone()).await.unwrap();
    store
        .secrets()
        .put(
            &sync.id,
            SyncCredentials {
                source_token: Some("src-token".into()),
                target_token: Some("tgt-token".into()),
            },
        )
        .await
        .unwrap();

    let mut repo = RepoRecord::new(sync.id.clone(), "widgets".into(), sample_visibility(), Utc::now());
    repo.status = RepoStatus::Unsynced;
    store.upsert_repo(repo.clone()).await.unwrap();

    // First invocation reports a target-name collision and fails; the
    // second (post-delete) invocation succeeds with an id.
    let marker = dir.path().join("collision-marker");
    let cli_path = dir.path().join("collision-migration-cli.sh");
    let script = format!(
        "#!/bin/sh\nif [ -f {marker} ]; then echo 'migration id: 5150'; exit 0; \
         else touch {marker}; echo 'Error: target already contains a repository with the name widgets'; exit 1; fi\n",
        marker = marker.display()
    );
    tokio::fs::write(&cli_path, script).await.unwrap();
    let mut perms = tokio::fs::metadata(&cli_path).await.unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    tokio::fs::set_permissions(&cli_path, perms).await.unwrap();

    let worker_config = Arc::new(RwLock::new(WorkerConfig::default()));
    let provider = Arc::new(FakeProvider::default());
    let migration = MigrationWorker::new(
        store.clone(),
        provider,
        worker_config,
        WorkerStatus::new(),
        Arc::new(Generation::new()),
        cli_path.to_string_lossy().into_owned(),
    );
    let (migration_tx, migration_rx) = watch::channel(WorkerCommand::Stop);
    let migration_task = tokio::spawn(migration.run(migration_rx));
    migration_tx.send(WorkerCommand::Start).unwrap();

    poll_for_status(&store, &repo.id, RepoStatus::Queued, Duration::from_secs(5)).await;
    migration_tx.send(WorkerCommand::Stop).unwrap();
    migration_task.abort();

    let queued = store.get_repo(&repo.id).await.unwrap();
    assert_eq!(queued.migration_id.as_deref(), Some("5150"));
}

#[tokio::test]
async fn archiving_a_sync_hides_its_repos_from_migration_admission() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_store(&dir).await;
    let sync = sample_sync("acme-mirror");
    store.upsert_sync(sync.clone()).await.unwrap();
    store
        .secrets()
        .put(
            &sync.id,
            SyncCredentials {
                source_token: Some("s".into()),
                target_token: Some("t".into()),
            },
        )
        .await
        .unwrap();

    let mut repo = RepoRecord::new(sync.id.clone(), "widgets".into(), sample_visibility(), Utc::now());
    repo.status = RepoStatus::Unsynced;
    store.upsert_repo(repo.clone()).await.unwrap();

    store.archive_sync(&sync.id).await.unwrap();

    let worker_config = Arc::new(RwLock::new(WorkerConfig::default()));
    let provider = Arc::new(FakeProvider::default());
    let migration = MigrationWorker::new(
        store.clone(),
        provider,
        worker_config,
        WorkerStatus::new(),
        Arc::new(Generation::new()),
        "/bin/true".into(),
    );
    let (migration_tx, migration_rx) = watch::channel(WorkerCommand::Stop);
    let migration_task = tokio::spawn(migration.run(migration_rx));
    migration_tx.send(WorkerCommand::Start).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    migration_tx.send(WorkerCommand::Stop).unwrap();
    migration_task.abort();

    let unchanged = store.get_repo(&repo.id).await.unwrap();
    assert_eq!(unchanged.status, RepoStatus::Unsynced);
    assert!(unchanged.archived);
}
