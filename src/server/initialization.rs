// src/server/initialization.rs

//! Turns a parsed [`Config`] into a running [`ServerContext`]: opens the
//! state store, secret store, and provider client, loads or seeds the
//! worker/admin config, and wires up the four worker handles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::{Config, StateBackendKind};
use crate::core::provider::GitProviderClient;
use crate::core::rate_limit::RateLimitTracker;
use crate::core::secrets::{FileSecretBackend, SecretStore};
use crate::core::state::StateStore;
use crate::core::state::local::LocalBackend;
use crate::core::state::remote::{HttpTableClient, RemoteBackend};
use crate::core::tasks::generation::Generation;
use crate::core::tasks::handle::{WorkerCommand, WorkerHandle, WorkerStatus};

use super::context::{AppState, ServerContext, WorkerReceivers};

const EVENTS_CHANNEL_CAPACITY: usize = 256;

fn new_worker_handle() -> (Arc<WorkerHandle>, watch::Receiver<WorkerCommand>) {
    let (tx, rx) = watch::channel(WorkerCommand::Stop);
    let handle = Arc::new(WorkerHandle::new(tx, WorkerStatus::new(), Arc::new(Generation::new())));
    (handle, rx)
}

/// Builds every piece of long-lived state the server needs, but spawns
/// nothing — that's [`super::spawner::spawn_all`]'s job.
pub async fn setup(
    config: Config,
    log_reload_handle: reload::Handle<EnvFilter, tracing_subscriber::Registry>,
) -> Result<ServerContext> {
    let store = Arc::new(build_state_store(&config).await?);

    let worker_config = match store.read_worker_config().await? {
        Some(wc) => wc,
        None => {
            store.write_worker_config(&config.worker).await?;
            config.worker.clone()
        }
    };
    let admin_config = match store.read_admin_config().await? {
        Some(ac) => ac,
        None => {
            store.write_admin_config(&config.admin).await?;
            config.admin.clone()
        }
    };

    let rate_limit = Arc::new(RateLimitTracker::new());
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let provider = Arc::new(GitProviderClient::new(http, rate_limit.clone()));

    let (events_tx, _events_rx) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!(host = %config.host, port = config.port, "listening");

    let (discovery_handle, discovery_rx) = new_worker_handle();
    let (status_handle, status_rx) = new_worker_handle();
    let (migration_handle, migration_rx) = new_worker_handle();
    let (progress_handle, progress_rx) = new_worker_handle();

    let app_state = AppState {
        store,
        provider,
        rate_limit,
        worker_config: Arc::new(RwLock::new(worker_config)),
        admin_config: Arc::new(RwLock::new(admin_config)),
        discovery: discovery_handle,
        status: status_handle,
        migration: migration_handle,
        progress: progress_handle,
        events_tx,
        log_reload_handle: Arc::new(log_reload_handle),
        migration_cli_path: Arc::from(config.migration_cli_path.as_str()),
    };

    Ok(ServerContext {
        app_state,
        worker_receivers: WorkerReceivers {
            discovery: discovery_rx,
            status: status_rx,
            migration: migration_rx,
            progress: progress_rx,
        },
        config,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

async fn build_state_store(config: &Config) -> Result<StateStore> {
    let secrets_backend = Arc::new(FileSecretBackend::new(config.secret_store.path.clone()));
    let secrets = Arc::new(SecretStore::new(
        secrets_backend,
        Duration::from_secs(config.secret_store.cache_ttl_seconds),
    ));

    match config.state_backend {
        StateBackendKind::Local => {
            let backend = LocalBackend::open(
                config.state_file_path.clone(),
                config.backup_dir.clone(),
                config.backup_retain_count,
            )
            .await
            .context("failed to open local state backend")?;
            Ok(StateStore::local(backend, secrets))
        }
        StateBackendKind::Remote => {
            let http = reqwest::Client::builder()
                .build()
                .context("failed to build HTTP client for remote state backend")?;
            let client = Arc::new(HttpTableClient::new(
                http,
                config.remote_table.endpoint.clone(),
                config.remote_table.table_name.clone(),
            ));
            let backend = RemoteBackend::open(client)
                .await
                .context("failed to open remote state backend")?;
            Ok(StateStore::remote(backend, secrets))
        }
    }
}
