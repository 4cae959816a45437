// src/server/context.rs

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinSet;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;
use crate::core::model::{AdminConfig, WorkerConfig};
use crate::core::provider::ProviderClient;
use crate::core::rate_limit::RateLimitTracker;
use crate::core::state::StateStore;
use crate::core::tasks::{WorkerCommand, WorkerHandle};

/// The capability surface every HTTP handler reads from, cloned (cheaply,
/// every field is an `Arc`) into axum's router state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub provider: Arc<dyn ProviderClient>,
    pub rate_limit: Arc<RateLimitTracker>,
    pub worker_config: Arc<RwLock<WorkerConfig>>,
    pub admin_config: Arc<RwLock<AdminConfig>>,
    pub discovery: Arc<WorkerHandle>,
    pub status: Arc<WorkerHandle>,
    pub migration: Arc<WorkerHandle>,
    pub progress: Arc<WorkerHandle>,
    pub events_tx: broadcast::Sender<String>,
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    /// Path to the migration CLI binary, carried here so the `retry` handler
    /// can drive Migration's single-repo enqueue path synchronously instead
    /// of only nudging the background worker's next tick.
    pub migration_cli_path: Arc<str>,
}

/// The receiving end of each worker's control channel, handed to
/// [`super::spawner::spawn_all`] to drive the corresponding worker loop.
/// Kept out of [`AppState`] since `watch::Receiver` is not meaningfully
/// `Clone`-shareable the way the rest of that state is.
pub struct WorkerReceivers {
    pub discovery: watch::Receiver<WorkerCommand>,
    pub status: watch::Receiver<WorkerCommand>,
    pub migration: watch::Receiver<WorkerCommand>,
    pub progress: watch::Receiver<WorkerCommand>,
}

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub app_state: AppState,
    pub worker_receivers: WorkerReceivers,
    pub config: Config,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
