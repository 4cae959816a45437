// src/server/mod.rs

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;

pub mod api;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

pub use context::AppState;

/// Builds the server, spawns every background task, and blocks serving the
/// HTTP+SSE API until a shutdown signal arrives.
pub async fn run(config: Config, log_reload_handle: reload::Handle<EnvFilter, tracing_subscriber::Registry>) -> Result<()> {
    let mut ctx = initialization::setup(config, log_reload_handle).await?;
    spawner::spawn_all(&mut ctx).await;

    let app = api::router(ctx.app_state.clone());
    let shutdown_tx = ctx.shutdown_tx.clone();

    let serve_result = axum::serve(ctx.listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        })
        .await;

    // The worker loops only ever stop processing on a `Stop` command, they
    // never exit their task; there's nothing to join once the listener
    // stops accepting. Aborting them here (rather than waiting on
    // `join_next`, which would hang) is fine — the process is about to
    // exit and tokio drops/aborts remaining tasks with the runtime.
    ctx.background_tasks.abort_all();

    serve_result.map_err(Into::into)
}
