// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks: the four
//! workers, the optional metrics server, and the hourly backup-rotation
//! ticker.

use std::time::Duration;

use tracing::{error, info};

use crate::core::tasks::{DiscoveryWorker, MigrationWorker, ProgressWorker, StatusWorker};

use super::context::ServerContext;
use super::metrics_server;

/// Spawns every background task into `ctx.background_tasks`, each watching
/// its own `shutdown_tx` subscription so a single broadcast can wind the
/// whole fleet down.
pub async fn spawn_all(ctx: &mut ServerContext) {
    let state = &ctx.app_state;

    let discovery = DiscoveryWorker::new(
        state.store.clone(),
        state.provider.clone(),
        state.worker_config.clone(),
        state.discovery.status.clone(),
        state.discovery.generation.clone(),
    );
    let discovery_rx = ctx.worker_receivers.discovery.clone();
    ctx.background_tasks.spawn(async move {
        discovery.run(discovery_rx).await;
        Ok(())
    });

    let status = StatusWorker::new(
        state.store.clone(),
        state.provider.clone(),
        state.worker_config.clone(),
        state.status.status.clone(),
        state.status.generation.clone(),
    );
    let status_rx = ctx.worker_receivers.status.clone();
    ctx.background_tasks.spawn(async move {
        status.run(status_rx).await;
        Ok(())
    });

    let migration = MigrationWorker::new(
        state.store.clone(),
        state.provider.clone(),
        state.worker_config.clone(),
        state.migration.status.clone(),
        state.migration.generation.clone(),
        ctx.config.migration_cli_path.clone(),
    );
    let migration_rx = ctx.worker_receivers.migration.clone();
    ctx.background_tasks.spawn(async move {
        migration.run(migration_rx).await;
        Ok(())
    });

    let progress = ProgressWorker::new(
        state.store.clone(),
        state.provider.clone(),
        state.worker_config.clone(),
        state.progress.status.clone(),
        state.progress.generation.clone(),
    );
    let progress_rx = ctx.worker_receivers.progress.clone();
    ctx.background_tasks.spawn(async move {
        progress.run(progress_rx).await;
        Ok(())
    });

    if ctx.config.metrics.enabled {
        let port = ctx.config.metrics.port;
        let shutdown_rx = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            metrics_server::run_metrics_server(port, shutdown_rx).await;
            Ok(())
        });
    }

    let store = state.store.clone();
    let interval = Duration::from_secs(u64::from(ctx.config.backup_interval_minutes) * 60);
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = store.rotate_backup().await {
                        error!(error = %e, "backup rotation failed");
                    } else {
                        info!("rotated state backups");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        Ok(())
    });
}
