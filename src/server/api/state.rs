// src/server/api/state.rs

//! `GET /api/state`: a single consolidated read of everything the other
//! endpoints expose piecemeal — every sync, every repo, and each worker's
//! current status — for a dashboard's initial load or a one-shot CLI check.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::core::model::{RepoRecord, SyncConfig};
use crate::core::tasks::WorkerSnapshot;
use crate::server::AppState;

#[derive(Serialize)]
pub struct WorkerSnapshots {
    pub discovery: WorkerSnapshot,
    pub status: WorkerSnapshot,
    pub migration: WorkerSnapshot,
    pub progress: WorkerSnapshot,
}

#[derive(Serialize)]
pub struct StateSnapshot {
    pub syncs: Vec<SyncConfig>,
    pub repos: Vec<RepoRecord>,
    pub workers: WorkerSnapshots,
}

pub async fn snapshot(State(state): State<AppState>) -> Json<StateSnapshot> {
    Json(StateSnapshot {
        syncs: state.store.list_syncs().await,
        repos: state.store.list_repos().await,
        workers: WorkerSnapshots {
            discovery: state.discovery.snapshot().await,
            status: state.status.snapshot().await,
            migration: state.migration.snapshot().await,
            progress: state.progress.snapshot().await,
        },
    })
}
