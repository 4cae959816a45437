// src/server/api/repos.rs

//! Read access to `RepoRecord`s plus the "retry" operation that forces a
//! failed/unknown repo back through Migration.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use crate::core::errors::ControllerError;
use crate::core::model::{RepoId, RepoRecord, RepoStatus, SyncId};
use crate::core::tasks::generation::Generation;
use crate::core::tasks::{MigrationWorker, WorkerStatus};
use crate::server::AppState;

use super::error_response::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct ListReposQuery {
    pub sync_id: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListReposQuery>) -> Json<Vec<RepoRecord>> {
    let repos = match q.sync_id {
        Some(sync_id) => state.store.list_repos_by_sync(&SyncId(sync_id)).await,
        None => state.store.list_repos().await,
    };
    Json(repos)
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<RepoRecord>> {
    state
        .store
        .get_repo(&RepoId(id.clone()))
        .await
        .map(Json)
        .ok_or_else(|| ApiError(ControllerError::NotFound(format!("repo '{id}' not found"))))
}

/// Sets a repo back to `unsynced`, then drives it through Migration's
/// single-repo enqueue path synchronously rather than waiting for the
/// background worker's next tick.
pub async fn retry(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<RepoRecord>> {
    let repo_id = RepoId(id.clone());
    let repo = state
        .store
        .get_repo(&repo_id)
        .await
        .ok_or_else(|| ApiError(ControllerError::NotFound(format!("repo '{id}' not found"))))?;

    if repo.status.is_in_flight() {
        return Err(ApiError(ControllerError::Conflict(format!(
            "repo '{id}' is already in flight ({})",
            repo.status
        ))));
    }

    let mut reset = repo;
    reset.status = RepoStatus::Unsynced;
    reset.migration_id = None;
    reset.error_message = None;
    reset.last_update = chrono::Utc::now();
    state.store.upsert_repo(reset.clone()).await?;

    let Some(sync) = state.store.get_sync(&reset.sync_id).await else {
        return Ok(Json(reset));
    };
    let Some(view) = state.store.runtime_view(&sync.id).await? else {
        return Ok(Json(reset));
    };
    let (Some(source_token), Some(target_token)) = (view.source_token, view.target_token) else {
        return Ok(Json(reset));
    };

    let worker = MigrationWorker::new(
        state.store.clone(),
        state.provider.clone(),
        state.worker_config.clone(),
        WorkerStatus::new(),
        Arc::new(Generation::new()),
        state.migration_cli_path.to_string(),
    );
    worker.enqueue_repo(&sync, &reset, &source_token, &target_token).await?;

    let final_repo = state
        .store
        .get_repo(&repo_id)
        .await
        .ok_or_else(|| ApiError(ControllerError::Internal(format!("repo '{id}' vanished during retry"))))?;
    Ok(Json(final_repo))
}
