// src/server/api/workers.rs

//! Per-worker start/stop/run-now + status, and the worker/admin config
//! singletons. Mutating calls are gated by the admin allowlist when enabled.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::EnvFilter;

use crate::core::errors::ControllerError;
use crate::core::model::{AdminConfig, WorkerConfig};
use crate::core::tasks::{WorkerHandle, WorkerSnapshot};
use crate::server::AppState;

use super::error_response::{ApiError, ApiResult};

const OPERATOR_HEADER: &str = "x-operator";

async fn require_operator(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let operator = headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let admin_config = state.admin_config.read().await;
    if admin_config.is_allowed(operator) {
        Ok(())
    } else {
        Err(ApiError(ControllerError::Unauthorized(format!(
            "operator '{operator}' is not on the admin allowlist"
        ))))
    }
}

fn handle_for<'a>(state: &'a AppState, name: &str) -> ApiResult<&'a WorkerHandle> {
    match name {
        "discovery" => Ok(state.discovery.as_ref()),
        "status" => Ok(state.status.as_ref()),
        "migration" => Ok(state.migration.as_ref()),
        "progress" => Ok(state.progress.as_ref()),
        other => Err(ApiError(ControllerError::NotFound(format!("unknown worker '{other}'")))),
    }
}

pub async fn status(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<WorkerSnapshot>> {
    let handle = handle_for(&state, &name)?;
    Ok(Json(handle.snapshot().await))
}

pub async fn start(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&state, &headers).await?;
    handle_for(&state, &name)?.start();
    Ok(Json(serde_json::json!({ "running": true })))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&state, &headers).await?;
    handle_for(&state, &name)?.stop();
    Ok(Json(serde_json::json!({ "running": false })))
}

pub async fn run_now(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&state, &headers).await?;
    handle_for(&state, &name)?.run_now();
    Ok(Json(serde_json::json!({ "triggered": true })))
}

pub async fn get_worker_config(State(state): State<AppState>) -> Json<WorkerConfig> {
    Json(state.worker_config.read().await.clone())
}

pub async fn put_worker_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new_config): Json<WorkerConfig>,
) -> ApiResult<Json<WorkerConfig>> {
    require_operator(&state, &headers).await?;
    new_config
        .validate()
        .map_err(|e| ApiError(ControllerError::Validation(e)))?;
    state.store.write_worker_config(&new_config).await?;
    *state.worker_config.write().await = new_config.clone();
    Ok(Json(new_config))
}

pub async fn get_admin_config(State(state): State<AppState>) -> Json<AdminConfig> {
    Json(state.admin_config.read().await.clone())
}

pub async fn put_admin_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new_config): Json<AdminConfig>,
) -> ApiResult<Json<AdminConfig>> {
    require_operator(&state, &headers).await?;
    state.store.write_admin_config(&new_config).await?;
    *state.admin_config.write().await = new_config.clone();
    Ok(Json(new_config))
}

#[derive(Deserialize)]
pub struct SetLogLevelRequest {
    pub filter: String,
}

/// Reloads the `tracing` env-filter in place, so an operator can turn on
/// `debug` for one sync's host label without restarting the process.
pub async fn set_log_level(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SetLogLevelRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_operator(&state, &headers).await?;
    let filter = EnvFilter::try_new(&req.filter)
        .map_err(|e| ApiError(ControllerError::Validation(format!("invalid log filter: {e}"))))?;
    state
        .log_reload_handle
        .reload(filter)
        .map_err(|e| ApiError(ControllerError::Internal(format!("log filter reload failed: {e}"))))?;
    Ok(Json(serde_json::json!({ "filter": req.filter })))
}

#[derive(Serialize)]
pub struct RateLimitRow {
    pub host: String,
    pub resource: String,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_epoch_seconds: Option<u64>,
    pub used: Option<u64>,
}

pub async fn rate_limits(State(state): State<AppState>) -> Json<Vec<RateLimitRow>> {
    let rows = state
        .rate_limit
        .all()
        .into_iter()
        .map(|(host, resource, snap)| RateLimitRow {
            host,
            resource,
            limit: snap.limit,
            remaining: snap.remaining,
            reset_epoch_seconds: snap.reset_epoch_seconds,
            used: snap.used,
        })
        .collect();
    Json(rows)
}
