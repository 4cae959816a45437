// src/server/api/syncs.rs

//! CRUD + lifecycle operations over `SyncConfig`: create, read, update
//! endpoints, archive/unarchive, delete, and trigger an out-of-band
//! discovery pass.

use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::errors::ControllerError;
use crate::core::model::{HostEndpoint, SyncConfig, SyncId};
use crate::core::secrets::SyncCredentials;
use crate::server::AppState;

use super::error_response::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct EndpointInput {
    pub org: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub enterprise: bool,
}

#[derive(Deserialize)]
pub struct CreateSyncRequest {
    pub name: String,
    pub source: EndpointInput,
    pub target: EndpointInput,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub source_token: Option<String>,
    #[serde(default)]
    pub target_token: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateSyncRequest {
    pub name: String,
    pub source: EndpointInput,
    pub target: EndpointInput,
    pub enabled: bool,
    #[serde(default)]
    pub source_token: Option<String>,
    #[serde(default)]
    pub target_token: Option<String>,
}

fn resolve(input: &EndpointInput) -> HostEndpoint {
    HostEndpoint::derive(input.base_url.as_deref(), &input.org, input.enterprise)
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<SyncConfig>> {
    Json(state.store.list_syncs().await)
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SyncConfig>> {
    state
        .store
        .get_sync(&SyncId(id.clone()))
        .await
        .map(Json)
        .ok_or_else(|| ApiError(ControllerError::NotFound(format!("sync '{id}' not found"))))
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateSyncRequest>,
) -> ApiResult<Json<SyncConfig>> {
    if req.name.trim().is_empty() {
        return Err(ApiError(ControllerError::Validation("name cannot be empty".into())));
    }
    let now = Utc::now();
    let sync = SyncConfig {
        id: SyncId::new(),
        name: req.name,
        source: resolve(&req.source),
        target: resolve(&req.target),
        created_at: now,
        updated_at: now,
        last_synced_at: None,
        enabled: req.enabled,
        archived: false,
    };
    state.store.upsert_sync(sync.clone()).await?;
    if req.source_token.is_some() || req.target_token.is_some() {
        state
            .store
            .secrets()
            .put(
                &sync.id,
                SyncCredentials {
                    source_token: req.source_token,
                    target_token: req.target_token,
                },
            )
            .await?;
    }
    Ok(Json(sync))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateSyncRequest>,
) -> ApiResult<Json<SyncConfig>> {
    let sync_id = SyncId(id.clone());
    let existing = state
        .store
        .get_sync(&sync_id)
        .await
        .ok_or_else(|| ApiError(ControllerError::NotFound(format!("sync '{id}' not found"))))?;

    let updated = SyncConfig {
        id: sync_id.clone(),
        name: req.name,
        source: resolve(&req.source),
        target: resolve(&req.target),
        created_at: existing.created_at,
        updated_at: Utc::now(),
        last_synced_at: existing.last_synced_at,
        enabled: req.enabled,
        archived: existing.archived,
    };
    state.store.update_sync_endpoints(&sync_id, updated.clone()).await?;

    if req.source_token.is_some() || req.target_token.is_some() {
        let mut creds = state.store.secrets().get(&sync_id).await?;
        if let Some(t) = req.source_token {
            creds.source_token = Some(t);
        }
        if let Some(t) = req.target_token {
            creds.target_token = Some(t);
        }
        state.store.secrets().put(&sync_id, creds).await?;
    }

    Ok(Json(updated))
}

pub async fn archive(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let ok = state.store.archive_sync(&SyncId(id.clone())).await?;
    if !ok {
        return Err(ApiError(ControllerError::NotFound(format!("sync '{id}' not found"))));
    }
    Ok(Json(serde_json::json!({ "archived": true })))
}

pub async fn unarchive(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let ok = state.store.unarchive_sync(&SyncId(id.clone())).await?;
    if !ok {
        return Err(ApiError(ControllerError::NotFound(format!("sync '{id}' not found"))));
    }
    Ok(Json(serde_json::json!({ "archived": false })))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let existed = state.store.delete_sync(&SyncId(id.clone())).await?;
    if !existed {
        return Err(ApiError(ControllerError::NotFound(format!("sync '{id}' not found"))));
    }
    state.store.secrets().remove(&SyncId(id)).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Hard-deletes a sync and its credentials. Equivalent to `DELETE
/// /api/syncs/<id>`, kept as its own named route since a permanent,
/// irreversible delete is distinct enough from a routine `DELETE` call to
/// warrant an explicit verb operators can reach for on purpose.
pub async fn permanent(state: State<AppState>, id: Path<String>) -> ApiResult<Json<serde_json::Value>> {
    delete(state, id).await
}

#[derive(Serialize)]
pub struct EndpointValidation {
    pub ok: bool,
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct SyncValidationReport {
    pub source: EndpointValidation,
    pub target: EndpointValidation,
}

async fn validate_endpoint(state: &AppState, endpoint: &HostEndpoint, token: Option<&str>) -> EndpointValidation {
    let Some(token) = token else {
        return EndpointValidation { ok: false, message: Some("no token configured".into()) };
    };
    match state.provider.validate_token(endpoint, token).await {
        Ok(validation) if validation.saml_sso_required => EndpointValidation {
            ok: false,
            message: Some("token requires SAML SSO authorization for this organization".into()),
        },
        Ok(validation) if validation.is_fine_grained => EndpointValidation {
            ok: false,
            message: Some("fine-grained personal access tokens are rejected at validation".into()),
        },
        Ok(_) => match state.provider.org_exists(endpoint, token).await {
            Ok(true) => EndpointValidation { ok: true, message: None },
            Ok(false) => EndpointValidation {
                ok: false,
                message: Some(format!("organization '{}' not found", endpoint.org)),
            },
            Err(e) => EndpointValidation { ok: false, message: Some(e.to_string()) },
        },
        Err(e) => EndpointValidation { ok: false, message: Some(e.to_string()) },
    }
}

/// Checks both endpoints' credentials against the upstream provider: token
/// scope/SAML/fine-grained status, then organization existence. Surfaces
/// authorization and not-found failures to the operator at validation time
/// rather than deferring to whichever worker touches the sync next.
pub async fn validate(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SyncValidationReport>> {
    let sync_id = SyncId(id.clone());
    let sync = state
        .store
        .get_sync(&sync_id)
        .await
        .ok_or_else(|| ApiError(ControllerError::NotFound(format!("sync '{id}' not found"))))?;
    let view = state
        .store
        .runtime_view(&sync_id)
        .await?
        .ok_or_else(|| ApiError(ControllerError::NotFound(format!("sync '{id}' not found"))))?;

    let source = validate_endpoint(&state, &sync.source, view.source_token.as_deref()).await;
    let target = validate_endpoint(&state, &sync.target, view.target_token.as_deref()).await;
    Ok(Json(SyncValidationReport { source, target }))
}

/// Triggers an immediate Discovery pass. Discovery always iterates every
/// enabled sync in one tick (there is no per-sync scheduling), so this
/// surfaces the worker's existing `run_now` rather than a narrower
/// single-sync operation.
pub async fn discover_now(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .get_sync(&SyncId(id.clone()))
        .await
        .ok_or_else(|| ApiError(ControllerError::NotFound(format!("sync '{id}' not found"))))?;
    state.discovery.run_now();
    Ok(Json(serde_json::json!({ "triggered": true })))
}
