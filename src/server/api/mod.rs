// src/server/api/mod.rs

//! The HTTP+SSE API surface: sync/repo CRUD, worker control, config, and
//! the live event stream.

mod error_response;
mod events;
mod repos;
mod state;
mod syncs;
mod workers;

use axum::Router;
use axum::routing::{get, post, put};

use crate::server::AppState;

pub fn router(state_: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/state", get(state::snapshot))
        .route("/api/syncs", get(syncs::list).post(syncs::create))
        .route(
            "/api/syncs/{id}",
            get(syncs::get).put(syncs::update).delete(syncs::delete),
        )
        .route("/api/syncs/{id}/archive", post(syncs::archive))
        .route("/api/syncs/{id}/unarchive", post(syncs::unarchive))
        .route("/api/syncs/{id}/permanent", post(syncs::permanent))
        .route("/api/syncs/{id}/validate", post(syncs::validate))
        .route("/api/syncs/{id}/discover", post(syncs::discover_now))
        .route("/api/repos", get(repos::list))
        .route("/api/repos/{id}", get(repos::get))
        .route("/api/repos/{id}/retry", post(repos::retry))
        .route("/api/workers/{name}/status", get(workers::status))
        .route("/api/workers/{name}/start", post(workers::start))
        .route("/api/workers/{name}/stop", post(workers::stop))
        .route("/api/workers/{name}/run-now", post(workers::run_now))
        .route(
            "/api/worker-config",
            get(workers::get_worker_config).put(workers::put_worker_config),
        )
        .route(
            "/api/admin-config",
            get(workers::get_admin_config).put(workers::put_admin_config),
        )
        .route("/api/log-level", put(workers::set_log_level))
        .route("/api/rate-limits", get(workers::rate_limits))
        .route("/api/events", get(events::stream))
        .with_state(state_)
}
