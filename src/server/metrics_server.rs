// src/server/metrics_server.rs

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::core::metrics::gather_metrics;

/// Handles HTTP requests to the `/metrics` endpoint. The controller's own
/// gauges (`IN_FLIGHT_REPOS`, `REPOS_BY_STATUS`, ...) are updated by the
/// workers themselves, so this handler has nothing to do but gather.
async fn metrics_handler() -> impl IntoResponse {
    let body = gather_metrics();
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body)
}

/// Runs a standalone HTTP server exposing Prometheus metrics on `/metrics`.
pub async fn run_metrics_server(port: u16, mut shutdown_rx: broadcast::Receiver<()>) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "metrics server listening on /metrics");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(port, error = %e, "failed to bind metrics server");
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
        .unwrap();
}
