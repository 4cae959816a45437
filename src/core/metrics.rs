// src/core/metrics.rs

//! Defines and registers Prometheus metrics for controller monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_gauge_vec,
};

lazy_static! {
    /// Records with `status in {queued, syncing}` across all syncs. Must never
    /// exceed `migration.maxConcurrentQueued`.
    pub static ref IN_FLIGHT_REPOS: Gauge =
        register_gauge!("controller_in_flight_repos", "Number of repo records currently queued or syncing.").unwrap();

    /// Number of repos in each status, labeled by sync id and status.
    pub static ref REPOS_BY_STATUS: GaugeVec =
        register_gauge_vec!("controller_repos_by_status", "Number of repo records in each status, labeled by sync and status.", &["sync_id", "status"]).unwrap();

    /// Ticks completed per worker.
    pub static ref WORKER_TICKS_TOTAL: CounterVec =
        register_counter_vec!("controller_worker_ticks_total", "Total number of completed worker ticks.", &["worker"]).unwrap();

    /// Migration enqueue attempts, labeled by outcome.
    pub static ref MIGRATION_ENQUEUES_TOTAL: CounterVec =
        register_counter_vec!("controller_migration_enqueues_total", "Total migration enqueue attempts, labeled by outcome.", &["outcome"]).unwrap();

    /// Per-host rate-limit remaining gauge, updated from response headers.
    pub static ref RATE_LIMIT_REMAINING: GaugeVec =
        register_gauge_vec!("controller_rate_limit_remaining", "Remaining rate-limit units per host/resource.", &["host", "resource"]).unwrap();

    pub static ref DISCOVERY_ERRORS_TOTAL: Counter =
        register_counter!("controller_discovery_errors_total", "Total discovery iteration errors.").unwrap();

    /// Stale in-flight records reclaimed back to `unknown` by Progress.
    pub static ref PROGRESS_STALE_RECLAIMED_TOTAL: Counter =
        register_counter!("controller_progress_stale_reclaimed_total", "Total in-flight records reclaimed to unknown after exceeding the stale timeout.").unwrap();

    pub static ref PROGRESS_ERRORS_TOTAL: Counter =
        register_counter!("controller_progress_errors_total", "Total progress iteration errors.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
