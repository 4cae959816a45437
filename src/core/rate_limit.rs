// src/core/rate_limit.rs

//! Per-host API rate-limit tracker. Updated from response headers on every
//! upstream call; never blocks a caller, only records and warns.

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::metrics::RATE_LIMIT_REMAINING;

/// A single `(host, resource)` counter snapshot.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default)]
pub struct RateLimitSnapshot {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_epoch_seconds: Option<u64>,
    pub used: Option<u64>,
}

impl RateLimitSnapshot {
    fn is_low(&self) -> bool {
        let pct_used = match (self.used, self.limit) {
            (Some(used), Some(limit)) if limit > 0 => Some(used as f64 / limit as f64),
            _ => None,
        };
        pct_used.is_some_and(|p| p >= 0.8) || self.remaining.is_some_and(|r| r < 100)
    }
}

/// Tracks rate-limit counters per `(host, resource)` pair, fed by response
/// headers from every provider call.
#[derive(Default)]
pub struct RateLimitTracker {
    snapshots: DashMap<(String, String), RateLimitSnapshot>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the `X-RateLimit-*` headers, if present, and records them
    /// under `host`. Warns when the remaining budget is low.
    pub fn record(&self, host: &str, headers: &HeaderMap) {
        let resource = header_str(headers, "x-ratelimit-resource").unwrap_or_else(|| "core".to_string());
        let snapshot = RateLimitSnapshot {
            limit: header_u64(headers, "x-ratelimit-limit"),
            remaining: header_u64(headers, "x-ratelimit-remaining"),
            reset_epoch_seconds: header_u64(headers, "x-ratelimit-reset"),
            used: header_u64(headers, "x-ratelimit-used"),
        };
        if snapshot.limit.is_none() && snapshot.remaining.is_none() {
            return;
        }
        if snapshot.is_low() {
            warn!(
                host,
                resource = resource.as_str(),
                remaining = ?snapshot.remaining,
                used = ?snapshot.used,
                limit = ?snapshot.limit,
                "rate limit budget running low"
            );
        }
        if let Some(remaining) = snapshot.remaining {
            RATE_LIMIT_REMAINING
                .with_label_values(&[host, resource.as_str()])
                .set(remaining as f64);
        }
        self.snapshots.insert((host.to_string(), resource), snapshot);
    }

    pub fn snapshot(&self, host: &str, resource: &str) -> Option<RateLimitSnapshot> {
        self.snapshots
            .get(&(host.to_string(), resource.to_string()))
            .map(|entry| *entry)
    }

    /// All known snapshots, keyed `host#resource`, for the `/api/rate-limits` surface.
    pub fn all(&self) -> Vec<(String, String, RateLimitSnapshot)> {
        self.snapshots
            .iter()
            .map(|entry| {
                let (host, resource) = entry.key().clone();
                (host, resource, *entry.value())
            })
            .collect()
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers_with(limit: u64, remaining: u64, used: u64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_str(&limit.to_string()).unwrap());
        headers.insert(
            "x-ratelimit-remaining",
            HeaderValue::from_str(&remaining.to_string()).unwrap(),
        );
        headers.insert("x-ratelimit-used", HeaderValue::from_str(&used.to_string()).unwrap());
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));
        headers
    }

    #[test]
    fn records_and_reports_snapshot() {
        let tracker = RateLimitTracker::new();
        tracker.record("api.github.com", &headers_with(5000, 4000, 1000));
        let snap = tracker.snapshot("api.github.com", "core").unwrap();
        assert_eq!(snap.remaining, Some(4000));
    }

    #[test]
    fn low_remaining_is_detected() {
        let snap = RateLimitSnapshot {
            limit: Some(5000),
            remaining: Some(50),
            used: Some(4950),
            reset_epoch_seconds: None,
        };
        assert!(snap.is_low());
    }

    #[test]
    fn high_usage_percentage_is_detected() {
        let snap = RateLimitSnapshot {
            limit: Some(5000),
            remaining: Some(900),
            used: Some(4100),
            reset_epoch_seconds: None,
        };
        assert!(snap.is_low());
    }

    #[test]
    fn healthy_budget_is_not_low() {
        let snap = RateLimitSnapshot {
            limit: Some(5000),
            remaining: Some(4000),
            used: Some(1000),
            reset_epoch_seconds: None,
        };
        assert!(!snap.is_low());
    }

    #[test]
    fn missing_headers_are_ignored() {
        let tracker = RateLimitTracker::new();
        tracker.record("api.github.com", &HeaderMap::new());
        assert!(tracker.snapshot("api.github.com", "core").is_none());
    }
}
