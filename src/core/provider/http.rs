// src/core/provider/http.rs

//! Retry-with-backoff wrapper around `reqwest`, shared by every provider
//! call. Honors `Retry-After` and `X-RateLimit-Reset`, and feeds every
//! response's rate-limit headers into the [`RateLimitTracker`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::time::sleep;

use crate::core::errors::{ControllerError, Result};
use crate::core::rate_limit::RateLimitTracker;

const MAX_ATTEMPTS: u32 = 3;

/// Sends a request, retrying once on `429`/`503` using the server's own
/// backoff hint, and records rate-limit headers from every response
/// (success or failure) under `host`.
pub async fn send_with_retry<F>(
    rate_limit: &RateLimitTracker,
    host: &str,
    mut build: F,
) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    for attempt in 1..=MAX_ATTEMPTS {
        let response = build()
            .send()
            .await
            .map_err(|e| ControllerError::Http(e.to_string()))?;
        let status = response.status();
        rate_limit.record(host, response.headers());

        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }
        if is_retryable(status) && attempt < MAX_ATTEMPTS {
            let delay = retry_delay_from_headers(response.headers());
            let _ = response.bytes().await;
            sleep(delay.unwrap_or(Duration::from_secs(1))).await;
            continue;
        }
        let body = response.text().await.unwrap_or_default();
        return Err(ControllerError::Http(format!(
            "request to {host} failed with {status}: {body}"
        )));
    }
    Err(ControllerError::Http(format!(
        "request to {host} failed after {MAX_ATTEMPTS} attempts"
    )))
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE)
}

fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
    if let Some(delay) = retry_after_seconds(headers) {
        return Some(Duration::from_secs(delay));
    }
    ratelimit_reset_seconds(headers).map(Duration::from_secs)
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

fn ratelimit_reset_seconds(headers: &HeaderMap) -> Option<u64> {
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    reset.checked_sub(now).filter(|d| *d > 0)
}
