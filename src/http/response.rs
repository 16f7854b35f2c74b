//! Outcome → HTTP response.
//!
//! # Wire contract
//! - `X-RateLimit-Limit` / `-Remaining` / `-Reset` (seconds) whenever the
//!   rate-limit stage ran
//! - `Retry-After` (seconds) on every rejection that carries a hint
//! - `ETag` + `Cache-Control: max-age=N` on cacheable responses,
//!   `Cache-Control: no-store` otherwise
//! - Errors are `{"error": <code>, "retry_after": <secs|null>}`; internal
//!   detail never leaves the process

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::admission::{Outcome, OutcomeKind};
use crate::cache::CacheEntry;
use crate::security::RateLimitStatus;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub retry_after: Option<u64>,
}

/// JSON error response with an optional `Retry-After`.
pub fn error_response(status: StatusCode, code: &'static str, retry_after: Option<Duration>) -> Response {
    let secs = retry_after.map(|d| d.as_secs().max(1));
    let mut response = (
        status,
        Json(ErrorBody {
            error: code,
            retry_after: secs,
        }),
    )
        .into_response();
    if let Some(secs) = secs {
        response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// Render a pipeline outcome. `now_ms` drives the remaining `max-age`.
pub fn render(outcome: Outcome, now_ms: u64) -> Response {
    let mut response = match outcome.kind {
        OutcomeKind::Admitted => StatusCode::NO_CONTENT.into_response(),
        OutcomeKind::Cached(entry) => {
            let mut response = body_response(StatusCode::OK, entry.content_type.as_deref(), entry.value.clone());
            set_validators(response.headers_mut(), &entry, now_ms);
            response
        }
        OutcomeKind::NotModified(entry) => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            set_validators(response.headers_mut(), &entry, now_ms);
            response
        }
        OutcomeKind::Loaded { response: loaded, entry } => {
            let status = StatusCode::from_u16(loaded.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = body_response(status, loaded.content_type.as_deref(), loaded.body);
            match &entry {
                Some(entry) => set_validators(response.headers_mut(), entry, now_ms),
                None => {
                    response
                        .headers_mut()
                        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
                }
            }
            response
        }
        OutcomeKind::Rejected { reason, retry_after } => error_response(reason.status(), reason.code(), retry_after),
        OutcomeKind::Failed(reason) => error_response(reason.status(), reason.code(), None),
    };

    if let Some(status) = outcome.rate_limit {
        set_rate_limit_headers(response.headers_mut(), &status);
    }
    response
}

fn body_response(status: StatusCode, content_type: Option<&str>, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(ct).ok()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

fn set_validators(headers: &mut HeaderMap, entry: &CacheEntry, now_ms: u64) {
    if let Ok(etag) = HeaderValue::from_str(&entry.etag) {
        headers.insert(header::ETAG, etag);
    }
    let cache_control = format!("max-age={}", entry.max_age_secs(now_ms));
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }
}

fn set_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    let reset_secs = status.reset_after.as_millis().div_ceil(1000) as u64;
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_secs));
}
