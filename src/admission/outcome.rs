//! Pipeline results.

use std::time::Duration;

use axum::http::StatusCode;

use crate::cache::CacheEntry;
use crate::security::RateLimitStatus;

/// States a request passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    RevocationChecked,
    RateLimitPassed,
    CacheChecked,
    CacheHit,
    CacheMiss,
    ConcurrencyAdmitted,
    DependencyCalled,
    CacheStored,
    Responded,
}

/// Why a request was turned away before reaching the dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Revoked,
    RateLimited,
    PoolExhausted,
    CircuitOpen,
    Overloaded,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Revoked => "revoked",
            RejectReason::RateLimited => "rate_limited",
            RejectReason::PoolExhausted => "pool_exhausted",
            RejectReason::CircuitOpen => "circuit_open",
            RejectReason::Overloaded => "overloaded",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RejectReason::Revoked => StatusCode::UNAUTHORIZED,
            RejectReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RejectReason::PoolExhausted | RejectReason::CircuitOpen | RejectReason::Overloaded => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

/// Dependency failure surfaced to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    UpstreamTimeout,
    UpstreamError,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::UpstreamTimeout => "upstream_timeout",
            FailureReason::UpstreamError => "upstream_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            FailureReason::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            FailureReason::UpstreamError => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Response produced by the guarded dependency call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Upstream `Cache-Control` value.
    pub cache_control: Option<String>,
    pub body: Vec<u8>,
}

impl DependencyResponse {
    /// A 200 the upstream did not mark `private` or `no-store`.
    pub fn is_storable(&self) -> bool {
        if self.status != 200 {
            return false;
        }
        let Some(cache_control) = self.cache_control.as_deref() else {
            return true;
        };
        !cache_control.split(',').any(|directive| {
            let name = directive.split('=').next().unwrap_or_default().trim();
            name.eq_ignore_ascii_case("no-store") || name.eq_ignore_ascii_case("private")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Admission stages passed (`evaluate` only).
    Admitted,
    /// Served from cache.
    Cached(CacheEntry),
    /// Client copy is current.
    NotModified(CacheEntry),
    /// Fetched from the dependency; `entry` is set when it was cached.
    Loaded {
        response: DependencyResponse,
        entry: Option<CacheEntry>,
    },
    Rejected {
        reason: RejectReason,
        retry_after: Option<Duration>,
    },
    Failed(FailureReason),
}

impl OutcomeKind {
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::Admitted => "admitted",
            OutcomeKind::Cached(_) => "cache_hit",
            OutcomeKind::NotModified(_) => "not_modified",
            OutcomeKind::Loaded { .. } => "loaded",
            OutcomeKind::Rejected { .. } => "rejected",
            OutcomeKind::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            OutcomeKind::Rejected { reason, .. } => reason.code(),
            OutcomeKind::Failed(reason) => reason.code(),
            _ => "none",
        }
    }
}

/// Final result of one pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub kind: OutcomeKind,
    /// Present once the rate-limit stage ran (allowed or denied).
    pub rate_limit: Option<RateLimitStatus>,
    pub trace: Vec<Stage>,
}

impl Outcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self.kind, OutcomeKind::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, cache_control: Option<&str>) -> DependencyResponse {
        DependencyResponse {
            status,
            content_type: None,
            cache_control: cache_control.map(str::to_string),
            body: Vec::new(),
        }
    }

    #[test]
    fn test_storable_honours_upstream_cache_control() {
        assert!(response(200, None).is_storable());
        assert!(response(200, Some("public, max-age=60")).is_storable());
        assert!(!response(200, Some("no-store")).is_storable());
        assert!(!response(200, Some("max-age=0, Private")).is_storable());
        assert!(!response(200, Some("private=\"set-cookie\"")).is_storable());
        assert!(!response(404, None).is_storable());
    }
}
