use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::StoreBackend;
use crate::http::response::error_response;
use crate::http::server::AppState;
use crate::resilience::GuardSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub store_backend: StoreBackend,
    pub rate_limit_enabled: bool,
    pub revocation_enabled: bool,
    pub throttle: ThrottleStatus,
    pub dependency: GuardSnapshot,
}

#[derive(Serialize)]
pub struct ThrottleStatus {
    pub in_flight: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Deserialize)]
pub struct RevokeTokenRequest {
    pub token_id: String,
    /// Token expiry, unix seconds.
    pub expires_at: u64,
}

#[derive(Debug, Deserialize)]
pub struct RevokeSubjectRequest {
    pub subject_id: String,
    /// Unix seconds; defaults to now.
    #[serde(default)]
    pub cutover: Option<u64>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let config = state.config.load();
    let throttle = state.pipeline.throttle();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        store_backend: config.store.backend,
        rate_limit_enabled: state.pipeline.limiter().policy().enabled(),
        revocation_enabled: state.pipeline.revocation_enabled(),
        throttle: ThrottleStatus {
            in_flight: throttle.in_flight(),
            max_concurrent: throttle.max_concurrent(),
        },
        dependency: state.pipeline.guard().snapshot(),
    })
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<Vec<GuardSnapshot>> {
    Json(vec![state.pipeline.guard().snapshot()])
}

pub async fn revoke_token(State(state): State<AppState>, Json(body): Json<RevokeTokenRequest>) -> Response {
    if body.token_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request", None);
    }

    match state
        .pipeline
        .revocations()
        .revoke_token(&body.token_id, body.expires_at.saturating_mul(1000))
        .await
    {
        Ok(()) => {
            tracing::info!(token_id = %body.token_id, expires_at = body.expires_at, "Token revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            tracing::error!(token_id = %body.token_id, error = %err, "Failed to record token revocation");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", None)
        }
    }
}

pub async fn revoke_subject(State(state): State<AppState>, Json(body): Json<RevokeSubjectRequest>) -> Response {
    if body.subject_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request", None);
    }

    let cutover_ms = body
        .cutover
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or_else(|| state.clock.now_millis());

    match state
        .pipeline
        .revocations()
        .revoke_all_for_subject(&body.subject_id, cutover_ms)
        .await
    {
        Ok(()) => {
            tracing::info!(subject_id = %body.subject_id, cutover_ms, "Subject sessions revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            tracing::error!(subject_id = %body.subject_id, error = %err, "Failed to record subject revocation");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", None)
        }
    }
}
