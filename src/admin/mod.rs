//! Operator API under `/admin`, guarded by a bearer API key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

/// Admin routes; the caller supplies the state.
pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/revocations/token", post(revoke_token))
        .route("/admin/revocations/subject", post(revoke_subject))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
