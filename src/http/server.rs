//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the admission pipeline and upstream client from configuration
//! - Create the Axum router (health, admin, gateway fallback)
//! - Wire up middleware (request ID, tracing, timeouts, body limit)
//! - Apply hot-reloaded configuration
//! - Serve until the shutdown broadcast fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::admission::AdmissionPipeline;
use crate::clock::{SharedClock, SystemClock};
use crate::config::AdmissionConfig;
use crate::http::gateway::{gateway_handler, UpstreamClient};
use crate::http::request::X_REQUEST_ID;
use crate::lifecycle::startup::spawn_sweeper;
use crate::observability::logging::apply_log_level;
use crate::store::SharedStore;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid upstream url {url}: {source}")]
    InvalidUpstream {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub upstream: UpstreamClient,
    pub config: Arc<ArcSwap<AdmissionConfig>>,
    pub clock: SharedClock,
    pub started_at: Instant,
}

/// HTTP front of the admission layer.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server over the given coordination store.
    pub fn new(config: AdmissionConfig, store: SharedStore) -> Result<Self, ServerError> {
        Self::with_clock(config, store, SystemClock::shared())
    }

    pub fn with_clock(config: AdmissionConfig, store: SharedStore, clock: SharedClock) -> Result<Self, ServerError> {
        let upstream = UpstreamClient::new(&config.upstream.url).map_err(|source| ServerError::InvalidUpstream {
            url: config.upstream.url.clone(),
            source,
        })?;
        let pipeline = Arc::new(AdmissionPipeline::from_config(&config, store, clock.clone()));

        let state = AppState {
            pipeline,
            upstream,
            config: Arc::new(ArcSwap::from_pointee(config.clone())),
            clock,
            started_at: Instant::now(),
        };

        let router = Self::build_router(&config, state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AdmissionConfig, state: AppState) -> Router {
        let mut router = Router::new().route("/health", get(health_handler));
        if config.admin.enabled {
            router = router.merge(setup_admin_router(state.clone()));
        }

        router
            .fallback(gateway_handler)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<AdmissionConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.state.upstream.base_url(),
            "HTTP server starting"
        );

        // The local fallback counters only live while the store is degraded.
        let sweep_interval = Duration::from_secs(self.state.config.load().store.sweep_interval_secs.max(1));
        spawn_sweeper(
            vec![self.state.pipeline.limiter().fallback_store().clone()],
            sweep_interval,
            shutdown.resubscribe(),
        );

        let state = self.state.clone();
        let mut updates_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(new_config) => {
                            state.pipeline.apply_config(&new_config);
                            apply_log_level(&new_config.observability.log_level);
                            state.config.store(Arc::new(new_config));
                            tracing::info!("Applied configuration update");
                        }
                        None => break,
                    },
                    _ = updates_shutdown.recv() => break,
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    uptime_secs: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_invalid_upstream_rejected() {
        let mut config = AdmissionConfig::default();
        config.upstream.url = "::not-a-url".into();
        let result = HttpServer::new(config, Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(ServerError::InvalidUpstream { .. })));
    }

    #[tokio::test]
    async fn test_admin_requires_api_key() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let mut config = AdmissionConfig::default();
        config.admin.enabled = true;
        config.admin.api_key = "secret".into();
        let server = HttpServer::new(config, Arc::new(MemoryStore::new())).unwrap();

        let anonymous = server
            .router
            .clone()
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let authorized = server
            .router
            .clone()
            .oneshot(
                Request::get("/admin/status")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(authorized.status(), StatusCode::OK);
        assert!(authorized.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_config_update_applies_live() {
        let server = HttpServer::new(AdmissionConfig::default(), Arc::new(MemoryStore::new())).unwrap();
        let state = server.state().clone();
        assert!(state.pipeline.limiter().policy().enabled());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(listener, rx, shutdown_rx));

        let mut updated = AdmissionConfig::default();
        updated.rate_limit.enabled = false;
        tx.send(updated).unwrap();

        for _ in 0..50 {
            if !state.pipeline.limiter().policy().enabled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!state.pipeline.limiter().policy().enabled());
        assert!(!state.config.load().rate_limit.enabled);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
