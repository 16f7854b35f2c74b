//! Admission gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────────┐
//!                    │                    ADMISSION GATEWAY                      │
//!   Client Request   │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌────────┐ │
//!   ─────────────────┼─▶│revocation│──▶│  rate    │──▶│ response │──▶│throttle│ │
//!                    │  │  check   │   │  limit   │   │  cache   │   │        │ │
//!                    │  └──────────┘   └──────────┘   └────┬─────┘   └───┬────┘ │
//!                    │                                     │ hit         │      │
//!   Client Response  │                                     ▼             ▼      │
//!   ◀────────────────┼──────────────────────────────── response    ┌──────────┐ │
//!                    │                                             │dependency│─┼──▶ Upstream
//!                    │                                             │  guard   │ │
//!                    │                                             └──────────┘ │
//!                    │  ┌─────────────────────────────────────────────────────┐ │
//!                    │  │ coordination store (memory | redis) · config reload │ │
//!                    │  │ metrics · structured logs · graceful shutdown       │ │
//!                    │  └─────────────────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Configuration comes from the TOML file named by the first argument or
//! `ADMISSION_CONFIG`; without either, built-in defaults are used.

use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use admission_gate::config::{load_config, watcher::ConfigWatcher, AdmissionConfig};
use admission_gate::http::HttpServer;
use admission_gate::lifecycle::{signals::shutdown_signal, startup, Shutdown};
use admission_gate::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ADMISSION_CONFIG").ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => AdmissionConfig::default(),
    };

    logging::init_tracing(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "admission-gate starting");

    tracing::info!(
        config = ?config_path,
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        store = ?config.store.backend,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let stores = startup::build_store(&config.store).await?;

    let shutdown = Shutdown::new();
    if let Some(local) = stores.local {
        startup::spawn_sweeper(
            vec![local],
            std::time::Duration::from_secs(config.store.sweep_interval_secs.max(1)),
            shutdown.subscribe(),
        );
    }

    // The watcher must stay alive for reloads to arrive.
    let (config_updates, _watcher) = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (updates, Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (updates, None)
                }
            }
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config, stores.shared)?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.trigger();
    });

    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
