//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the coordination store the configuration asks for
//! - Wrap it with per-operation deadlines and a single retry
//! - Sweep expired entries out of in-process stores
//!
//! # Design Decisions
//! - Fail fast: an unreachable Redis at startup is fatal; later outages
//!   degrade per component policy instead
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{StoreBackend, StoreConfig};
use crate::store::{MemoryStore, SharedStore, TimeoutStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store.backend = \"redis\" but this build lacks the redis-store feature")]
    RedisUnsupported,

    #[error("failed to connect to redis at {url}: {reason}")]
    Redis { url: String, reason: String },
}

/// The store handed to components, plus the in-process store behind it
/// (if any) so it can be swept.
pub struct StoreHandles {
    pub shared: SharedStore,
    pub local: Option<MemoryStore>,
}

pub async fn build_store(config: &StoreConfig) -> Result<StoreHandles, StartupError> {
    let (inner, local): (SharedStore, Option<MemoryStore>) = match config.backend {
        StoreBackend::Memory => {
            let memory = MemoryStore::new();
            tracing::info!("Using in-process coordination store (single instance only)");
            (Arc::new(memory.clone()), Some(memory))
        }
        StoreBackend::Redis => (connect_redis(config).await?, None),
    };

    Ok(StoreHandles {
        shared: Arc::new(TimeoutStore::new(inner, config.op_timeout())),
        local,
    })
}

#[cfg(feature = "redis-store")]
async fn connect_redis(config: &StoreConfig) -> Result<SharedStore, StartupError> {
    use crate::store::redis::{RedisStore, RedisStoreConfig};

    let store = RedisStore::connect_with_config(
        &config.redis_url,
        RedisStoreConfig {
            key_prefix: config.key_prefix.clone(),
        },
    )
    .await
    .map_err(|e| StartupError::Redis {
        url: config.redis_url.clone(),
        reason: e.to_string(),
    })?;
    tracing::info!(url = %config.redis_url, prefix = %config.key_prefix, "Connected to Redis coordination store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis-store"))]
async fn connect_redis(_config: &StoreConfig) -> Result<SharedStore, StartupError> {
    Err(StartupError::RedisUnsupported)
}

/// Periodically purge expired entries until shutdown.
pub fn spawn_sweeper(
    stores: Vec<MemoryStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged: usize = stores.iter().map(MemoryStore::purge_expired).sum();
                    if purged > 0 {
                        tracing::debug!(purged, "Swept expired store entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Store sweeper stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::lifecycle::Shutdown;
    use crate::store::CoordinationStore;

    #[tokio::test]
    async fn test_memory_backend_is_wrapped() {
        let handles = build_store(&StoreConfig::default()).await.unwrap();
        assert!(handles.local.is_some());
        handles
            .shared
            .set("k", b"v".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(handles.local.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_stops() {
        let clock = MockClock::new(0);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        store.set("old", b"1".to_vec(), Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let shutdown = Shutdown::new();
        let handle = spawn_sweeper(vec![store.clone()], Duration::from_secs(30), shutdown.subscribe());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.is_empty());

        shutdown.trigger();
        handle.await.unwrap();
    }
}
