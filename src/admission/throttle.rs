//! Concurrency throttle for expensive operations.
//!
//! A request holds a `Permit` from admission until its guarded operation
//! finishes. When every permit is taken for longer than the acquire
//! timeout the request is turned away instead of queueing without bound.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ThrottleConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("too many concurrent operations ({max_concurrent} in flight)")]
pub struct ThrottleRejected {
    pub max_concurrent: usize,
}

#[derive(Debug, Clone)]
pub struct ConcurrencyThrottle {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    acquire_timeout: Duration,
}

impl ConcurrencyThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Acquire with the configured timeout.
    pub async fn admit(&self) -> Result<Permit, ThrottleRejected> {
        self.acquire(self.acquire_timeout).await
    }

    pub async fn acquire(&self, timeout: Duration) -> Result<Permit, ThrottleRejected> {
        let acquired = if timeout.is_zero() {
            self.permits.clone().try_acquire_owned().ok()
        } else {
            tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
                .await
                .ok()
                .and_then(Result::ok)
        };

        match acquired {
            Some(permit) => Ok(Permit { _permit: permit }),
            None => {
                tracing::debug!(max_concurrent = self.max_concurrent, "Throttle full; rejecting");
                metrics::record_throttle_rejection();
                Err(ThrottleRejected {
                    max_concurrent: self.max_concurrent,
                })
            }
        }
    }
}

/// Capacity held by one admitted operation; released on drop.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}
