//! Deadline and single-retry decorator for coordination stores.
//!
//! # Design Decisions
//! - Every store call carries an explicit deadline
//! - A transient failure gets exactly one retry; after that the caller's
//!   fail-open / fail-closed policy takes over
//! - Increments and compare-and-swap are retried only when the backend was
//!   unreachable, since a timed-out write may already have been applied and
//!   a replayed swap would then report a conflict with itself

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::store::{BoundedIncrement, CoordinationStore, SharedStore, StoreError, StoreResult};

/// Wraps a store with per-operation timeouts and one retry.
#[derive(Debug, Clone)]
pub struct TimeoutStore {
    inner: SharedStore,
    op_timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: SharedStore, op_timeout: Duration) -> Self {
        Self { inner, op_timeout }
    }

    async fn attempt<T, Fut>(&self, fut: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, idempotent: bool, mut f: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        match self.attempt(f()).await {
            Err(err) if should_retry(&err, idempotent) => {
                tracing::debug!(op, error = %err, "Retrying coordination store operation");
                self.attempt(f()).await
            }
            other => other,
        }
    }
}

fn should_retry(err: &StoreError, idempotent: bool) -> bool {
    match err {
        StoreError::Unavailable(_) => true,
        StoreError::Timeout(_) => idempotent,
        StoreError::Contention(_) | StoreError::Corrupt(_) => false,
    }
}

#[async_trait]
impl CoordinationStore for TimeoutStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.with_retry("get", true, || self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        self.with_retry("set", true, || self.inner.set(key, value.clone(), ttl))
            .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.with_retry("delete", true, || self.inner.delete(key)).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.with_retry("compare_and_swap", false, || {
            self.inner.compare_and_swap(key, expected, new.clone(), ttl)
        })
        .await
    }

    async fn increment_bounded(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<BoundedIncrement> {
        self.with_retry("increment_bounded", false, || {
            self.inner.increment_bounded(key, ceiling, ttl)
        })
        .await
    }
}
