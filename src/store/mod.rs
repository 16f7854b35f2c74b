//! Shared coordination store.
//!
//! # Data Flow
//! ```text
//! RateLimiter ──────────┐   rl:{tier}:{endpoint}:{identifier}:{window}
//! TokenRevocationStore ─┼─▶ TimeoutStore ─▶ MemoryStore | RedisStore
//! ResponseCache ────────┘   rev:tok:* / rev:sub:* / cache:*
//! ```
//!
//! # Design Decisions
//! - Every component owns a disjoint key prefix; no multi-key transactions
//! - Only single-key atomicity is required: bounded increment, compare-and-swap,
//!   expiring set
//! - Stores lacking a native bounded increment get one emulated through a
//!   compare-and-swap retry loop
//! - Counters are stored as decimal ASCII so they stay compatible with
//!   native `INCR`-style commands

pub mod memory;
pub mod mocks;
#[cfg(feature = "redis-store")]
pub mod redis;
pub mod timeout;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;
pub use timeout::TimeoutStore;

/// Attempts made by the emulated bounded increment before giving up.
const MAX_CAS_ATTEMPTS: usize = 16;

/// Errors raised by coordination store backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Backend could not be reached; the operation was not applied.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// Operation did not complete within its deadline; it may have applied.
    #[error("coordination store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Compare-and-swap kept losing races.
    #[error("contention on key {0}")]
    Contention(String),

    /// Stored value could not be decoded.
    #[error("corrupt value at key {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an atomic bounded increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundedIncrement {
    /// Counter was incremented; holds the new value.
    Incremented(u64),
    /// Counter already sat at (or above) the ceiling; holds the current value.
    AtCeiling(u64),
}

/// Networked key-value store with the atomic primitives the layer relies on.
#[async_trait]
pub trait CoordinationStore: Send + Sync + Debug {
    /// Read a value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Unconditionally write a value with a time-to-live.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Write `new` only if the current value equals `expected`
    /// (`None` meaning "key absent"). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Atomically increment the counter at `key` if the result stays
    /// `<= ceiling`. The expiry is set when the key is created.
    async fn increment_bounded(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<BoundedIncrement> {
        emulate_bounded_increment(self, key, ceiling, ttl).await
    }
}

/// Shareable store reference.
pub type SharedStore = Arc<dyn CoordinationStore>;

/// Bounded increment built from `get` + `compare_and_swap`.
pub async fn emulate_bounded_increment<S>(
    store: &S,
    key: &str,
    ceiling: u64,
    ttl: Duration,
) -> StoreResult<BoundedIncrement>
where
    S: CoordinationStore + ?Sized,
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let raw = store.get(key).await?;
        let current = match &raw {
            Some(bytes) => decode_counter(key, bytes)?,
            None => 0,
        };

        if current >= ceiling {
            return Ok(BoundedIncrement::AtCeiling(current));
        }

        let next = current + 1;
        if store
            .compare_and_swap(key, raw.as_deref(), encode_counter(next), ttl)
            .await?
        {
            return Ok(BoundedIncrement::Incremented(next));
        }
    }

    tracing::warn!(key = %key, attempts = MAX_CAS_ATTEMPTS, "Bounded increment gave up after CAS contention");
    Err(StoreError::Contention(key.to_string()))
}

pub fn encode_counter(value: u64) -> Vec<u8> {
    value.to_string().into_bytes()
}

pub fn decode_counter(key: &str, bytes: &[u8]) -> StoreResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| StoreError::Corrupt(key.to_string()))
}

/// Read a counter, treating a missing key as zero.
pub async fn read_counter(store: &dyn CoordinationStore, key: &str) -> StoreResult<u64> {
    match store.get(key).await? {
        Some(bytes) => decode_counter(key, &bytes),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that only offers get/CAS so the emulated increment is exercised.
    #[derive(Debug)]
    struct CasOnly {
        inner: MemoryStore,
        cas_calls: AtomicUsize,
    }

    #[async_trait]
    impl CoordinationStore for CasOnly {
        async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            self.inner.delete(key).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<&[u8]>,
            new: Vec<u8>,
            ttl: Duration,
        ) -> StoreResult<bool> {
            self.cas_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.compare_and_swap(key, expected, new, ttl).await
        }
    }

    fn cas_only() -> Arc<CasOnly> {
        Arc::new(CasOnly {
            inner: MemoryStore::with_clock(Arc::new(MockClock::new(0))),
            cas_calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_counter_encoding() {
        assert_eq!(encode_counter(42), b"42".to_vec());
        assert_eq!(decode_counter("k", b"42").unwrap(), 42);
        assert_eq!(
            decode_counter("k", b"forty"),
            Err(StoreError::Corrupt("k".to_string()))
        );
    }

    #[tokio::test]
    async fn test_emulated_increment_respects_ceiling() {
        let store = cas_only();
        let ttl = Duration::from_secs(60);

        for expected in 1..=3 {
            let result = store.increment_bounded("c", 3, ttl).await.unwrap();
            assert_eq!(result, BoundedIncrement::Incremented(expected));
        }
        let result = store.increment_bounded("c", 3, ttl).await.unwrap();
        assert_eq!(result, BoundedIncrement::AtCeiling(3));
        assert_eq!(store.cas_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_emulated_increment_exact_under_contention() {
        let store = cas_only();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut allowed = 0;
                for _ in 0..5 {
                    match store.increment_bounded("hot", 20, Duration::from_secs(60)).await {
                        Ok(BoundedIncrement::Incremented(_)) => allowed += 1,
                        Ok(BoundedIncrement::AtCeiling(_)) => {}
                        Err(StoreError::Contention(_)) => {}
                        Err(e) => panic!("unexpected store error: {e}"),
                    }
                }
                allowed
            }));
        }

        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }
        let stored = read_counter(store.as_ref(), "hot").await.unwrap();
        assert!(total <= 20);
        assert_eq!(stored, total as u64);
    }
}
