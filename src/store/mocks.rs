//! Test doubles for coordination stores.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::store::{
    BoundedIncrement, CoordinationStore, SharedStore, StoreError, StoreResult,
};

/// Store whose backend can be switched off to simulate an outage.
///
/// While down, every operation fails with [`StoreError::Unavailable`]
/// without touching the wrapped store.
#[derive(Debug)]
pub struct SwitchableStore {
    inner: SharedStore,
    down: AtomicBool,
    failed_calls: AtomicUsize,
}

impl SwitchableStore {
    pub fn new(inner: SharedStore) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            failed_calls: AtomicUsize::new(0),
        }
    }

    /// A store that is permanently unreachable.
    pub fn unreachable() -> Self {
        let store = Self::new(std::sync::Arc::new(crate::store::MemoryStore::new()));
        store.set_down(true);
        store
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Operations rejected while the store was down.
    pub fn failed_calls(&self) -> usize {
        self.failed_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationStore for SwitchableStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.compare_and_swap(key, expected, new, ttl).await
    }

    async fn increment_bounded(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<BoundedIncrement> {
        self.check()?;
        self.inner.increment_bounded(key, ceiling, ttl).await
    }
}
