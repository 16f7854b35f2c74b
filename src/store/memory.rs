//! In-process coordination store.
//!
//! Used as the store for single-instance deployments and tests, and as the
//! rate limiter's local fallback while the shared store is unreachable.
//! Atomicity comes from DashMap's per-shard locking through the entry API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::clock::{SharedClock, SystemClock};
use crate::store::{
    decode_counter, encode_counter, BoundedIncrement, CoordinationStore, StoreResult,
};

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    /// Unix milliseconds after which the slot reads as absent.
    expires_at: u64,
}

impl Slot {
    fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

/// DashMap-backed store with TTL expiry.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Slot>>,
    clock: SharedClock,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of slots held, expired ones included until the next purge.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired slots. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn expiry(&self, ttl: Duration) -> u64 {
        self.clock.now_millis().saturating_add(ttl.as_millis() as u64)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        let expires_at = self.expiry(ttl);
        self.entries.insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        let slot = Slot {
            value: new,
            expires_at: self.expiry(ttl),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied
                    .get()
                    .is_live(now)
                    .then(|| occupied.get().value.as_slice());
                if current != expected {
                    return Ok(false);
                }
                occupied.insert(slot);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn increment_bounded(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<BoundedIncrement> {
        let now = self.clock.now_millis();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let current = if slot.is_live(now) {
                    decode_counter(key, &slot.value)?
                } else {
                    slot.expires_at = now.saturating_add(ttl.as_millis() as u64);
                    0
                };
                if current >= ceiling {
                    slot.value = encode_counter(current);
                    return Ok(BoundedIncrement::AtCeiling(current));
                }
                slot.value = encode_counter(current + 1);
                Ok(BoundedIncrement::Incremented(current + 1))
            }
            Entry::Vacant(vacant) => {
                if ceiling == 0 {
                    return Ok(BoundedIncrement::AtCeiling(0));
                }
                vacant.insert(Slot {
                    value: encode_counter(1),
                    expires_at: now.saturating_add(ttl.as_millis() as u64),
                });
                Ok(BoundedIncrement::Incremented(1))
            }
        }
    }
}
