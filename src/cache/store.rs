//! Cache-aside response store over the coordination store.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::cache::entry::{etag_matches, CacheEntry};
use crate::cache::key::CacheKey;
use crate::cache::policy::TtlPolicy;
use crate::clock::SharedClock;
use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::security::Tier;
use crate::store::SharedStore;

/// Result of a plain lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss,
}

/// Result of a conditional (`If-None-Match`) lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditional {
    /// Stored and client copies differ; serve the body.
    Fresh(CacheEntry),
    /// Client copy is current; answer 304.
    NotModified(CacheEntry),
    Miss,
}

pub struct ResponseCache {
    store: SharedStore,
    clock: SharedClock,
    policy: ArcSwap<TtlPolicy>,
}

fn store_key(key: &CacheKey) -> String {
    format!("cache:{key}")
}

impl ResponseCache {
    pub fn new(store: SharedStore, config: &CacheConfig, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            policy: ArcSwap::from_pointee(TtlPolicy::new(config)),
        }
    }

    pub fn update_policy(&self, config: &CacheConfig) {
        self.policy.store(Arc::new(TtlPolicy::new(config)));
        tracing::info!(rules = config.rules.len(), "Cache TTL rules reloaded");
    }

    pub fn ttl_for(&self, resource: &str) -> Duration {
        self.policy.load().ttl_for(resource)
    }

    /// Key for `resource` as seen by a caller of `tier` identified by
    /// `identifier`: tier-wide for shared rules, per identity otherwise.
    pub fn key_for(&self, resource: &str, tier: Tier, identifier: &str) -> CacheKey {
        if self.policy.load().is_shared(resource) {
            CacheKey::shared(tier, resource)
        } else {
            CacheKey::private(identifier, resource)
        }
    }

    pub async fn get(&self, key: &CacheKey) -> CacheLookup {
        let raw = match self.store.get(&store_key(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                return CacheLookup::Miss;
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Cache read failed; treating as miss");
                metrics::record_cache_lookup("error");
                return CacheLookup::Miss;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Undecodable cache entry; treating as miss");
                metrics::record_cache_lookup("error");
                return CacheLookup::Miss;
            }
        };

        if !entry.is_fresh(self.clock.now_millis()) {
            metrics::record_cache_lookup("miss");
            return CacheLookup::Miss;
        }

        metrics::record_cache_lookup("hit");
        CacheLookup::Hit(entry)
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Returns the entry that was built, or `None` when `ttl` is zero. A
    /// failed store write still returns the entry so the caller can emit
    /// its validator.
    pub async fn put(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        content_type: Option<String>,
        ttl: Duration,
    ) -> Option<CacheEntry> {
        if ttl.is_zero() {
            return None;
        }
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let entry = CacheEntry::new(&key.to_string(), value, content_type, self.clock.now_millis(), ttl_ms);
        match serde_json::to_vec(&entry) {
            Ok(encoded) => {
                if let Err(err) = self.store.set(&store_key(key), encoded, ttl).await {
                    tracing::warn!(key = %key, error = %err, "Cache write failed");
                } else {
                    tracing::debug!(key = %key, ttl_ms, etag = %entry.etag, "Response cached");
                }
            }
            Err(err) => tracing::warn!(key = %key, error = %err, "Failed to encode cache entry"),
        }
        Some(entry)
    }

    /// `put` with the TTL taken from the rule matching the key's resource.
    pub async fn put_with_policy(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        content_type: Option<String>,
    ) -> Option<CacheEntry> {
        let ttl = self.ttl_for(key.resource());
        self.put(key, value, content_type, ttl).await
    }

    /// Lookup honouring the client's `If-None-Match` value.
    pub async fn conditional(&self, key: &CacheKey, if_none_match: Option<&str>) -> Conditional {
        match self.get(key).await {
            CacheLookup::Hit(entry) => match if_none_match {
                Some(tags) if etag_matches(tags, &entry.etag) => Conditional::NotModified(entry),
                _ => Conditional::Fresh(entry),
            },
            CacheLookup::Miss => Conditional::Miss,
        }
    }
}
