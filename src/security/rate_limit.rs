//! Sliding-window rate limiting with tiered quotas.
//!
//! Two adjacent fixed windows approximate a sliding one: the previous
//! window's count is weighted by the fraction of the current window that has
//! not elapsed yet. Only one counter per window is stored, so memory stays
//! bounded and a check costs two store round trips.
//!
//! ```text
//! weighted = prev * (1 - elapsed / window) + current
//! allowed  ⇔ current + 1 <= floor(limit - prev * (1 - elapsed / window))
//! ```
//!
//! The increment-and-compare is one atomic bounded increment against the
//! shared store, so two instances can never both admit the last slot.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::clock::SharedClock;
use crate::config::{RateLimitConfig, TierLimit};
use crate::observability::metrics;
use crate::security::Tier;
use crate::store::{
    read_counter, BoundedIncrement, CoordinationStore, MemoryStore, SharedStore, StoreResult,
};

/// Quota state reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Time until the current window rolls over.
    pub reset_after: Duration,
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed(RateLimitStatus),
    Denied {
        status: RateLimitStatus,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed(_))
    }

    pub fn status(&self) -> RateLimitStatus {
        match self {
            RateLimitDecision::Allowed(status) => *status,
            RateLimitDecision::Denied { status, .. } => *status,
        }
    }
}

/// Resolved quotas: tier defaults, endpoint overrides and fail-closed set.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    config: RateLimitConfig,
}

/// Quota that applies to one request and the counter scope it is charged to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuota {
    pub quota: TierLimit,
    /// Override prefix, or `*` for the tier-wide bucket.
    pub scope: String,
}

impl RateLimitPolicy {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Longest matching override prefix wins; at equal length a tier-specific
    /// override beats a tier-agnostic one.
    pub fn resolve(&self, tier: Tier, endpoint: &str) -> ResolvedQuota {
        self.config
            .overrides
            .iter()
            .filter(|o| endpoint.starts_with(&o.endpoint))
            .filter(|o| o.tier.map_or(true, |t| t == tier))
            .max_by_key(|o| (o.endpoint.len(), o.tier.is_some()))
            .map(|o| ResolvedQuota {
                quota: TierLimit::new(o.limit, o.window_secs),
                scope: o.endpoint.clone(),
            })
            .unwrap_or_else(|| ResolvedQuota {
                quota: self.config.tier_limit(tier),
                scope: "*".to_string(),
            })
    }

    /// Authentication-adjacent endpoints deny while the store is down.
    pub fn is_fail_closed(&self, endpoint: &str) -> bool {
        self.config
            .fail_closed_endpoints
            .iter()
            .any(|prefix| endpoint.starts_with(prefix.as_str()))
    }
}

/// Window geometry for one check.
#[derive(Debug, Clone, Copy)]
struct Window {
    index: u64,
    length_ms: u64,
    elapsed_ms: u64,
}

impl Window {
    fn at(now_ms: u64, length: Duration) -> Self {
        let length_ms = (length.as_millis() as u64).max(1);
        Self {
            index: now_ms / length_ms,
            length_ms,
            elapsed_ms: now_ms % length_ms,
        }
    }

    fn reset_after(&self) -> Duration {
        Duration::from_millis(self.length_ms - self.elapsed_ms)
    }

    fn unelapsed_fraction(&self) -> f64 {
        (self.length_ms - self.elapsed_ms) as f64 / self.length_ms as f64
    }

    /// Whole seconds, rounded up, never zero.
    fn retry_after(&self) -> Duration {
        let ms = self.length_ms - self.elapsed_ms;
        Duration::from_secs(ms.div_ceil(1000).max(1))
    }
}

/// Per-identifier request quotas over sliding windows.
pub struct RateLimiter {
    store: SharedStore,
    fallback: MemoryStore,
    policy: ArcSwap<RateLimitPolicy>,
}

impl RateLimiter {
    pub fn new(store: SharedStore, config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            store,
            fallback: MemoryStore::with_clock(clock),
            policy: ArcSwap::from_pointee(RateLimitPolicy::new(config)),
        }
    }

    pub fn policy(&self) -> Arc<RateLimitPolicy> {
        self.policy.load_full()
    }

    /// Swap in new quotas. Counters already in the store are kept.
    pub fn update_policy(&self, config: RateLimitConfig) {
        self.policy.store(Arc::new(RateLimitPolicy::new(config)));
        tracing::info!("Rate limit policy reloaded");
    }

    /// Local fallback counters, exposed for sweeping.
    pub fn fallback_store(&self) -> &MemoryStore {
        &self.fallback
    }

    /// Current quota state for `identifier` without charging a request.
    /// `None` when the counters cannot be read.
    pub async fn status(&self, identifier: &str, tier: Tier, endpoint: &str, now_ms: u64) -> Option<RateLimitStatus> {
        let policy = self.policy.load();
        let resolved = policy.resolve(tier, endpoint);
        let window = Window::at(now_ms, resolved.quota.window());
        let base_key = format!("rl:{}:{}:{}", tier, resolved.scope, identifier);

        let read = async {
            let ceiling = ceiling(self.store.as_ref(), &base_key, resolved.quota, window).await?;
            let current = read_counter(self.store.as_ref(), &format!("{base_key}:{}", window.index)).await?;
            StoreResult::Ok(ceiling.saturating_sub(current))
        };
        match read.await {
            Ok(remaining) => Some(RateLimitStatus {
                limit: resolved.quota.limit,
                remaining,
                reset_after: window.reset_after(),
            }),
            Err(err) => {
                tracing::debug!(identifier = %identifier, error = %err, "Quota status unavailable");
                None
            }
        }
    }

    /// Charge one request to `identifier` and decide whether it may proceed.
    pub async fn check_and_increment(
        &self,
        identifier: &str,
        tier: Tier,
        endpoint: &str,
        now_ms: u64,
    ) -> RateLimitDecision {
        let policy = self.policy.load();
        let resolved = policy.resolve(tier, endpoint);
        let window = Window::at(now_ms, resolved.quota.window());
        let base_key = format!("rl:{}:{}:{}", tier, resolved.scope, identifier);

        match evaluate(self.store.as_ref(), &base_key, resolved.quota, window).await {
            Ok(decision) => decision,
            Err(err) if policy.is_fail_closed(endpoint) => {
                tracing::warn!(
                    identifier = %identifier,
                    endpoint = %endpoint,
                    error = %err,
                    "Rate limit store unreachable; denying fail-closed endpoint"
                );
                metrics::record_rate_limit_degraded("fail_closed");
                RateLimitDecision::Denied {
                    status: RateLimitStatus {
                        limit: resolved.quota.limit,
                        remaining: 0,
                        reset_after: window.reset_after(),
                    },
                    retry_after: window.retry_after(),
                }
            }
            Err(err) => {
                tracing::warn!(
                    identifier = %identifier,
                    endpoint = %endpoint,
                    error = %err,
                    "Rate limit store unreachable; using local counters (degraded)"
                );
                metrics::record_rate_limit_degraded("fail_open");
                // The in-process store cannot fail; fall back to allowing if it ever does.
                evaluate(&self.fallback, &base_key, resolved.quota, window)
                    .await
                    .unwrap_or(RateLimitDecision::Allowed(RateLimitStatus {
                        limit: resolved.quota.limit,
                        remaining: 0,
                        reset_after: window.reset_after(),
                    }))
            }
        }
    }
}

/// Largest current-window count still allowed once the previous window is weighted in.
async fn ceiling(store: &dyn CoordinationStore, base_key: &str, quota: TierLimit, window: Window) -> StoreResult<u64> {
    let previous = match window.index.checked_sub(1) {
        Some(prev_index) => read_counter(store, &format!("{base_key}:{prev_index}")).await?,
        None => 0,
    };

    let weighted_previous = previous as f64 * window.unelapsed_fraction();
    Ok((quota.limit as f64 - weighted_previous).floor().max(0.0) as u64)
}

async fn evaluate(
    store: &dyn CoordinationStore,
    base_key: &str,
    quota: TierLimit,
    window: Window,
) -> StoreResult<RateLimitDecision> {
    let ceiling = ceiling(store, base_key, quota, window).await?;
    // Two windows: the counter must outlive its own window to act as "previous".
    let ttl = Duration::from_millis(window.length_ms * 2);

    let current_key = format!("{base_key}:{}", window.index);
    let decision = match store.increment_bounded(&current_key, ceiling, ttl).await? {
        BoundedIncrement::Incremented(count) => RateLimitDecision::Allowed(RateLimitStatus {
            limit: quota.limit,
            remaining: ceiling.saturating_sub(count),
            reset_after: window.reset_after(),
        }),
        BoundedIncrement::AtCeiling(_) => RateLimitDecision::Denied {
            status: RateLimitStatus {
                limit: quota.limit,
                remaining: 0,
                reset_after: window.reset_after(),
            },
            retry_after: window.retry_after(),
        },
    };
    Ok(decision)
}
