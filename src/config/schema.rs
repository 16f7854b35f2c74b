//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::Tier;

/// Root configuration for the admission gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Business service sitting behind the gateway.
    pub upstream: UpstreamConfig,

    /// Shared coordination store.
    pub store: StoreConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-tier quotas.
    pub rate_limit: RateLimitConfig,

    /// Token revocation checks.
    pub revocation: RevocationConfig,

    /// Response cache TTLs.
    pub cache: CacheConfig,

    /// Circuit breaker, connection pool and retry settings for the upstream.
    pub dependency: DependencyConfig,

    /// Concurrency throttle for expensive operations.
    pub throttle: ThrottleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Upstream (business service) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Dependency name used in logs, metrics and the admin API.
    pub name: String,

    /// Base URL of the business service.
    pub url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            name: "analytics".to_string(),
            url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Which coordination store backs the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// Coordination store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Redis connection URL (only for the redis backend).
    pub redis_url: String,

    /// Prefix prepended to every Redis key.
    pub key_prefix: String,

    /// Deadline for a single store operation in milliseconds.
    pub op_timeout_ms: u64,

    /// Interval between expired-entry sweeps of in-process stores.
    pub sweep_interval_secs: u64,
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1/".to_string(),
            key_prefix: "admission:".to_string(),
            op_timeout_ms: 50,
            sweep_interval_secs: 30,
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// A (limit, window) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierLimit {
    /// Requests allowed per window.
    pub limit: u64,

    /// Window length in seconds.
    pub window_secs: u64,
}

impl TierLimit {
    pub const fn new(limit: u64, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Endpoint-specific quota replacing the tier default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointOverride {
    /// Path prefix the override applies to.
    pub endpoint: String,

    /// Restrict the override to one tier; applies to all tiers when absent.
    #[serde(default)]
    pub tier: Option<Tier>,

    pub limit: u64,

    pub window_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    pub anonymous: TierLimit,
    pub authenticated: TierLimit,
    pub premium: TierLimit,

    pub overrides: Vec<EndpointOverride>,

    /// Endpoint prefixes denied (instead of locally counted) while the
    /// counter store is unreachable.
    pub fail_closed_endpoints: Vec<String>,
}

impl RateLimitConfig {
    pub fn tier_limit(&self, tier: Tier) -> TierLimit {
        match tier {
            Tier::Anonymous => self.anonymous,
            Tier::Authenticated => self.authenticated,
            Tier::Premium => self.premium,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anonymous: TierLimit::new(60, 60),
            authenticated: TierLimit::new(300, 60),
            premium: TierLimit::new(1200, 60),
            overrides: vec![EndpointOverride {
                endpoint: "/auth/login".to_string(),
                tier: None,
                limit: 10,
                window_secs: 300,
            }],
            fail_closed_endpoints: vec![
                "/auth/login".to_string(),
                "/auth/password-reset".to_string(),
            ],
        }
    }
}

/// Token revocation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Enable revocation checks.
    pub enabled: bool,

    /// Longest lifetime the authentication component issues tokens with.
    /// Bounds how long a subject cutover has to be remembered.
    pub max_token_lifetime_secs: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_token_lifetime_secs: 24 * 3600,
        }
    }
}

/// TTL rule for keys starting with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheRule {
    pub prefix: String,

    /// Zero disables caching for the pattern.
    pub ttl_secs: u64,

    /// One copy per tier instead of per identity. Only for responses the
    /// upstream does not personalise.
    #[serde(default)]
    pub shared: bool,
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the response cache.
    pub enabled: bool,

    /// TTL for keys no rule matches.
    pub default_ttl_secs: u64,

    pub rules: Vec<CacheRule>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 30,
            rules: vec![
                CacheRule {
                    prefix: "/api/stats".to_string(),
                    ttl_secs: 15,
                    shared: true,
                },
                CacheRule {
                    prefix: "/api/trades/history".to_string(),
                    ttl_secs: 3600,
                    shared: true,
                },
                CacheRule {
                    prefix: "/api/politicians".to_string(),
                    ttl_secs: 600,
                    shared: true,
                },
            ],
        }
    }
}

/// Dependency guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DependencyConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,

    /// Rolling window failures are counted in, in seconds.
    pub failure_window_secs: u64,

    /// How long the circuit stays open before a probe, in seconds.
    pub cooldown_secs: u64,

    /// Maximum concurrent connections to the dependency.
    pub pool_size: usize,

    /// How long to wait for a pooled connection, in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Deadline for a single dependency call, in milliseconds.
    pub call_timeout_ms: u64,

    /// Base delay for the jittered retry backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum retry backoff in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_secs: 30,
            cooldown_secs: 15,
            pool_size: 64,
            acquire_timeout_ms: 250,
            call_timeout_ms: 5_000,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 500,
        }
    }
}

/// Concurrency throttle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Requests admitted concurrently into the guarded section.
    pub max_concurrent: usize,

    /// How long a request waits for a permit, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 32,
            acquire_timeout_ms: 100,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API under `/admin`.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
