//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits, windows and timeouts > 0)
//! - Check addresses and URLs parse
//! - Detect duplicated override / cache rules
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AdmissionConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{AdmissionConfig, StoreBackend, TierLimit};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &AdmissionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    match url::Url::parse(&config.upstream.url) {
        Ok(url) if url.scheme() == "http" => {}
        Ok(url) => errors.push(ValidationError::new(
            "upstream.url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("upstream.url", e.to_string())),
    }

    if config.store.op_timeout_ms == 0 {
        errors.push(ValidationError::new("store.op_timeout_ms", "must be > 0"));
    }
    if config.store.backend == StoreBackend::Redis && config.store.redis_url.is_empty() {
        errors.push(ValidationError::new(
            "store.redis_url",
            "required when store.backend = \"redis\"",
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let rl = &config.rate_limit;
    check_tier_limit(&mut errors, "rate_limit.anonymous", rl.anonymous);
    check_tier_limit(&mut errors, "rate_limit.authenticated", rl.authenticated);
    check_tier_limit(&mut errors, "rate_limit.premium", rl.premium);

    let mut seen = HashSet::new();
    for (i, o) in rl.overrides.iter().enumerate() {
        let field = format!("rate_limit.overrides[{i}]");
        if !o.endpoint.starts_with('/') {
            errors.push(ValidationError::new(&field, "endpoint must start with '/'"));
        }
        check_tier_limit(&mut errors, &field, TierLimit::new(o.limit, o.window_secs));
        if !seen.insert((o.endpoint.as_str(), o.tier)) {
            errors.push(ValidationError::new(&field, "duplicate endpoint/tier override"));
        }
    }

    if config.revocation.max_token_lifetime_secs == 0 {
        errors.push(ValidationError::new(
            "revocation.max_token_lifetime_secs",
            "must be > 0",
        ));
    }

    let mut prefixes = HashSet::new();
    for (i, rule) in config.cache.rules.iter().enumerate() {
        if !prefixes.insert(rule.prefix.as_str()) {
            errors.push(ValidationError::new(
                format!("cache.rules[{i}]"),
                format!("duplicate prefix '{}'", rule.prefix),
            ));
        }
    }

    let dep = &config.dependency;
    for (field, value) in [
        ("dependency.failure_threshold", dep.failure_threshold as u64),
        ("dependency.failure_window_secs", dep.failure_window_secs),
        ("dependency.cooldown_secs", dep.cooldown_secs),
        ("dependency.pool_size", dep.pool_size as u64),
        ("dependency.call_timeout_ms", dep.call_timeout_ms),
        ("throttle.max_concurrent", config.throttle.max_concurrent as u64),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if dep.retry_base_delay_ms > dep.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "dependency.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if config.admin.enabled && config.admin.api_key.len() < 16 {
        errors.push(ValidationError::new(
            "admin.api_key",
            "must be at least 16 characters when the admin API is enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_tier_limit(errors: &mut Vec<ValidationError>, field: &str, limit: TierLimit) {
    if limit.limit == 0 {
        errors.push(ValidationError::new(format!("{field}.limit"), "must be > 0"));
    }
    if limit.window_secs == 0 {
        errors.push(ValidationError::new(format!("{field}.window_secs"), "must be > 0"));
    }
}
