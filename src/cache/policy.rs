//! Per-key-pattern TTL and sharing rules.

use std::time::Duration;

use crate::config::{CacheConfig, CacheRule};

/// Resolves the TTL for a cache key.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    enabled: bool,
    default_ttl: Duration,
    rules: Vec<CacheRule>,
}

impl TtlPolicy {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            rules: config.rules.clone(),
        }
    }

    fn rule_for(&self, resource: &str) -> Option<&CacheRule> {
        self.rules
            .iter()
            .filter(|rule| resource.starts_with(rule.prefix.as_str()))
            .max_by_key(|rule| rule.prefix.len())
    }

    /// Longest matching prefix wins; zero means "do not cache".
    pub fn ttl_for(&self, resource: &str) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        self.rule_for(resource)
            .map(|rule| Duration::from_secs(rule.ttl_secs))
            .unwrap_or(self.default_ttl)
    }

    /// Whether callers of one tier may share a copy. Unmatched resources
    /// are private.
    pub fn is_shared(&self, resource: &str) -> bool {
        self.rule_for(resource).is_some_and(|rule| rule.shared)
    }
}
