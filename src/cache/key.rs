//! Cache keys scoped to the callers allowed to share an entry.

use std::fmt;

use crate::security::Tier;

/// A resource (path plus query) and the audience its cached copy belongs to.
///
/// Shared rules scope entries to a tier; everything else is private to one
/// identity (`sub:{id}` or `ip:{addr}`), since the upstream sees the caller's
/// identity headers and may personalise the body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: String,
    resource: String,
}

impl CacheKey {
    /// Entry shared by every caller of `tier`.
    pub fn shared(tier: Tier, resource: &str) -> Self {
        Self {
            scope: format!("tier:{tier}"),
            resource: resource.to_string(),
        }
    }

    /// Entry visible only to `identifier`.
    pub fn private(identifier: &str, resource: &str) -> Self {
        Self {
            scope: identifier.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Path plus query; what TTL rules match against.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.resource)
    }
}
