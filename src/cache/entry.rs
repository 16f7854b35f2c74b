//! Cached response record and entity tags.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One cached response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Quoted strong validator, e.g. `"9f86d0..."`.
    pub etag: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub stored_at_ms: u64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn new(key: &str, value: Vec<u8>, content_type: Option<String>, stored_at_ms: u64, ttl_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            etag: etag_for(&value),
            value,
            content_type,
            stored_at_ms,
            ttl_ms,
        }
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.stored_at_ms.saturating_add(self.ttl_ms)
    }

    /// Servable at `now_ms`.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms <= self.expires_at_ms()
    }

    /// Seconds of freshness left, for `Cache-Control: max-age`.
    pub fn max_age_secs(&self, now_ms: u64) -> u64 {
        self.expires_at_ms().saturating_sub(now_ms) / 1000
    }
}

/// Strong ETag over the body: quoted hex SHA-256.
pub fn etag_for(value: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(value)))
}

/// `If-None-Match` evaluation (weak comparison).
///
/// Accepts a comma separated list, `*`, and `W/` prefixed tags.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    let wanted = strip_weak(etag.trim());
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || strip_weak(candidate) == wanted)
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
