//! Header handling at the gateway edge.
//!
//! # Responsibilities
//! - Read the identity the authentication component attached
//!   (`X-Auth-Subject`, `X-Auth-Token-Id`, `X-Auth-Issued-At`, `X-Auth-Tier`)
//! - Strip hop-by-hop headers before forwarding upstream
//! - Append the client address to `X-Forwarded-For`
//!
//! # Design Decisions
//! - Identity headers are trusted: the authentication component sits in
//!   front and overwrites them. A partial or malformed set is treated as
//!   anonymous rather than rejected.
//! - `X-Auth-Issued-At` is unix seconds on the wire, milliseconds inside.

use std::net::IpAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::security::Tier;

pub const AUTH_SUBJECT: &str = "x-auth-subject";
pub const AUTH_TOKEN_ID: &str = "x-auth-token-id";
pub const AUTH_ISSUED_AT: &str = "x-auth-issued-at";
pub const AUTH_TIER: &str = "x-auth-tier";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Identity of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject_id: String,
    pub token_id: String,
    /// Issue time, unix milliseconds.
    pub issued_at_ms: u64,
    pub tier: Tier,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parse the identity headers. `None` means anonymous.
pub fn claims_from_headers(headers: &HeaderMap) -> Option<TokenClaims> {
    let subject_id = header_str(headers, AUTH_SUBJECT)?;
    let token_id = header_str(headers, AUTH_TOKEN_ID)?;
    let issued_at_secs: u64 = match header_str(headers, AUTH_ISSUED_AT)?.parse() {
        Ok(secs) => secs,
        Err(_) => {
            tracing::debug!(subject_id = %subject_id, "Malformed X-Auth-Issued-At; treating as anonymous");
            return None;
        }
    };
    let tier = match header_str(headers, AUTH_TIER) {
        Some(raw) => raw.parse().unwrap_or(Tier::Authenticated),
        None => Tier::Authenticated,
    };

    Some(TokenClaims {
        subject_id: subject_id.to_string(),
        token_id: token_id.to_string(),
        issued_at_ms: issued_at_secs.saturating_mul(1000),
        tier,
    })
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Append `client` to `X-Forwarded-For`.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let value = match header_str(headers, X_FORWARDED_FOR) {
        Some(existing) => format!("{existing}, {client}"),
        None => client.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_headers(tier: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_SUBJECT, HeaderValue::from_static("user-7"));
        headers.insert(AUTH_TOKEN_ID, HeaderValue::from_static("tok-1"));
        headers.insert(AUTH_ISSUED_AT, HeaderValue::from_static("1700000000"));
        if let Some(tier) = tier {
            headers.insert(AUTH_TIER, HeaderValue::from_str(tier).unwrap());
        }
        headers
    }

    #[test]
    fn test_claims_from_complete_headers() {
        let claims = claims_from_headers(&auth_headers(Some("premium"))).unwrap();
        assert_eq!(claims.subject_id, "user-7");
        assert_eq!(claims.token_id, "tok-1");
        assert_eq!(claims.issued_at_ms, 1_700_000_000_000);
        assert_eq!(claims.tier, Tier::Premium);
    }

    #[test]
    fn test_missing_tier_defaults_to_authenticated() {
        let claims = claims_from_headers(&auth_headers(None)).unwrap();
        assert_eq!(claims.tier, Tier::Authenticated);
    }

    #[test]
    fn test_partial_headers_are_anonymous() {
        let mut headers = auth_headers(None);
        headers.remove(AUTH_TOKEN_ID);
        assert!(claims_from_headers(&headers).is_none());

        let mut headers = auth_headers(None);
        headers.insert(AUTH_ISSUED_AT, HeaderValue::from_static("yesterday"));
        assert!(claims_from_headers(&headers).is_none());
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-internal"));
        headers.insert("x-internal", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_append_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());
        append_forwarded_for(&mut headers, "10.0.0.2".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.1, 10.0.0.2");
    }
}
