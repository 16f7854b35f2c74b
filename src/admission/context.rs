//! Per-request input to the admission pipeline.

use std::net::IpAddr;

use axum::http::Method;

use crate::resilience::CallKind;
use crate::security::{Tier, TokenClaims};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    /// Request path; matched against rate-limit overrides.
    pub endpoint: String,
    /// Path plus query; what the response cache stores.
    pub resource: String,
    pub client_ip: IpAddr,
    pub claims: Option<TokenClaims>,
    /// Raw `If-None-Match` header value.
    pub if_none_match: Option<String>,
}

impl RequestContext {
    pub fn new(method: Method, path: &str, query: Option<&str>, client_ip: IpAddr) -> Self {
        let resource = match query {
            Some(q) if !q.is_empty() => format!("{path}?{q}"),
            _ => path.to_string(),
        };
        Self {
            request_id: String::new(),
            method,
            endpoint: path.to_string(),
            resource,
            client_ip,
            claims: None,
            if_none_match: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_claims(mut self, claims: Option<TokenClaims>) -> Self {
        self.claims = claims;
        self
    }

    pub fn with_if_none_match(mut self, value: Option<String>) -> Self {
        self.if_none_match = value;
        self
    }

    pub fn tier(&self) -> Tier {
        self.claims.as_ref().map_or(Tier::Anonymous, |c| c.tier)
    }

    /// Who the request is charged to: the subject when authenticated,
    /// otherwise the client address.
    pub fn identifier(&self) -> String {
        match &self.claims {
            Some(claims) => format!("sub:{}", claims.subject_id),
            None => format!("ip:{}", self.client_ip),
        }
    }

    pub fn call_kind(&self) -> CallKind {
        CallKind::from_method(&self.method)
    }
}
