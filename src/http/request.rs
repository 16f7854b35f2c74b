//! Inbound request handling.
//!
//! # Responsibilities
//! - Expose the request ID set by the outer layer
//! - Turn request parts into a `RequestContext` for the pipeline
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing (outermost layer)
//! - Identity comes only from the authentication component's headers

use std::net::IpAddr;

use axum::http::{header, request::Parts, HeaderName};

use crate::admission::RequestContext;
use crate::security::headers::claims_from_headers;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub fn request_id(parts: &Parts) -> String {
    parts
        .headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

pub fn context_from_parts(parts: &Parts, client_ip: IpAddr) -> RequestContext {
    let if_none_match = parts
        .headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    RequestContext::new(parts.method.clone(), parts.uri.path(), parts.uri.query(), client_ip)
        .with_request_id(request_id(parts))
        .with_claims(claims_from_headers(&parts.headers))
        .with_if_none_match(if_none_match)
}
