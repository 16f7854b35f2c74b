//! Request forwarding to the business service.
//!
//! Every request that reaches the fallback route runs through the admission
//! pipeline; only cache misses are forwarded, through the dependency guard.

use std::net::SocketAddr;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    response::Response,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::admission::DependencyResponse;
use crate::http::request::context_from_parts;
use crate::http::response::{error_response, render};
use crate::http::server::AppState;
use crate::resilience::DependencyError;
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};

/// Upstream response bodies above this are treated as a fatal call error.
const MAX_UPSTREAM_BODY_BYTES: usize = 8 * 1024 * 1024;

/// What gets replayed against the upstream on each attempt.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// HTTP client bound to one upstream base URL.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    base: String,
}

impl UpstreamClient {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(base_url)?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            client,
            base: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// One attempt. 5xx and connection failures are transient; anything
    /// that cannot be turned into a request is fatal.
    pub async fn fetch(&self, request: UpstreamRequest) -> Result<DependencyResponse, DependencyError> {
        let uri: Uri = format!("{}{}", self.base, request.path_and_query)
            .parse()
            .map_err(|e| DependencyError::Fatal(format!("invalid upstream uri: {e}")))?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = request.headers;
        }
        let outbound = builder
            .body(Body::from(request.body))
            .map_err(|e| DependencyError::Fatal(format!("invalid upstream request: {e}")))?;

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| DependencyError::Transient(format!("upstream unreachable: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DependencyError::Transient(format!("upstream returned {status}")));
        }

        let header_value = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header_value(header::CONTENT_TYPE);
        let cache_control = header_value(header::CACHE_CONTROL);
        let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_UPSTREAM_BODY_BYTES)
            .await
            .map_err(|e| DependencyError::Fatal(format!("upstream body unreadable: {e}")))?;

        Ok(DependencyResponse {
            status: status.as_u16(),
            content_type,
            cache_control,
            body: body.to_vec(),
        })
    }
}

/// Fallback handler: admission, cache, guarded forward.
pub async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let max_body_bytes = state.config.load().listener.max_body_bytes;
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(error = %err, "Rejecting unreadable or oversized request body");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", None);
        }
    };

    let ctx = context_from_parts(&parts, addr.ip());

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    append_forwarded_for(&mut headers, addr.ip());

    let upstream_request = UpstreamRequest {
        method: parts.method.clone(),
        path_and_query: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers,
        body,
    };

    let upstream = state.upstream.clone();
    let loader = move || {
        let upstream = upstream.clone();
        let request = upstream_request.clone();
        async move { upstream.fetch(request).await }
    };

    let outcome = state.pipeline.run(&ctx, loader).await;
    render(outcome, state.clock.now_millis())
}
