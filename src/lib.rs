//! Admission and resilience layer for an HTTP API.
//!
//! Sits in front of a business service and decides, per request, whether it
//! may proceed (token revocation, per-tier quotas), whether it can be served
//! from cache, and whether the upstream is healthy and has capacity to take it.

pub mod admin;
pub mod admission;
pub mod cache;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod store;

pub use admission::{AdmissionPipeline, Outcome, OutcomeKind, RequestContext};
pub use config::AdmissionConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
