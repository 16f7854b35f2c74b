//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (identity from trusted X-Auth-* headers)
//!     → revocation.rs (reject revoked tokens / subjects)
//!     → rate_limit.rs (per-identifier sliding-window quotas)
//!     → Pass to cache / dependency stages
//! ```
//!
//! # Design Decisions
//! - Revocation fails closed: an unanswerable check rejects the token
//! - Rate limiting fails open on a local counter, except on endpoints
//!   configured as fail-closed (login, password reset)
//! - No trust in client input beyond the authentication component's headers

pub mod headers;
pub mod rate_limit;
pub mod revocation;
pub mod tier;

pub use headers::TokenClaims;
pub use rate_limit::{RateLimitDecision, RateLimitStatus, RateLimiter};
pub use revocation::TokenRevocationStore;
pub use tier::Tier;
