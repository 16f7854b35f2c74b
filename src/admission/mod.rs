//! Admission pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → revocation check          Rejected(Revoked)
//!     → rate limit                Rejected(RateLimited)
//!     → cache lookup              CacheHit / NotModified → Responded
//!     → concurrency throttle      Rejected(Overloaded)
//!     → guarded dependency call   Rejected(CircuitOpen | PoolExhausted) / Failed
//!     → cache store → Responded
//! ```
//!
//! # Design Decisions
//! - A failing stage jumps straight to its terminal outcome; later stages
//!   never run
//! - Writes skip the cache in both directions
//! - Every request ends with one decision log line and one metric sample

pub mod context;
pub mod outcome;
pub mod pipeline;
pub mod throttle;

pub use context::RequestContext;
pub use outcome::{DependencyResponse, FailureReason, Outcome, OutcomeKind, RejectReason, Stage};
pub use pipeline::AdmissionPipeline;
pub use throttle::{ConcurrencyThrottle, Permit, ThrottleRejected};
