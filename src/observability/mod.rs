//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Admission pipeline, rate limiter, revocation store, cache, dependency guard:
//!     → logging.rs (structured log events, `admission::decision` target)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every decision log line
//! - Metrics are cheap (atomic increments behind the `metrics` facade)
//! - Without an installed recorder every `record_*` call is a no-op, so
//!   tests never need to set one up

pub mod logging;
pub mod metrics;
