//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency (guard.rs):
//!     → circuit_breaker.rs (fail fast while open, single half-open probe)
//!     → pool.rs (bounded slots, wait up to acquire timeout)
//!     → timeouts.rs (every call has a deadline)
//!     → On failure: retries.rs (idempotent reads only) + backoff.rs (jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for idempotent reads, at most once
//! - Circuit breaker state is per process and per dependency

pub mod backoff;
pub mod circuit_breaker;
pub mod guard;
pub mod pool;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitSnapshot, CircuitState};
pub use guard::{DependencyError, DependencyGuard, GuardError, GuardSnapshot};
pub use pool::{ConnectionPool, PoolExhausted, PooledConnection};
pub use retries::CallKind;
