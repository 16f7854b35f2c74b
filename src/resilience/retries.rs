//! Retry rule for dependency calls.
//!
//! A call is retried at most once, only when all of these hold:
//! - it is an idempotent read
//! - it failed transiently (including a timeout)
//! - the circuit is still closed after recording the failure

use crate::resilience::guard::GuardError;

/// Retries allowed after the first attempt.
pub const MAX_RETRIES: u32 = 1;

/// Whether repeating a call could change state at the dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    IdempotentRead,
    Write,
}

impl CallKind {
    pub fn from_method(method: &axum::http::Method) -> Self {
        if method.is_safe() {
            CallKind::IdempotentRead
        } else {
            CallKind::Write
        }
    }
}

/// `retries_done` counts retries already made for this call.
pub fn should_retry(kind: CallKind, retries_done: u32, error: &GuardError, circuit_closed: bool) -> bool {
    kind == CallKind::IdempotentRead && retries_done < MAX_RETRIES && circuit_closed && error.is_transient()
}
