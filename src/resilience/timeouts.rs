//! Deadline enforcement for dependency calls.

use std::future::Future;
use std::time::Duration;

use crate::resilience::guard::{DependencyError, GuardError};

/// Run `call` with a deadline. An elapsed deadline becomes `GuardError::Timeout`.
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, GuardError>
where
    F: Future<Output = Result<T, DependencyError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(GuardError::Dependency(err)),
        Err(_) => Err(GuardError::Timeout(limit)),
    }
}
