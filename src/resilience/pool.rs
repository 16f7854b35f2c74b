//! Bounded connection pool.
//!
//! Caps how many calls can be in flight against one dependency. A slot is
//! held by a `PooledConnection` and returned when it is dropped, so a
//! panicking or cancelled call cannot leak capacity.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("connection pool exhausted after waiting {waited:?}")]
pub struct PoolExhausted {
    pub waited: Duration,
}

#[derive(Debug, Clone)]
pub struct ConnectionPool {
    slots: Arc<Semaphore>,
    size: usize,
}

impl ConnectionPool {
    pub fn new(size: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait up to `timeout` for a free slot.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection, PoolExhausted> {
        let exhausted = PoolExhausted { waited: timeout };

        let permit = if timeout.is_zero() {
            self.slots.clone().try_acquire_owned().map_err(|_| exhausted)?
        } else {
            match tokio::time::timeout(timeout, self.slots.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                // Closed semaphore or deadline: either way no slot.
                Ok(Err(_)) | Err(_) => return Err(exhausted),
            }
        };

        tracing::trace!(available = self.slots.available_permits(), "Pool slot acquired");
        Ok(PooledConnection { _permit: permit })
    }
}

/// One occupied pool slot.
#[derive(Debug)]
pub struct PooledConnection {
    _permit: OwnedSemaphorePermit,
}
