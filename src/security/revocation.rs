//! Token revocation.
//!
//! Two kinds of record live in the shared store:
//! - `rev:tok:{token_id}`: one credential revoked, kept until the token's
//!   own expiry
//! - `rev:sub:{subject_id}`: every token issued strictly before the stored
//!   cutover is revoked, kept until `cutover + max_token_lifetime`
//!
//! The subject cutover catches tokens whose ids were never recorded (e.g.
//! everything issued before a password change).
//!
//! # Design Decisions
//! - Fail closed: if the store cannot answer, the token is treated as revoked
//! - A second cutover for the same subject keeps the later instant

use std::time::Duration;

use crate::clock::SharedClock;
use crate::observability::metrics;
use crate::store::{decode_counter, encode_counter, SharedStore, StoreError, StoreResult};

const CUTOVER_CAS_ATTEMPTS: usize = 8;

/// Shared-store backed registry of revoked credentials.
pub struct TokenRevocationStore {
    store: SharedStore,
    clock: SharedClock,
    max_token_lifetime: Duration,
}

fn token_key(token_id: &str) -> String {
    format!("rev:tok:{token_id}")
}

fn subject_key(subject_id: &str) -> String {
    format!("rev:sub:{subject_id}")
}

impl TokenRevocationStore {
    pub fn new(store: SharedStore, clock: SharedClock, max_token_lifetime: Duration) -> Self {
        Self {
            store,
            clock,
            max_token_lifetime,
        }
    }

    /// Revoke one token. `expiry_ms` is the token's natural expiry.
    pub async fn revoke_token(&self, token_id: &str, expiry_ms: u64) -> StoreResult<()> {
        let now = self.clock.now_millis();
        if expiry_ms <= now {
            tracing::debug!(token_id = %token_id, "Token already expired; nothing to revoke");
            return Ok(());
        }

        let ttl = Duration::from_millis(expiry_ms - now);
        self.store.set(&token_key(token_id), b"1".to_vec(), ttl).await?;
        tracing::info!(token_id = %token_id, ttl_secs = ttl.as_secs(), "Token revoked");
        Ok(())
    }

    /// Revoke every token of `subject_id` issued before `cutover_ms`.
    pub async fn revoke_all_for_subject(&self, subject_id: &str, cutover_ms: u64) -> StoreResult<()> {
        let now = self.clock.now_millis();
        let horizon = cutover_ms.saturating_add(self.max_token_lifetime.as_millis() as u64);
        if horizon <= now {
            tracing::debug!(subject_id = %subject_id, "Cutover older than any live token; nothing to revoke");
            return Ok(());
        }
        let ttl = Duration::from_millis(horizon - now);
        let key = subject_key(subject_id);

        for _ in 0..CUTOVER_CAS_ATTEMPTS {
            let current = self.store.get(&key).await?;
            if let Some(bytes) = &current {
                if decode_counter(&key, bytes)? >= cutover_ms {
                    return Ok(());
                }
            }
            if self
                .store
                .compare_and_swap(&key, current.as_deref(), encode_counter(cutover_ms), ttl)
                .await?
            {
                tracing::info!(subject_id = %subject_id, cutover_ms, "Subject tokens revoked");
                return Ok(());
            }
        }
        Err(StoreError::Contention(key))
    }

    /// Current cutover for a subject, if any.
    pub async fn cutover_for(&self, subject_id: &str) -> StoreResult<Option<u64>> {
        let key = subject_key(subject_id);
        match self.store.get(&key).await? {
            Some(bytes) => decode_counter(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Whether the token must be rejected. Store failures answer `true`.
    pub async fn is_revoked(&self, token_id: &str, subject_id: &str, issued_at_ms: u64) -> bool {
        match self.lookup(token_id, subject_id, issued_at_ms).await {
            Ok(revoked) => revoked,
            Err(err) => {
                tracing::warn!(
                    token_id = %token_id,
                    subject_id = %subject_id,
                    error = %err,
                    "Revocation store unreachable; rejecting token (fail-closed)"
                );
                metrics::record_revocation_store_failure();
                true
            }
        }
    }

    async fn lookup(&self, token_id: &str, subject_id: &str, issued_at_ms: u64) -> StoreResult<bool> {
        let tok_key = token_key(token_id);
        let (token, cutover) = tokio::join!(self.store.get(&tok_key), self.cutover_for(subject_id));

        if token?.is_some() {
            return Ok(true);
        }
        Ok(cutover?.is_some_and(|cutover| issued_at_ms < cutover))
    }
}
