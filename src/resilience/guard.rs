//! Dependency guard: circuit breaker + bounded pool + deadline + retry.
//!
//! ```text
//! call(kind, f)
//!   → breaker.try_acquire()      CircuitOpen if refused
//!   → pool.acquire(timeout)      PoolExhausted (probe slot released)
//!   → with_deadline(f())         Timeout | Dependency(err) | Ok
//!   → breaker.record(outcome)
//!   → maybe one jittered retry   idempotent reads, transient errors, circuit closed
//! ```
//!
//! An admitted ticket is always settled: a call that panics counts as a
//! failure and one dropped mid-flight as abandoned, so a half-open circuit
//! never waits on a result that cannot arrive.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::DependencyConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::{BreakerSettings, CallTicket, CircuitBreaker, CircuitEvent, CircuitSnapshot};
use crate::resilience::pool::ConnectionPool;
use crate::resilience::retries::{should_retry, CallKind};
use crate::resilience::timeouts::with_deadline;

/// Failure reported by the wrapped call itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
    /// Worth retrying: connection reset, 5xx, overload.
    #[error("transient dependency failure: {0}")]
    Transient(String),

    /// Retrying cannot help: the request itself is unusable.
    #[error("fatal dependency failure: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("circuit open")]
    CircuitOpen,

    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("dependency call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

impl GuardError {
    /// Counts against the circuit and qualifies for a retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GuardError::Timeout(_) | GuardError::Dependency(DependencyError::Transient(_))
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GuardSettings {
    pub acquire_timeout: Duration,
    pub call_timeout: Duration,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl From<&DependencyConfig> for GuardSettings {
    fn from(config: &DependencyConfig) -> Self {
        Self {
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            retry_base_delay_ms: config.retry_base_delay_ms,
            retry_max_delay_ms: config.retry_max_delay_ms,
        }
    }
}

/// Admin view of one guarded dependency.
#[derive(Debug, Clone, Serialize)]
pub struct GuardSnapshot {
    #[serde(flatten)]
    pub circuit: CircuitSnapshot,
    pub pool_size: usize,
    pub pool_available: usize,
}

/// Protects calls to one named dependency.
#[derive(Debug)]
pub struct DependencyGuard {
    breaker: CircuitBreaker,
    pool: ConnectionPool,
    settings: GuardSettings,
}

impl DependencyGuard {
    pub fn new(name: impl Into<String>, config: &DependencyConfig, clock: SharedClock) -> Self {
        Self {
            breaker: CircuitBreaker::new(name, BreakerSettings::from(config), clock),
            pool: ConnectionPool::new(config.pool_size),
            settings: GuardSettings::from(config),
        }
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            circuit: self.breaker.snapshot(),
            pool_size: self.pool.size(),
            pool_available: self.pool.available(),
        }
    }

    /// Run `f` under the guard. `f` is invoked again for a retry.
    pub async fn call<T, F, Fut>(&self, kind: CallKind, f: F) -> Result<T, GuardError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DependencyError>>,
    {
        let mut retries = 0;
        loop {
            match self.attempt(&f).await {
                Ok(value) => return Ok(value),
                Err(err) if should_retry(kind, retries, &err, self.breaker.is_closed()) => {
                    retries += 1;
                    let delay = calculate_backoff(
                        retries,
                        self.settings.retry_base_delay_ms,
                        self.settings.retry_max_delay_ms,
                    );
                    tracing::debug!(
                        dependency = %self.name(),
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying dependency call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, f: &F) -> Result<T, GuardError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DependencyError>>,
    {
        let Some(ticket) = self.breaker.try_acquire() else {
            metrics::record_dependency_call(self.name(), "circuit_open");
            return Err(GuardError::CircuitOpen);
        };
        let pending = PendingTicket::new(&self.breaker, ticket);

        let slot = match self.pool.acquire(self.settings.acquire_timeout).await {
            Ok(slot) => slot,
            Err(exhausted) => {
                pending.settle(CircuitEvent::Abandoned(ticket));
                tracing::warn!(
                    dependency = %self.name(),
                    waited_ms = exhausted.waited.as_millis() as u64,
                    "Connection pool exhausted"
                );
                metrics::record_dependency_call(self.name(), "pool_exhausted");
                return Err(GuardError::PoolExhausted);
            }
        };

        let result = with_deadline(self.settings.call_timeout, f()).await;
        drop(slot);

        pending.settle(outcome_event(ticket, &result));
        let label = match &result {
            Ok(_) => "success",
            Err(GuardError::Timeout(_)) => "timeout",
            Err(err) if err.is_transient() => "transient",
            Err(_) => "fatal",
        };
        metrics::record_dependency_call(self.name(), label);
        if let Err(err) = &result {
            tracing::debug!(dependency = %self.name(), probe = ticket == CallTicket::Probe, error = %err, "Dependency call failed");
        }
        result
    }
}

/// Breaker ticket that must be settled exactly once.
struct PendingTicket<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Option<CallTicket>,
}

impl<'a> PendingTicket<'a> {
    fn new(breaker: &'a CircuitBreaker, ticket: CallTicket) -> Self {
        Self {
            breaker,
            ticket: Some(ticket),
        }
    }

    fn settle(mut self, event: CircuitEvent) {
        self.ticket = None;
        self.breaker.record(event);
    }
}

impl Drop for PendingTicket<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        let event = if std::thread::panicking() {
            CircuitEvent::Failure(ticket)
        } else {
            CircuitEvent::Abandoned(ticket)
        };
        tracing::warn!(
            dependency = %self.breaker.name(),
            ticket = ?ticket,
            event = ?event,
            "Dependency call ended without a result"
        );
        self.breaker.record(event);
    }
}

/// Fatal errors say nothing about the dependency's health.
fn outcome_event<T>(ticket: CallTicket, result: &Result<T, GuardError>) -> CircuitEvent {
    match result {
        Ok(_) => CircuitEvent::Success(ticket),
        Err(err) if err.is_transient() => CircuitEvent::Failure(ticket),
        Err(_) => CircuitEvent::Abandoned(ticket),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> DependencyConfig {
        DependencyConfig {
            failure_threshold: 3,
            failure_window_secs: 30,
            cooldown_secs: 10,
            pool_size: 2,
            acquire_timeout_ms: 20,
            call_timeout_ms: 100,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
        }
    }

    fn guard() -> (DependencyGuard, MockClock) {
        let clock = MockClock::new(1_000_000);
        (DependencyGuard::new("analytics", &config(), Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let (guard, _clock) = guard();
        let value = guard.call(CallKind::IdempotentRead, || async { Ok::<_, DependencyError>(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_transient_read_retried_once() {
        let (guard, _clock) = guard();
        let calls = AtomicUsize::new(0);
        let result = guard
            .call(CallKind::IdempotentRead, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(DependencyError::Transient("reset".into()))
                    } else {
                        Ok("rows")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("rows"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_writes_and_fatal_errors_not_retried() {
        let (guard, _clock) = guard();
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = guard
            .call(CallKind::Write, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DependencyError::Transient("reset".into())) }
            })
            .await;
        assert!(matches!(result, Err(GuardError::Dependency(DependencyError::Transient(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result: Result<(), _> = guard
            .call(CallKind::IdempotentRead, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DependencyError::Fatal("bad".into())) }
            })
            .await;
        assert!(matches!(result, Err(GuardError::Dependency(DependencyError::Fatal(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Fatal errors leave the breaker untouched.
        assert_eq!(guard.snapshot().circuit.failure_count, 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_fails_fast() {
        let (guard, clock) = guard();
        let calls = AtomicUsize::new(0);
        let failing = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(DependencyError::Transient("503".into())) }
        };

        for _ in 0..3 {
            let _ = guard.call(CallKind::Write, failing).await;
        }
        assert_eq!(guard.snapshot().circuit.state, "open");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Fails fast without touching the dependency.
        assert_eq!(guard.call(CallKind::Write, failing).await, Err(GuardError::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // After cooldown one probe goes through and closes the circuit.
        clock.advance(Duration::from_secs(10));
        let probe = guard.call(CallKind::Write, || async { Ok::<_, DependencyError>(()) }).await;
        assert_eq!(probe, Ok(()));
        assert_eq!(guard.snapshot().circuit.state, "closed");
    }

    #[tokio::test]
    async fn test_retry_skipped_when_failure_opens_circuit() {
        let (guard, _clock) = guard();
        for _ in 0..2 {
            let _ = guard
                .call(CallKind::Write, || async { Err::<(), _>(DependencyError::Transient("x".into())) })
                .await;
        }
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = guard
            .call(CallKind::IdempotentRead, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DependencyError::Transient("x".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(guard.snapshot().circuit.state, "open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let (guard, _clock) = guard();
        let result: Result<(), _> = guard
            .call(CallKind::Write, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(GuardError::Timeout(Duration::from_millis(100))));
        assert_eq!(guard.snapshot().circuit.failure_count, 1);
    }

    async fn trip(guard: &DependencyGuard) {
        for _ in 0..3 {
            let _ = guard
                .call(CallKind::Write, || async { Err::<(), _>(DependencyError::Transient("x".into())) })
                .await;
        }
        assert_eq!(guard.snapshot().circuit.state, "open");
    }

    #[tokio::test]
    async fn test_panicking_call_reopens_half_open_circuit() {
        let (guard, clock) = guard();
        let guard = Arc::new(guard);
        trip(&guard).await;
        clock.advance(Duration::from_secs(10));

        let panicking = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .call(CallKind::Write, || async {
                        if true {
                            panic!("upstream client bug");
                        }
                        Ok::<(), DependencyError>(())
                    })
                    .await
            })
        };
        assert!(panicking.await.unwrap_err().is_panic());

        // The half-open call was settled as a failure, not left in flight.
        assert_eq!(guard.snapshot().circuit.state, "open");
        assert_eq!(guard.snapshot().pool_available, 2);

        clock.advance(Duration::from_secs(10));
        let recovered = guard.call(CallKind::Write, || async { Ok::<_, DependencyError>(()) }).await;
        assert_eq!(recovered, Ok(()));
        assert_eq!(guard.snapshot().circuit.state, "closed");
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_half_open_slot() {
        let (guard, clock) = guard();
        let guard = Arc::new(guard);
        trip(&guard).await;
        clock.advance(Duration::from_secs(10));

        let stalled = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .call(CallKind::Write, || async {
                        std::future::pending::<()>().await;
                        Ok::<(), DependencyError>(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(guard.breaker().try_acquire(), None);
        stalled.abort();
        let _ = stalled.await;

        assert_eq!(guard.breaker().try_acquire(), Some(CallTicket::Probe));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_exhaustion_rejects_and_releases_probe() {
        let (guard, clock) = guard();
        let guard = Arc::new(guard);

        // Trip the breaker, then let the cooldown pass.
        for _ in 0..3 {
            let _ = guard
                .call(CallKind::Write, || async { Err::<(), _>(DependencyError::Transient("x".into())) })
                .await;
        }
        clock.advance(Duration::from_secs(10));

        // Occupy both pool slots with the breaker bypassed.
        let _a = guard.pool.acquire(Duration::ZERO).await.unwrap();
        let _b = guard.pool.acquire(Duration::ZERO).await.unwrap();

        let result = guard.call(CallKind::Write, || async { Ok::<_, DependencyError>(()) }).await;
        assert_eq!(result, Err(GuardError::PoolExhausted));
        // The abandoned probe freed the half-open slot for the next caller.
        assert_eq!(guard.breaker().try_acquire(), Some(CallTicket::Probe));
    }
}
