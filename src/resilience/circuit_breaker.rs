//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: exactly one probe call is in flight or allowed
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_threshold failures within failure_window
//! Open → Half-Open: first attempt after cooldown (becomes the probe)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (cooldown restarts)
//! Half-Open → Half-Open: probe abandoned before reaching the dependency
//! ```
//!
//! # Design Decisions
//! - Transitions are a pure function of (state, event, now); the
//!   `CircuitBreaker` wrapper only adds a lock, logging and metrics
//! - Each admitted call carries a ticket so a late result from a call
//!   admitted while Closed is never mistaken for the probe's result
//! - Results arriving while Open are ignored
//! - State is process-local; every instance protects itself

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::DependencyConfig;
use crate::observability::metrics;

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl From<&DependencyConfig> for BreakerSettings {
    fn from(config: &DependencyConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            failure_window: Duration::from_secs(config.failure_window_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed { failures: u32, window_start_ms: u64 },
    Open { opened_at_ms: u64 },
    HalfOpen { probe_in_flight: bool },
}

impl CircuitState {
    pub fn closed(now_ms: u64) -> Self {
        CircuitState::Closed {
            failures: 0,
            window_start_ms: now_ms,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed { .. } => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half_open",
        }
    }

    /// Gauge encoding: 0=closed, 1=half-open, 2=open.
    pub fn gauge_value(&self) -> u8 {
        match self {
            CircuitState::Closed { .. } => 0,
            CircuitState::HalfOpen { .. } => 1,
            CircuitState::Open { .. } => 2,
        }
    }
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTicket {
    Normal,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEvent {
    /// A caller asks to start a call.
    Attempt,
    Success(CallTicket),
    Failure(CallTicket),
    /// Admitted call never reached the dependency (e.g. no pool slot).
    Abandoned(CallTicket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: CircuitState,
    /// Set only for an admitted `Attempt`.
    pub admitted: Option<CallTicket>,
}

impl Transition {
    fn stay(state: CircuitState) -> Self {
        Self { state, admitted: None }
    }
}

/// Next state of the breaker.
pub fn transition(
    state: CircuitState,
    event: CircuitEvent,
    now_ms: u64,
    settings: &BreakerSettings,
) -> Transition {
    use CircuitEvent::*;
    use CircuitState::*;

    let window_ms = settings.failure_window.as_millis() as u64;
    let cooldown_ms = settings.cooldown.as_millis() as u64;

    match (state, event) {
        (Closed { .. }, Attempt) => Transition {
            state,
            admitted: Some(CallTicket::Normal),
        },
        (Closed { .. }, Success(CallTicket::Normal)) => Transition::stay(CircuitState::closed(now_ms)),
        (Closed { failures, window_start_ms }, Failure(CallTicket::Normal)) => {
            let (failures, window_start_ms) = if now_ms.saturating_sub(window_start_ms) > window_ms {
                (1, now_ms)
            } else {
                (failures + 1, window_start_ms)
            };
            if failures >= settings.failure_threshold {
                Transition::stay(Open { opened_at_ms: now_ms })
            } else {
                Transition::stay(Closed { failures, window_start_ms })
            }
        }

        (Open { opened_at_ms }, Attempt) => {
            if now_ms >= opened_at_ms.saturating_add(cooldown_ms) {
                Transition {
                    state: HalfOpen { probe_in_flight: true },
                    admitted: Some(CallTicket::Probe),
                }
            } else {
                Transition::stay(state)
            }
        }

        (HalfOpen { probe_in_flight: false }, Attempt) => Transition {
            state: HalfOpen { probe_in_flight: true },
            admitted: Some(CallTicket::Probe),
        },
        (HalfOpen { .. }, Success(CallTicket::Probe)) => Transition::stay(CircuitState::closed(now_ms)),
        (HalfOpen { .. }, Failure(CallTicket::Probe)) => Transition::stay(Open { opened_at_ms: now_ms }),
        (HalfOpen { .. }, Abandoned(CallTicket::Probe)) => {
            Transition::stay(HalfOpen { probe_in_flight: false })
        }

        // Probe already in flight, results while Open, stale results from
        // calls admitted under a previous state.
        _ => Transition::stay(state),
    }
}

/// Point-in-time view for the admin API.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub dependency: String,
    pub state: &'static str,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at_ms: Option<u64>,
}

/// Thread-safe breaker for one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    state: Mutex<CircuitState>,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings, clock: SharedClock) -> Self {
        let name = name.into();
        let state = CircuitState::closed(clock.now_millis());
        metrics::record_circuit_state(&name, state.gauge_value());
        Self {
            name,
            settings,
            state: Mutex::new(state),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state(), CircuitState::Closed { .. })
    }

    /// Ask to start a call. `None` means fail fast.
    pub fn try_acquire(&self) -> Option<CallTicket> {
        self.apply(CircuitEvent::Attempt).admitted
    }

    pub fn record(&self, event: CircuitEvent) {
        self.apply(event);
    }

    /// Whole seconds until a probe will be admitted; `None` unless open.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.state() {
            CircuitState::Open { opened_at_ms } => {
                let reopens_at = opened_at_ms.saturating_add(self.settings.cooldown.as_millis() as u64);
                let ms = reopens_at.saturating_sub(self.clock.now_millis());
                Some(Duration::from_secs(ms.div_ceil(1000).max(1)))
            }
            _ => None,
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state();
        let (failure_count, opened_at_ms) = match state {
            CircuitState::Closed { failures, .. } => (failures, None),
            CircuitState::Open { opened_at_ms } => (self.settings.failure_threshold, Some(opened_at_ms)),
            CircuitState::HalfOpen { .. } => (0, None),
        };
        CircuitSnapshot {
            dependency: self.name.clone(),
            state: state.name(),
            failure_count,
            opened_at_ms,
        }
    }

    fn apply(&self, event: CircuitEvent) -> Transition {
        let now = self.clock.now_millis();
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = *guard;
        let next = transition(before, event, now, &self.settings);
        *guard = next.state;
        drop(guard);

        if before.name() != next.state.name() {
            match next.state {
                CircuitState::Open { .. } => tracing::warn!(
                    dependency = %self.name,
                    from = before.name(),
                    cooldown_secs = self.settings.cooldown.as_secs(),
                    "Circuit opened"
                ),
                _ => tracing::info!(
                    dependency = %self.name,
                    from = before.name(),
                    to = next.state.name(),
                    "Circuit state changed"
                ),
            }
            metrics::record_circuit_state(&self.name, next.state.gauge_value());
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::Arc;

    fn settings() -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 3,
            failure_window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
        }
    }

    fn fail_n(mut state: CircuitState, n: u32, now_ms: u64) -> CircuitState {
        for _ in 0..n {
            state = transition(state, CircuitEvent::Failure(CallTicket::Normal), now_ms, &settings()).state;
        }
        state
    }

    #[test]
    fn test_opens_at_threshold_within_window() {
        let state = fail_n(CircuitState::closed(0), 2, 1_000);
        assert_eq!(
            state,
            CircuitState::Closed {
                failures: 2,
                window_start_ms: 0
            }
        );
        let state = fail_n(state, 1, 2_000);
        assert_eq!(state, CircuitState::Open { opened_at_ms: 2_000 });
    }

    #[test]
    fn test_failures_outside_window_restart_count() {
        let state = fail_n(CircuitState::closed(0), 2, 1_000);
        let state = fail_n(state, 1, 12_000);
        assert_eq!(
            state,
            CircuitState::Closed {
                failures: 1,
                window_start_ms: 12_000
            }
        );
    }

    #[test]
    fn test_success_resets_failures() {
        let state = fail_n(CircuitState::closed(0), 2, 1_000);
        let state = transition(state, CircuitEvent::Success(CallTicket::Normal), 1_500, &settings()).state;
        assert_eq!(state, CircuitState::closed(1_500));
    }

    #[test]
    fn test_open_rejects_until_cooldown_then_single_probe() {
        let open = CircuitState::Open { opened_at_ms: 10_000 };

        let t = transition(open, CircuitEvent::Attempt, 14_999, &settings());
        assert_eq!(t.admitted, None);
        assert_eq!(t.state, open);

        let t = transition(open, CircuitEvent::Attempt, 15_000, &settings());
        assert_eq!(t.admitted, Some(CallTicket::Probe));
        assert_eq!(t.state, CircuitState::HalfOpen { probe_in_flight: true });

        let second = transition(t.state, CircuitEvent::Attempt, 15_001, &settings());
        assert_eq!(second.admitted, None);
    }

    #[test]
    fn test_probe_outcomes() {
        let half_open = CircuitState::HalfOpen { probe_in_flight: true };

        let closed = transition(half_open, CircuitEvent::Success(CallTicket::Probe), 20_000, &settings());
        assert_eq!(closed.state, CircuitState::closed(20_000));

        let reopened = transition(half_open, CircuitEvent::Failure(CallTicket::Probe), 20_000, &settings());
        assert_eq!(reopened.state, CircuitState::Open { opened_at_ms: 20_000 });

        let released = transition(half_open, CircuitEvent::Abandoned(CallTicket::Probe), 20_000, &settings());
        assert_eq!(released.state, CircuitState::HalfOpen { probe_in_flight: false });
        let next = transition(released.state, CircuitEvent::Attempt, 20_001, &settings());
        assert_eq!(next.admitted, Some(CallTicket::Probe));
    }

    #[test]
    fn test_results_while_open_are_ignored() {
        let open = CircuitState::Open { opened_at_ms: 1_000 };
        for event in [
            CircuitEvent::Success(CallTicket::Normal),
            CircuitEvent::Failure(CallTicket::Normal),
            CircuitEvent::Abandoned(CallTicket::Normal),
        ] {
            assert_eq!(transition(open, event, 2_000, &settings()).state, open);
        }
    }

    #[test]
    fn test_stale_normal_result_does_not_close_half_open() {
        let half_open = CircuitState::HalfOpen { probe_in_flight: true };
        let t = transition(half_open, CircuitEvent::Success(CallTicket::Normal), 1, &settings());
        assert_eq!(t.state, half_open);
    }

    #[test]
    fn test_breaker_wrapper_follows_clock() {
        let clock = MockClock::new(0);
        let breaker = CircuitBreaker::new("analytics", settings(), Arc::new(clock.clone()));

        for _ in 0..3 {
            let ticket = breaker.try_acquire().unwrap();
            breaker.record(CircuitEvent::Failure(ticket));
        }
        assert!(breaker.try_acquire().is_none());
        assert_eq!(breaker.snapshot().state, "open");
        assert_eq!(breaker.retry_after(), Some(Duration::from_secs(5)));

        clock.advance(Duration::from_secs(5));
        assert_eq!(breaker.try_acquire(), Some(CallTicket::Probe));
        breaker.record(CircuitEvent::Success(CallTicket::Probe));
        assert!(breaker.is_closed());
    }
}
