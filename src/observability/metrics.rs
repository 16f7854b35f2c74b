//! Metrics collection and exposition.
//!
//! # Metrics
//! - `admission_decisions_total` (counter): outcome, reason
//! - `admission_decision_duration_seconds` (histogram): time spent deciding
//! - `rate_limit_degraded_total` (counter): mode (fail_open / fail_closed)
//! - `revocation_store_failures_total` (counter)
//! - `cache_lookups_total` (counter): result (hit / miss / error)
//! - `circuit_state` (gauge): dependency; 0=closed, 1=half-open, 2=open
//! - `dependency_calls_total` (counter): dependency, result
//! - `throttle_rejections_total` (counter)
//!
//! # Design Decisions
//! - Label values are `&'static str` where possible to avoid allocations
//! - Exporter is optional; without it the macros record nothing

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub mod names {
    pub const DECISIONS_TOTAL: &str = "admission_decisions_total";
    pub const DECISION_DURATION_SECONDS: &str = "admission_decision_duration_seconds";
    pub const RATE_LIMIT_DEGRADED_TOTAL: &str = "rate_limit_degraded_total";
    pub const REVOCATION_STORE_FAILURES_TOTAL: &str = "revocation_store_failures_total";
    pub const CACHE_LOOKUPS_TOTAL: &str = "cache_lookups_total";
    pub const CIRCUIT_STATE: &str = "circuit_state";
    pub const DEPENDENCY_CALLS_TOTAL: &str = "dependency_calls_total";
    pub const THROTTLE_REJECTIONS_TOTAL: &str = "throttle_rejections_total";
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_decision(outcome: &'static str, reason: &'static str, started: Instant) {
    counter!(names::DECISIONS_TOTAL, "outcome" => outcome, "reason" => reason).increment(1);
    histogram!(names::DECISION_DURATION_SECONDS, "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_rate_limit_degraded(mode: &'static str) {
    counter!(names::RATE_LIMIT_DEGRADED_TOTAL, "mode" => mode).increment(1);
}

pub fn record_revocation_store_failure() {
    counter!(names::REVOCATION_STORE_FAILURES_TOTAL).increment(1);
}

pub fn record_cache_lookup(result: &'static str) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}

/// `state`: 0=closed, 1=half-open, 2=open.
pub fn record_circuit_state(dependency: &str, state: u8) {
    gauge!(names::CIRCUIT_STATE, "dependency" => dependency.to_string()).set(f64::from(state));
}

pub fn record_dependency_call(dependency: &str, result: &'static str) {
    counter!(
        names::DEPENDENCY_CALLS_TOTAL,
        "dependency" => dependency.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_throttle_rejection() {
    counter!(names::THROTTLE_REJECTIONS_TOTAL).increment(1);
}
