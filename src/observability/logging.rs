//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level when set. The filter sits
//! behind a reload layer so a config reload can change the level without
//! a restart.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Target used for the one-line-per-request admission decision log.
pub const DECISION_TARGET: &str = "admission::decision";

/// Install the global subscriber. Calling it twice is harmless.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let (filter_layer, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer())
        .try_init();
}

/// Swap the active level after a config reload.
pub fn apply_log_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = FILTER_HANDLE.get() {
        if let Err(e) = handle.modify(|filter| *filter = default_filter(level)) {
            tracing::warn!(error = %e, "Failed to apply new log level");
        }
    }
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("admission_gate={level},{DECISION_TARGET}={level},tower_http={level}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_mentions_crate() {
        let filter = default_filter("debug").to_string();
        assert!(filter.contains("admission_gate=debug"));
        assert!(filter.contains("admission::decision=debug"));
    }
}
