//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is unset
///
/// Audit events go to their own `audit` target and follow the same level.
fn default_filter(level: &str) -> String {
    format!("modelgate={level},audit={level},tower_http=debug")
}

/// Initialize tracing subscriber for structured logging
///
/// Only the first call per process installs a subscriber; later calls are
/// ignored. `RUST_LOG` overrides `default_level` when set.
///
/// # Examples
///
/// ```no_run
/// modelgate::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let directives = default_filter("debug");
        assert!(directives.starts_with("modelgate=debug"));
        assert!(directives.contains("audit=debug"));
        EnvFilter::try_new(directives).expect("default filter should be valid");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init("info");
        init("debug");
        tracing::info!("telemetry initialized");
    }
}
