//! # docchat-telemetry
//!
//! Logging setup shared by the docchat binaries.
//!
//! [`init_telemetry`] installs a global `tracing` subscriber filtered by
//! `RUST_LOG` and writing either compact human-readable lines or one JSON
//! object per event. [`memory`] captures events in memory for tests.
//!
//! ```rust,ignore
//! docchat_telemetry::init_telemetry(&TelemetryConfig::default().with_json(true))?;
//! tracing::info!(document.id = %id, chunk_count, "ingested document");
//! ```

pub mod memory;

pub use memory::{CapturedEvent, InMemoryEventLayer, SharedEventStorage, capture_events};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Output settings for [`init_telemetry`].
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Emit one JSON object per event instead of compact text.
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `docchat_rag=debug`.
    pub default_filter: String,
    /// Include the event target (module path) in text output.
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { json: false, default_filter: "info".to_string(), with_target: false }
    }
}

impl TelemetryConfig {
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok())
    }

    /// `directives` if they parse, else `default_filter`, else `info`.
    fn filter_from(&self, directives: Option<String>) -> EnvFilter {
        directives
            .and_then(|d| EnvFilter::try_new(d).ok())
            .or_else(|| EnvFilter::try_new(&self.default_filter).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// Logs go to stderr so command output on stdout stays clean. Only the first
/// call in a process installs anything; later calls return the error from
/// `try_init` and leave the existing subscriber in place.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.with_target)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected_without_panicking() {
        let config = TelemetryConfig::default().with_default_filter("warn");
        let first = init_telemetry(&config);
        let second = init_telemetry(&config.clone().with_json(true));
        assert!(first.is_ok());
        assert!(second.is_err());
    }

    #[test]
    fn invalid_default_filter_falls_back_to_info() {
        let config = TelemetryConfig::default().with_default_filter("docchat_rag=loud");
        assert_eq!(config.filter_from(None).to_string(), "info");
        assert_eq!(config.filter_from(Some("also=bogus".into())).to_string(), "info");
    }

    #[test]
    fn environment_directives_take_precedence() {
        let config = TelemetryConfig::default().with_default_filter("warn");
        assert_eq!(config.filter_from(None).to_string(), "warn");
        assert_eq!(config.filter_from(Some("debug".into())).to_string(), "debug");
        assert_eq!(config.filter_from(Some("=".into())).to_string(), "warn");
    }
}
