//! Error types for logging and metrics setup.
//!
//! # Design
//!
//! - Messages stay constant; the collector name and step travel as fields.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Convenience alias for telemetry results.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Primary error type for telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Another global subscriber is already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Source initialisation error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// A collector could not be built or registered.
    #[error("metrics collector setup failed")]
    Collector {
        /// Setup step (`build` or `register`).
        step: &'static str,
        /// Metric name.
        name: &'static str,
        /// Source Prometheus error.
        source: PrometheusError,
    },
    /// The registry could not be rendered as exposition text.
    #[error("metrics exposition failed")]
    Exposition {
        /// Source Prometheus error.
        source: PrometheusError,
    },
    /// The encoder produced bytes that are not UTF-8.
    #[error("metrics exposition was not utf-8")]
    ExpositionUtf8 {
        /// Source conversion error.
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn collector(
        step: &'static str,
        name: &'static str,
        source: PrometheusError,
    ) -> Self {
        Self::Collector { step, name, source }
    }
}
