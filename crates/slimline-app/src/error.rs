//! # Design
//!
//! - Centralize startup errors; per-request failures never reach this type.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or validated.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: slimline_config::ConfigError,
    },
    /// Telemetry could not be initialised.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: slimline_telemetry::TelemetryError,
    },
    /// The checksum mapping could not be opened.
    #[error("hash store operation failed")]
    Identity {
        /// Operation identifier.
        operation: &'static str,
        /// Source identity error.
        source: slimline_identity::IdentityError,
    },
    /// The proxy could not be built or stopped serving.
    #[error("proxy operation failed")]
    Proxy {
        /// Operation identifier.
        operation: &'static str,
        /// Source proxy error.
        source: slimline_proxy::ProxyError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Configuration values were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: slimline_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: slimline_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn identity(
        operation: &'static str,
        source: slimline_identity::IdentityError,
    ) -> Self {
        Self::Identity { operation, source }
    }

    pub(crate) const fn proxy(operation: &'static str, source: slimline_proxy::ProxyError) -> Self {
        Self::Proxy { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: &std::path::Path, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: Some(path.to_path_buf()),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "settings.upstream",
            slimline_config::ConfigError::InvalidField {
                field: "upstream",
                reason: "missing",
                value: None,
            },
        );
        assert!(matches!(
            config,
            AppError::Config {
                operation: "settings.upstream",
                ..
            }
        ));
        assert!(config.source().is_some());

        let io = AppError::io(
            "tmpdir.stat",
            std::path::Path::new("/nowhere"),
            io::Error::other("boom"),
        );
        assert_eq!(io.to_string(), "io operation failed");
        assert!(matches!(io, AppError::Io { path: Some(_), .. }));

        let proxy = AppError::proxy(
            "proxy.serve",
            slimline_proxy::ProxyError::MissingFile { field: "assetData" },
        );
        assert!(matches!(proxy, AppError::Proxy { .. }));
    }
}
