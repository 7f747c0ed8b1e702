//! Error types for configuration loading and validation.
//!
//! # Design
//!
//! - Keep error messages constant; carry the offending field and value as context.
//! - Preserve IO and YAML sources so startup failures point at the broken file.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a configuration file failed.
    #[error("configuration file could not be read")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// File involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// The tasks document was not valid YAML for the expected shape.
    #[error("tasks document could not be parsed")]
    Yaml {
        /// File the document was loaded from, when known.
        path: Option<PathBuf>,
        /// Source YAML error.
        source: serde_yaml::Error,
    },
    /// A settings field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// A command template could not be parsed.
    #[error("invalid command template")]
    InvalidTemplate {
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending placeholder or fragment when available.
        value: Option<String>,
    },
    /// A task definition was rejected.
    #[error("invalid task definition")]
    InvalidTask {
        /// Name of the task that failed validation.
        task: String,
        /// Underlying validation failure.
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) const fn invalid_field(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidField {
            field,
            reason,
            value,
        }
    }

    pub(crate) fn task(task: impl Into<String>, source: Self) -> Self {
        Self::InvalidTask {
            task: task.into(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_helpers_build_variants() {
        let io_err = ConfigError::io("read", "tasks.yaml", io::Error::other("io"));
        assert!(matches!(io_err, ConfigError::Io { .. }));
        assert_eq!(io_err.to_string(), "configuration file could not be read");
        assert!(io_err.source().is_some());

        let field = ConfigError::invalid_field("max_image_jobs", "zero", Some("0".to_string()));
        assert!(matches!(
            field,
            ConfigError::InvalidField {
                field: "max_image_jobs",
                reason: "zero",
                ..
            }
        ));
        assert!(field.source().is_none());

        let task = ConfigError::task(
            "caesium",
            ConfigError::InvalidTemplate {
                reason: "unknown_variable",
                value: Some("nope".to_string()),
            },
        );
        assert!(matches!(task, ConfigError::InvalidTask { .. }));
        assert!(task.source().is_some());
    }
}
