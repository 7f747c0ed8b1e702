//! # Design
//!
//! - Structured, constant-message errors for the conversion pipeline.
//! - Converter output is captured on the error so the job log shows why a tool failed.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Errors produced while staging or converting an upload.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// IO failures while interacting with the filesystem.
    #[error("conversion io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The converter process could not be started.
    #[error("converter could not be started")]
    Spawn {
        /// Command line that failed to start.
        command: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The converter exited unsuccessfully.
    #[error("converter exited with failure")]
    CommandFailed {
        /// Command line that was run.
        command: String,
        /// Exit code, absent when killed by a signal.
        status: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },
    /// The converter did not leave exactly one file in its output directory.
    #[error("converter produced an unexpected number of files")]
    UnexpectedOutput {
        /// Output directory that was inspected.
        path: PathBuf,
        /// Number of entries found.
        count: usize,
    },
    /// A path handed to a command template was not valid UTF-8.
    #[error("path is not valid utf-8")]
    NonUtf8Path {
        /// Template variable the path was meant for.
        field: &'static str,
        /// Offending path.
        path: PathBuf,
    },
    /// Input validation failures.
    #[error("conversion invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// The conversion slot pool was shut down.
    #[error("conversion slots are closed")]
    SlotsClosed {
        /// Media class of the pool.
        class: &'static str,
    },
}

impl ConvertError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) const fn invalid_input(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidInput {
            field,
            reason,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn convert_error_helpers_build_variants() {
        let io_err = ConvertError::io("stage.write", "/tmp/upload-1.jpg", io::Error::other("disk"));
        assert!(matches!(
            io_err,
            ConvertError::Io {
                operation: "stage.write",
                ..
            }
        ));
        assert_eq!(io_err.to_string(), "conversion io failure");
        assert!(io_err.source().is_some());

        let input = ConvertError::invalid_input("signature", "mismatch", None);
        assert!(matches!(
            input,
            ConvertError::InvalidInput {
                field: "signature",
                reason: "mismatch",
                value: None,
            }
        ));

        let failed = ConvertError::CommandFailed {
            command: "false".to_string(),
            status: Some(1),
            output: String::new(),
        };
        assert_eq!(failed.to_string(), "converter exited with failure");
        assert!(failed.source().is_none());
    }
}
