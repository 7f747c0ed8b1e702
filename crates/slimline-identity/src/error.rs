//! Error types for the hash identity store and rewriter.
//!
//! # Design
//!
//! - Messages stay constant; the file, operation, or offending value travel as fields.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for identity results.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Primary error type for identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Filesystem access failed.
    #[error("hash store io failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// File involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A value was not a well-formed content hash.
    #[error("invalid content hash")]
    InvalidHash {
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value.
        value: String,
    },
    /// A response body could not be decoded or re-encoded.
    #[error("response body codec failed")]
    Codec {
        /// Operation identifier (`decode` or `encode`).
        operation: &'static str,
        /// Content coding involved.
        coding: &'static str,
        /// Source IO error.
        source: io::Error,
    },
    /// A blocking store task was cancelled.
    #[error("hash store task did not complete")]
    Join {
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl IdentityError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_hash(reason: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidHash {
            reason,
            value: value.into(),
        }
    }
}
