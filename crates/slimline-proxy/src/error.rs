//! Proxy errors and their HTTP mapping.
//!
//! # Design
//!
//! - Messages are constant; context lives in fields and is logged once at the edge.
//! - Client-facing bodies are fixed strings. Internal detail never reaches the client.

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use slimline_convert::ConvertError;
use slimline_identity::IdentityError;
use thiserror::Error;

/// Body returned when the same file is uploaded again while its first upload is in flight.
pub const DUPLICATE_JOB_MESSAGE: &str = "slimline is already processing this file. The app is \
     re-uploading it because it's taking too long. No workaround is possible, just kill the \
     app and wait";
/// Body returned when an upload fails inside the proxy.
pub const UPLOAD_FAILED_MESSAGE: &str = "failed to process file, view slimline logs for more info";

/// Result alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors raised while serving requests.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The listener could not be bound.
    #[error("failed to bind listener")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The server loop stopped with an error.
    #[error("server terminated unexpectedly")]
    Serve {
        /// Underlying IO error.
        source: io::Error,
    },
    /// The upstream HTTP client could not be built.
    #[error("upstream client could not be built")]
    Client {
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// An upstream URL could not be formed from the request target.
    #[error("invalid upstream url")]
    InvalidUrl {
        /// Offending target.
        value: String,
    },
    /// An upstream request failed before a response arrived.
    #[error("upstream request failed")]
    Upstream {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// The upload body was not readable multipart form data.
    #[error("upload form could not be read")]
    Multipart {
        /// Underlying multipart error.
        source: MultipartError,
    },
    /// The upload request was not multipart form data.
    #[error("upload form was rejected")]
    MultipartRejected {
        /// Underlying rejection.
        source: MultipartRejection,
    },
    /// The upload form had no file in the asset field.
    #[error("upload form is missing the asset file")]
    MissingFile {
        /// Expected form field.
        field: &'static str,
    },
    /// An identical upload is already being processed.
    #[error("a job for this file is already running")]
    DuplicateJob {
        /// Display form of the job key.
        key: String,
        /// Identifier of the job holding the key.
        existing: u64,
    },
    /// Staging or converting the upload failed.
    #[error("conversion failed")]
    Convert {
        /// Underlying conversion error.
        source: ConvertError,
    },
    /// Hashing or recording the substitution failed.
    #[error("hash bookkeeping failed")]
    Identity {
        /// Underlying identity error.
        source: IdentityError,
    },
    /// Streaming the re-encoded upload failed.
    #[error("upload stream failed")]
    UploadStream {
        /// Error reported by the HTTP client.
        #[source]
        send: reqwest::Error,
        /// Error reported by the form writer, when it failed too.
        pipe: Option<io::Error>,
    },
    /// Filesystem work in the proxy failed.
    #[error("proxy io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl ProxyError {
    pub(crate) const fn upstream(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Upstream { operation, source }
    }

    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// Status code the client receives for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Multipart { .. } | Self::MultipartRejected { .. } | Self::MissingFile { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Upstream { .. } | Self::InvalidUrl { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ConvertError> for ProxyError {
    fn from(source: ConvertError) -> Self {
        Self::Convert { source }
    }
}

impl From<IdentityError> for ProxyError {
    fn from(source: IdentityError) -> Self {
        Self::Identity { source }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::DuplicateJob { .. } => DUPLICATE_JOB_MESSAGE,
            Self::Multipart { .. } | Self::MultipartRejected { .. } | Self::MissingFile { .. } => {
                "invalid upload form"
            }
            Self::Upstream { .. } | Self::InvalidUrl { .. } => "upstream unavailable",
            _ => UPLOAD_FAILED_MESSAGE,
        };
        (self.status(), body).into_response()
    }
}

/// Render an error and its sources as `outer: inner: root`.
#[must_use]
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        rendered.push_str(": ");
        rendered.push_str(&source.to_string());
        current = source.source();
    }
    if let Some(ProxyError::UploadStream {
        pipe: Some(pipe), ..
    }) = err.downcast_ref::<ProxyError>()
    {
        rendered.push_str("; form writer: ");
        rendered.push_str(&pipe.to_string());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn duplicate_job_maps_to_fixed_message() -> anyhow::Result<()> {
        let response = ProxyError::DuplicateJob {
            key: "\"a.jpg\" (1.00 KB)".to_string(),
            existing: 3,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, DUPLICATE_JOB_MESSAGE.as_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn conversion_failures_hide_details() -> anyhow::Result<()> {
        let err = ProxyError::from(ConvertError::CommandFailed {
            command: "secret --flag".to_string(),
            status: Some(1),
            output: "stack trace".to_string(),
        });
        assert_eq!(
            error_chain(&err),
            "conversion failed: converter exited with failure"
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, UPLOAD_FAILED_MESSAGE.as_bytes());
        Ok(())
    }

    #[test]
    fn missing_file_is_a_client_error() {
        let err = ProxyError::MissingFile { field: "assetData" };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
