//! Application and request span context.
//!
//! # Design
//! - The application span is entered once at startup and never left.
//! - Request identifiers live in task-local storage so spawned work inside a request
//!   (converter runs, upload streaming) can tag its logs without threading the id through.

use std::future::Future;
use std::sync::Arc;

use tracing::{Span, span::Entered};

use crate::init::build_version;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the application-level tracing span for the lifetime of the guard.
    #[must_use]
    pub fn new(upstream: impl Into<String>) -> Self {
        let upstream = upstream.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "app",
            upstream = %upstream,
            version = %build_version()
        )));
        let guard = span.enter();
        Self { _guard: guard }
    }
}

/// Retrieve the request identifier of the enclosing request, if one is set.
#[must_use]
pub fn current_request_id() -> Option<String> {
    ACTIVE_REQUEST_ID
        .try_with(|id| id.as_ref().to_string())
        .ok()
}

/// Run `fut` with `request_id` available through [`current_request_id`].
pub async fn with_request_id<Fut, T>(request_id: impl Into<String>, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    ACTIVE_REQUEST_ID
        .scope(Arc::from(request_id.into()), fut)
        .await
}

tokio::task_local! {
    static ACTIVE_REQUEST_ID: Arc<str>;
}
