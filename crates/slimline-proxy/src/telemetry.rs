//! Per-request route tagging and request accounting.
//!
//! The request is classified once here; handlers read the [`Route`] back from the
//! request extensions instead of classifying again.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use slimline_telemetry::{Metrics, with_request_id};

use crate::dispatch::{Route, classify};

/// Header carrying the request identifier.
pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

/// Tag the request with its route, scope it to its request id, and count the answer.
pub(crate) async fn track_route(
    State(metrics): State<Metrics>,
    mut request: Request,
    next: Next,
) -> Response {
    let route = classify(request.method(), request.uri().path(), request.headers());
    let label = route.label();
    let request_id = request
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    request.extensions_mut().insert(route);

    with_request_id(request_id, async move {
        let response = next.run(request).await;
        metrics.inc_http_request(label, response.status().as_u16());
        response
    })
    .await
}

/// Route attached by [`track_route`], or a fresh classification when absent.
pub(crate) fn route_of(request: &Request) -> Route {
    request.extensions().get::<Route>().cloned().unwrap_or_else(|| {
        classify(request.method(), request.uri().path(), request.headers())
    })
}
