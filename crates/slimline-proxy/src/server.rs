//! Router assembly and the listening loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use slimline_telemetry::{build_version, propagate_request_id_layer, set_request_id_layer};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{Span, error, info};

use crate::dispatch::{METRICS_PATH, Route};
use crate::download::handle_download;
use crate::error::{ProxyError, ProxyResult, error_chain};
use crate::rewrite::handle_rewrite;
use crate::state::ProxyState;
use crate::telemetry::{HEADER_REQUEST_ID, route_of, track_route};
use crate::upload::handle_upload;
use crate::websocket::handle_websocket;

/// The proxy's HTTP surface.
pub struct ProxyServer {
    router: Router,
}

impl ProxyServer {
    /// Build the router over `state`.
    #[must_use]
    pub fn new(state: ProxyState) -> Self {
        let state = Arc::new(state);
        let telemetry = state.metrics.clone();

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    version = %build_version(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(|response: &Response, latency: Duration, span: &Span| {
                span.record("status_code", response.status().as_u16());
                let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                span.record("latency_ms", latency_ms);
            });
        let layered = ServiceBuilder::new()
            .layer(set_request_id_layer())
            .layer(propagate_request_id_layer())
            .layer(trace_layer)
            .layer(axum::middleware::from_fn_with_state(telemetry, track_route));

        let router = Router::new()
            .route(METRICS_PATH, get(metrics))
            .fallback(dispatch)
            .layer(DefaultBodyLimit::disable())
            .layer(layered)
            .with_state(state);

        Self { router }
    }

    /// Router for in-process use.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Listen on `addr` until the process stops.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Bind`] when the address is unavailable and
    /// [`ProxyError::Serve`] when the server loop fails.
    pub async fn serve(self, addr: SocketAddr) -> ProxyResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        info!(%addr, "slimline listening");
        axum::serve(listener, self.router.into_make_service())
            .await
            .map_err(|source| ProxyError::Serve { source })
    }
}

async fn dispatch(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let route = route_of(&request);
    let result = match &route {
        Route::Metrics => return render_metrics(&state),
        Route::WebSocket => handle_websocket(&state, request).await,
        Route::Upload => handle_upload(&state, request).await,
        Route::DownloadOriginal { asset_id } => handle_download(&state, asset_id, request).await,
        Route::Rewrite(rewrite) => handle_rewrite(&state, *rewrite, request).await,
        Route::Passthrough => state.upstream.forward(request).await,
    };
    result.unwrap_or_else(|err| {
        error!(
            route = route.label(),
            status = err.status().as_u16(),
            error = %error_chain(&err),
            "request failed"
        );
        err.into_response()
    })
}

async fn metrics(State(state): State<Arc<ProxyState>>) -> Response {
    render_metrics(&state)
}

fn render_metrics(state: &ProxyState) -> Response {
    match state.metrics.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(body))
            .unwrap_or_else(|err| {
                error!(error = %err, "failed to build metrics response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
