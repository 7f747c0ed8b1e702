//! Fixtures shared by the proxy tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use slimline_config::{DownloadConversion, TaskRegistry};
use slimline_convert::ConversionLimits;
use slimline_identity::HashStore;
use slimline_telemetry::Metrics;
use tokio::net::TcpListener;
use tower::ServiceExt;
use url::Url;

use crate::server::ProxyServer;
use crate::state::ProxyState;
use crate::upstream::Upstream;

const BOUNDARY: &str = "XBOUNDARY";

/// A request the fake upstream received.
pub(crate) struct Captured {
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

/// Minimal upstream that records every request and answers `201 Created`.
pub(crate) struct CaptureUpstream {
    addr: SocketAddr,
    captured: Arc<Mutex<Vec<Captured>>>,
}

impl CaptureUpstream {
    pub(crate) async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let app = Router::new().fallback(move |request: Request| {
            let sink = Arc::clone(&sink);
            async move { record(&sink, request).await }
        });
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });
        Ok(Self { addr, captured })
    }

    pub(crate) fn url(&self) -> anyhow::Result<Url> {
        Ok(Url::parse(&format!("http://{}", self.addr))?)
    }

    pub(crate) fn count(&self) -> usize {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn single(&self) -> anyhow::Result<Captured> {
        let mut captured = self
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        anyhow::ensure!(captured.len() == 1, "expected one upstream request, got {}", captured.len());
        captured
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no upstream request"))
    }
}

async fn record(sink: &Mutex<Vec<Captured>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
    sink.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Captured {
            headers: parts.headers,
            body,
        });
    (
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, "application/json")],
        "{\"id\":\"4b0c5f8e-1d2a-4c3b-9e8f-0a1b2c3d4e5f\",\"status\":\"created\"}",
    )
        .into_response()
}

/// Proxy state over `upstream`, staging and persisting under `dir`.
pub(crate) fn state_for(upstream: Url, tasks: &str, dir: &Path) -> anyhow::Result<ProxyState> {
    let registry = TaskRegistry::parse(tasks, dir)?;
    let hashes = HashStore::open(dir.join("checksums.csv"))?;
    let limits = ConversionLimits::new(2, 1, Metrics::new()?);
    Ok(ProxyState::new(
        Upstream::new(upstream)?,
        registry,
        hashes,
        limits,
        DownloadConversion::default(),
    )
    .with_staging_dir(dir))
}

pub(crate) fn proxy_router(state: ProxyState) -> Router {
    ProxyServer::new(state).router()
}

pub(crate) async fn send(router: Router, request: Request) -> anyhow::Result<Response> {
    Ok(router.oneshot(request).await?)
}

/// Multipart body shaped like the photo client's upload.
pub(crate) fn asset_form(filename: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"deviceAssetId\"\r\n\r\nweb-photo\r\n\
         --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"filename\"\r\n\r\n{filename}\r\n\
         --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"assetData\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub(crate) fn upload_request(body: &[u8]) -> anyhow::Result<Request> {
    Ok(axum::http::Request::builder()
        .method(Method::POST)
        .uri("/api/assets")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("x-api-key", "secret")
        .body(Body::from(body.to_vec()))?)
}
