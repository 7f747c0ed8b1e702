//! Request classification.
//!
//! Paths are matched exactly as the photo client sends them; anything not listed here is
//! plain passthrough.

use axum::http::header::{self, HeaderMap};
use axum::http::Method;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

/// Upload endpoint.
pub const UPLOAD_PATH: &str = "/api/assets";
/// Metrics endpoint served by the proxy itself.
pub const METRICS_PATH: &str = "/_slimline/metrics";

static ASSET_VIEW: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(r"^/api/assets/[a-z0-9]{8}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{12}$")
});
static ALBUM_VIEW: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(r"^/api/albums/[a-z0-9]{8}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{12}$")
});
static ORIGINAL_DOWNLOAD: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(
        r"^/api/assets/([a-z0-9]{8}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{12})/original$",
    )
});

/// Read endpoints whose responses may echo substituted hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteRoute {
    /// `GET /api/assets/{id}`.
    Asset,
    /// `GET /api/timeline/bucket*`.
    TimelineBucket,
    /// `GET /api/albums/{id}`.
    Album,
    /// `POST /api/sync/{stream,full-sync,delta-sync}`.
    Sync,
}

impl RewriteRoute {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::TimelineBucket => "timeline",
            Self::Album => "album",
            Self::Sync => "sync",
        }
    }
}

/// How a request is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Proxy-local metrics.
    Metrics,
    /// Websocket upgrade, spliced through.
    WebSocket,
    /// Multipart asset upload.
    Upload,
    /// Original file download, converted to JPEG when enabled.
    DownloadOriginal {
        /// Asset identifier from the path.
        asset_id: String,
    },
    /// Response is scanned for substituted hashes.
    Rewrite(RewriteRoute),
    /// Everything else.
    Passthrough,
}

impl Route {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::WebSocket => "websocket",
            Self::Upload => "upload",
            Self::DownloadOriginal { .. } => "download",
            Self::Rewrite(route) => route.as_str(),
            Self::Passthrough => "passthrough",
        }
    }
}

/// Classify a request by method, path, and headers.
#[must_use]
pub fn classify(method: &Method, path: &str, headers: &HeaderMap) -> Route {
    if is_websocket(headers) {
        return Route::WebSocket;
    }
    if *method == Method::GET {
        if path == METRICS_PATH {
            return Route::Metrics;
        }
        if let Some(asset_id) = original_download_id(path) {
            return Route::DownloadOriginal { asset_id };
        }
        if is_match(&ASSET_VIEW, path) {
            return Route::Rewrite(RewriteRoute::Asset);
        }
        if path.starts_with("/api/timeline/bucket") {
            return Route::Rewrite(RewriteRoute::TimelineBucket);
        }
        if is_match(&ALBUM_VIEW, path) {
            return Route::Rewrite(RewriteRoute::Album);
        }
    }
    if *method == Method::POST {
        if path == UPLOAD_PATH && is_multipart(headers) {
            return Route::Upload;
        }
        if matches!(
            path,
            "/api/sync/stream" | "/api/sync/full-sync" | "/api/sync/delta-sync"
        ) {
            return Route::Rewrite(RewriteRoute::Sync);
        }
    }
    Route::Passthrough
}

fn is_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|err| error!(pattern, error = %err, "route pattern failed to compile"))
        .ok()
}

fn is_match(pattern: &Lazy<Option<Regex>>, path: &str) -> bool {
    pattern.as_ref().is_some_and(|regex| regex.is_match(path))
}

fn original_download_id(path: &str) -> Option<String> {
    ORIGINAL_DOWNLOAD
        .as_ref()?
        .captures(path)?
        .get(1)
        .map(|id| id.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const ID: &str = "4b0c5f8e-1d2a-4c3b-9e8f-0a1b2c3d4e5f";

    fn classify_get(path: &str) -> Route {
        classify(&Method::GET, path, &HeaderMap::new())
    }

    #[test]
    fn asset_paths_follow_the_uuid_shape() {
        assert!(is_match(&ASSET_VIEW, &format!("/api/assets/{ID}")));
        assert!(!is_match(
            &ASSET_VIEW,
            &format!("/api/assets/{}", ID.to_uppercase())
        ));
        assert!(!is_match(&ASSET_VIEW, "/api/assets/4b0c5f8e-1d2a-4c3b-9e8f"));
        assert!(!is_match(
            &ASSET_VIEW,
            &format!("/api/assets/{ID}-00")
        ));
        assert!(!is_match(&ALBUM_VIEW, "/api/albums/statistics"));
        assert_eq!(
            original_download_id(&format!("/api/assets/{ID}/original")),
            Some(ID.to_string())
        );
        assert_eq!(
            original_download_id(&format!("/api/assets/{ID}/original/x")),
            None
        );
    }

    #[test]
    fn read_paths_are_rewritten() {
        assert_eq!(
            classify_get(&format!("/api/assets/{ID}")),
            Route::Rewrite(RewriteRoute::Asset)
        );
        assert_eq!(
            classify_get(&format!("/api/albums/{ID}")),
            Route::Rewrite(RewriteRoute::Album)
        );
        assert_eq!(
            classify_get("/api/timeline/buckets"),
            Route::Rewrite(RewriteRoute::TimelineBucket)
        );
        for path in ["/api/sync/stream", "/api/sync/full-sync", "/api/sync/delta-sync"] {
            assert_eq!(
                classify(&Method::POST, path, &HeaderMap::new()),
                Route::Rewrite(RewriteRoute::Sync)
            );
        }
        assert_eq!(classify_get("/api/sync/stream"), Route::Passthrough);
        assert_eq!(classify_get("/api/assets/statistics"), Route::Passthrough);
        assert_eq!(classify_get(&format!("/api/albums/{ID}/users")), Route::Passthrough);
    }

    #[test]
    fn download_and_upload_are_detected() {
        assert_eq!(
            classify_get(&format!("/api/assets/{ID}/original")),
            Route::DownloadOriginal {
                asset_id: ID.to_string()
            }
        );

        let mut multipart = HeaderMap::new();
        multipart.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=abc"),
        );
        assert_eq!(classify(&Method::POST, UPLOAD_PATH, &multipart), Route::Upload);
        assert_eq!(
            classify(&Method::POST, UPLOAD_PATH, &HeaderMap::new()),
            Route::Passthrough
        );
        assert_eq!(classify(&Method::PUT, UPLOAD_PATH, &multipart), Route::Passthrough);
    }

    #[test]
    fn websocket_upgrade_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert_eq!(
            classify(&Method::GET, "/api/socket.io/", &headers),
            Route::WebSocket
        );
        assert_eq!(Route::WebSocket.label(), "websocket");
        assert_eq!(classify_get(METRICS_PATH), Route::Metrics);
    }
}
