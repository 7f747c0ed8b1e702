//! Swapping original hashes for their replacements in read responses.
//!
//! Bodies are buffered only when there is something to rewrite: a successful response
//! in a coding the proxy can decode, with a non-empty store. Any failure falls back to
//! the untouched upstream body.

use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::http::header::{self, HeaderMap};
use axum::response::Response;
use slimline_identity::{ContentCoding, rewrite_body};
use tracing::{debug, warn};

use crate::dispatch::RewriteRoute;
use crate::error::{ProxyError, ProxyResult};
use crate::state::ProxyState;
use crate::upstream::{relay, stream_body, strip_hop_by_hop};

/// Forward a rewrite-eligible read and substitute known hashes in the answer.
pub(crate) async fn handle_rewrite(
    state: &ProxyState,
    route: RewriteRoute,
    request: Request,
) -> ProxyResult<Response> {
    let (parts, body) = request.into_parts();
    let response = state
        .upstream
        .send(parts.method, &parts.uri, &parts.headers, stream_body(body))
        .await?;

    if !response.status().is_success() || state.hashes.is_empty() {
        return Ok(relay(response));
    }
    let Some(coding) = response_coding(response.headers()) else {
        debug!(route = route.as_str(), "unsupported content encoding, relaying as-is");
        state.metrics.inc_rewrite(route.as_str(), "skipped");
        return Ok(relay(response));
    };

    let status = response.status();
    let mut headers = strip_hop_by_hop(response.headers());
    let raw = response
        .bytes()
        .await
        .map_err(|source| ProxyError::upstream("rewrite.read", source))?;

    let store = state.hashes.clone();
    let input = raw.clone();
    let rewritten = tokio::task::spawn_blocking(move || rewrite_body(&store, coding, input)).await;
    let (body, outcome) = match rewritten {
        Ok(Ok(rewrite)) if rewrite.replaced > 0 => {
            debug!(
                route = route.as_str(),
                replaced = rewrite.replaced,
                "rewrote response hashes"
            );
            (rewrite.body, "rewritten")
        }
        Ok(Ok(rewrite)) => (rewrite.body, "unchanged"),
        Ok(Err(err)) => {
            warn!(route = route.as_str(), error = %err, "response rewrite failed, relaying original body");
            (raw, "failed")
        }
        Err(err) => {
            warn!(route = route.as_str(), error = %err, "response rewrite aborted, relaying original body");
            (raw, "failed")
        }
    };
    state.metrics.inc_rewrite(route.as_str(), outcome);

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    let mut relayed = Response::new(Body::from(body));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    Ok(relayed)
}

pub(crate) fn response_coding(headers: &HeaderMap) -> Option<ContentCoding> {
    match headers.get(header::CONTENT_ENCODING) {
        None => ContentCoding::from_header(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|value| ContentCoding::from_header(Some(value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{proxy_router, send, state_for};
    use axum::body::to_bytes;
    use axum::http::{Method, StatusCode};
    use httpmock::prelude::*;
    use slimline_identity::{ContentHash, HashPair};
    use std::io::Write;

    const ASSET: &str = "/api/assets/4b0c5f8e-1d2a-4c3b-9e8f-0a1b2c3d4e5f";

    fn pair() -> HashPair {
        HashPair {
            replacement: ContentHash::of_bytes(b"converted"),
            original: ContentHash::of_bytes(b"original"),
        }
    }

    fn get(path: &str) -> anyhow::Result<Request> {
        Ok(axum::http::Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?)
    }

    #[tokio::test]
    async fn asset_view_shows_replacement_hash() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let pair = pair();
        let upstream_body = format!(
            "{{\"id\":\"4b0c5f8e\",\"checksum\":\"{}\"}}",
            pair.original
        );
        let mock = server.mock(|when, then| {
            when.method(GET).path(ASSET);
            then.status(200)
                .header("content-type", "application/json")
                .body(upstream_body.clone());
        });

        let dir = tempfile::tempdir()?;
        let state = state_for(server.base_url().parse()?, "tasks: []", dir.path())?;
        state.hashes.record(pair.clone()).await?;
        let metrics = state.metrics.clone();

        let response = send(proxy_router(state), get(ASSET)?).await?;
        mock.assert();
        assert_eq!(response.status(), StatusCode::OK);
        let length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .cloned();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(
            String::from_utf8(body.to_vec())?,
            format!("{{\"id\":\"4b0c5f8e\",\"checksum\":\"{}\"}}", pair.replacement)
        );
        assert_eq!(length, Some(HeaderValue::from(upstream_body.len())));
        assert!(metrics.render()?.contains("outcome=\"rewritten\""));
        Ok(())
    }

    #[tokio::test]
    async fn gzip_sync_stream_is_rewritten_and_reencoded() -> anyhow::Result<()> {
        let pair = pair();
        let plain = format!("{{\"checksum\":\"{}\"}}\n", pair.original);
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(plain.as_bytes())?;
        let gzipped = encoder.finish()?;

        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/sync/stream");
            then.status(200)
                .header("content-encoding", "gzip")
                .body(gzipped.clone());
        });

        let dir = tempfile::tempdir()?;
        let state = state_for(server.base_url().parse()?, "tasks: []", dir.path())?;
        state.hashes.record(pair.clone()).await?;

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/sync/stream")
            .body(Body::from("{\"types\":[\"AssetsV1\"]}"))?;
        let response = send(proxy_router(state), request).await?;
        mock.assert();
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING),
            Some(&HeaderValue::from_static("gzip"))
        );
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let decoded = ContentCoding::Gzip.decode(&body)?;
        assert_eq!(
            String::from_utf8(decoded)?,
            format!("{{\"checksum\":\"{}\"}}\n", pair.replacement)
        );
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_coding_and_errors_are_relayed() -> anyhow::Result<()> {
        let pair = pair();
        let server = MockServer::start_async().await;
        let zstd = server.mock(|when, then| {
            when.method(GET).path("/api/timeline/bucket");
            then.status(200)
                .header("content-encoding", "zstd")
                .body(pair.original.to_string());
        });
        let missing = server.mock(|when, then| {
            when.method(GET).path(ASSET);
            then.status(404).body(pair.original.to_string());
        });

        let dir = tempfile::tempdir()?;
        let state = state_for(server.base_url().parse()?, "tasks: []", dir.path())?;
        state.hashes.record(pair.clone()).await?;
        let router = proxy_router(state);

        let response = send(router.clone(), get("/api/timeline/bucket?timeBucket=2024-01-01")?).await?;
        zstd.assert();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, pair.original.as_str().as_bytes());

        let response = send(router, get(ASSET)?).await?;
        missing.assert();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, pair.original.as_str().as_bytes());
        Ok(())
    }
}
