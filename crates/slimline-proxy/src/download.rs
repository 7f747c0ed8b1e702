//! JPEG on download for originals stored as JXL or AVIF.
//!
//! # Design
//!
//! - Only `200 OK` originals are converted; ranges, errors and unknown formats are
//!   relayed untouched.
//! - The asset metadata is read through a typed view of the one field needed. Any
//!   failure there means passthrough.
//! - The downloaded original and the JPEG live in one temp directory that is dropped
//!   after the response body has been streamed.

use std::path::Path;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use slimline_convert::DownloadFormat;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::rewrite::response_coding;
use crate::state::ProxyState;
use crate::upstream::{relay, stream_body, strip_hop_by_hop};

#[derive(Debug, Deserialize)]
struct AssetView {
    #[serde(rename = "originalMimeType")]
    original_mime_type: Option<String>,
}

/// Handle `GET /api/assets/{id}/original`.
pub(crate) async fn handle_download(
    state: &ProxyState,
    asset_id: &str,
    request: Request,
) -> ProxyResult<Response> {
    let (parts, body) = request.into_parts();
    let format = if state.downloads.any() {
        original_format(state, asset_id, &parts.headers).await
    } else {
        None
    };

    let response = state
        .upstream
        .send(parts.method, &parts.uri, &parts.headers, stream_body(body))
        .await?;
    let Some(format) = format else {
        return Ok(relay(response));
    };
    if response.status() != StatusCode::OK {
        return Ok(relay(response));
    }

    let headers = strip_hop_by_hop(response.headers());
    let dir = tempfile::Builder::new()
        .prefix("download-")
        .tempdir_in(&state.staging_dir)
        .map_err(|err| ProxyError::io("download.tempdir", err))?;
    let input = dir.path().join(format!("original.{}", format.as_str()));
    let output = dir.path().join("converted.jpg");
    save(response, &input).await?;

    match state.jpeg.to_jpeg(format, &input, &output).await {
        Ok(()) => {
            info!(asset = asset_id, format = format.as_str(), "serving JPEG for original");
            let mut headers = headers;
            headers.remove(header::ETAG);
            headers.remove(header::CONTENT_DISPOSITION);
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
            serve_file(&output, headers, dir).await
        }
        Err(err) => {
            warn!(
                asset = asset_id,
                format = format.as_str(),
                error = %err,
                "JPEG conversion failed, serving original"
            );
            serve_file(&input, headers, dir).await
        }
    }
}

/// Which conversion applies to the asset, if any.
async fn original_format(
    state: &ProxyState,
    asset_id: &str,
    headers: &HeaderMap,
) -> Option<DownloadFormat> {
    let uri: Uri = format!("/api/assets/{asset_id}").parse().ok()?;
    let mut headers = headers.clone();
    for name in [
        header::RANGE,
        header::IF_RANGE,
        header::IF_NONE_MATCH,
        header::IF_MODIFIED_SINCE,
    ] {
        headers.remove(name);
    }

    let response = match state
        .upstream
        .send(Method::GET, &uri, &headers, reqwest::Body::from(Bytes::new()))
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!(status = response.status().as_u16(), "asset metadata unavailable");
            return None;
        }
        Err(err) => {
            debug!(error = %err, "asset metadata request failed");
            return None;
        }
    };
    let coding = response_coding(response.headers())?;
    let raw = response.bytes().await.ok()?;
    let plain = coding.decode(&raw).ok()?;
    let view: AssetView = match serde_json::from_slice(&plain) {
        Ok(view) => view,
        Err(err) => {
            debug!(error = %err, "asset metadata is not the expected shape");
            return None;
        }
    };
    DownloadFormat::from_mime(view.original_mime_type.as_deref()?, state.downloads)
}

async fn save(response: reqwest::Response, path: &Path) -> ProxyResult<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|err| ProxyError::io("download.create", err))?;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|source| ProxyError::upstream("download.read", source))?;
        file.write_all(&chunk)
            .await
            .map_err(|err| ProxyError::io("download.write", err))?;
    }
    file.flush()
        .await
        .map_err(|err| ProxyError::io("download.flush", err))
}

async fn serve_file(path: &Path, mut headers: HeaderMap, dir: TempDir) -> ProxyResult<Response> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|err| ProxyError::io("download.open", err))?;
    let length = file
        .metadata()
        .await
        .map_err(|err| ProxyError::io("download.stat", err))?
        .len();
    headers.remove(header::CONTENT_ENCODING);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    let stream = ReaderStream::new(file).map(move |chunk| {
        let _scratch = &dir;
        chunk
    });
    let mut response = Response::new(Body::from_stream(stream));
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{proxy_router, send, state_for};
    use axum::body::to_bytes;
    use httpmock::prelude::*;
    use slimline_config::DownloadConversion;
    use slimline_convert::JpegConverter;

    const ID: &str = "4b0c5f8e-1d2a-4c3b-9e8f-0a1b2c3d4e5f";
    const JXL: &[u8] = &[
        0x00, 0x00, 0x00, 0x0C, 0x4A, 0x58, 0x4C, 0x20, 0x0D, 0x0A, 0x87, 0x0A, b'p', b'x',
    ];

    fn download_request() -> anyhow::Result<Request> {
        Ok(axum::http::Request::builder()
            .uri(format!("/api/assets/{ID}/original"))
            .body(Body::empty())?)
    }

    #[tokio::test]
    async fn jxl_original_is_served_as_jpeg() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let metadata = server.mock(|when, then| {
            when.method(GET).path(format!("/api/assets/{ID}"));
            then.status(200)
                .header("content-type", "application/json")
                .body("{\"id\":\"x\",\"originalMimeType\":\"image/jxl\"}");
        });
        let original = server.mock(|when, then| {
            when.method(GET).path(format!("/api/assets/{ID}/original"));
            then.status(200)
                .header("content-type", "image/jxl")
                .body(JXL);
        });

        let dir = tempfile::tempdir()?;
        let mut state = state_for(server.base_url().parse()?, "tasks: []", dir.path())?
            .with_jpeg_converter(JpegConverter::with_programs("cp", "cp"));
        state.downloads = DownloadConversion {
            jxl: true,
            avif: false,
        };

        let response = send(proxy_router(state), download_request()?).await?;
        metadata.assert();
        original.assert();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("image/jpeg"))
        );
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, JXL);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_format_is_relayed() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let metadata = server.mock(|when, then| {
            when.method(GET).path(format!("/api/assets/{ID}"));
            then.status(200)
                .body("{\"originalMimeType\":\"image/avif\"}");
        });
        let original = server.mock(|when, then| {
            when.method(GET).path(format!("/api/assets/{ID}/original"));
            then.status(200)
                .header("content-type", "image/avif")
                .body("avif-bytes");
        });

        let dir = tempfile::tempdir()?;
        let mut state = state_for(server.base_url().parse()?, "tasks: []", dir.path())?
            .with_jpeg_converter(JpegConverter::with_programs("false", "false"));
        state.downloads = DownloadConversion {
            jxl: true,
            avif: false,
        };

        let response = send(proxy_router(state), download_request()?).await?;
        metadata.assert();
        original.assert();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("image/avif"))
        );
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, "avif-bytes");
        Ok(())
    }

    #[tokio::test]
    async fn signature_mismatch_serves_original() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path(format!("/api/assets/{ID}"));
            then.status(200)
                .body("{\"originalMimeType\":\"image/jxl\"}");
        });
        server.mock(|when, then| {
            when.method(GET).path(format!("/api/assets/{ID}/original"));
            then.status(200)
                .header("content-type", "image/jxl")
                .body("not a jxl file");
        });

        let dir = tempfile::tempdir()?;
        let mut state = state_for(server.base_url().parse()?, "tasks: []", dir.path())?
            .with_jpeg_converter(JpegConverter::with_programs("cp", "cp"));
        state.downloads = DownloadConversion {
            jxl: true,
            avif: true,
        };

        let response = send(proxy_router(state), download_request()?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("image/jxl"))
        );
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, "not a jxl file");
        Ok(())
    }
}
