//! Upload job coordination.
//!
//! # Design
//!
//! - The form is read once: the asset is spooled to disk, everything else kept in order.
//! - Deduplication happens after staging, when the received size is known, and before
//!   any conversion starts.
//! - Only one copy of the asset stays on disk once the forwarding decision is made.
//! - The hash pair is recorded before the converted file is sent, so reads that follow a
//!   successful upload are already rewritten.

use std::io;
use std::path::Path;

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, Uri};
use axum::response::Response;
use slimline_convert::{StagedUpload, TaskProcessor, UploadPlan, plan_upload};
use slimline_identity::{ContentHash, HashPair};
use slimline_telemetry::current_request_id;
use tracing::{Instrument, info, info_span, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::jobs::JobKey;
use crate::multipart::{ASSET_FIELD, BufferedPart, UploadForm};
use crate::state::ProxyState;
use crate::upstream::relay;

/// Parts of the client request reused when forwarding.
struct RequestHead {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

/// Handle `POST /api/assets`.
pub(crate) async fn handle_upload(state: &ProxyState, request: Request) -> ProxyResult<Response> {
    let result = coordinate(state, request).await;
    match &result {
        Ok((_, outcome)) => state.metrics.inc_upload(outcome),
        Err(ProxyError::DuplicateJob { .. }) => state.metrics.inc_upload("conflict"),
        Err(_) => state.metrics.inc_upload("failed"),
    }
    result.map(|(response, _)| response)
}

async fn coordinate(
    state: &ProxyState,
    request: Request,
) -> ProxyResult<(Response, &'static str)> {
    let head = RequestHead {
        method: request.method().clone(),
        uri: request.uri().clone(),
        headers: request.headers().clone(),
    };
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|source| ProxyError::MultipartRejected { source })?;
    let (form, staged) = read_form(state, &mut multipart).await?;

    let key = JobKey::new(staged.filename(), staged.size());
    let label = key.to_string();
    let id = state.jobs.next_id();
    let lease = state
        .jobs
        .try_register(key, id)
        .map_err(|existing| ProxyError::DuplicateJob {
            key: label.clone(),
            existing,
        })?;

    let span = info_span!(
        "upload.job",
        job = lease.id(),
        key = %label,
        request_id = %current_request_id().unwrap_or_default()
    );
    let result = run_job(state, &head, &form, staged).instrument(span).await;
    drop(lease);
    result
}

async fn read_form(
    state: &ProxyState,
    multipart: &mut Multipart,
) -> ProxyResult<(UploadForm, StagedUpload)> {
    let mut form = UploadForm::default();
    let mut staged = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|source| ProxyError::Multipart { source })?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) if name == ASSET_FIELD => {
                let mut upload = StagedUpload::create_in(&state.staging_dir, &filename)?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|source| ProxyError::Multipart { source })?
                {
                    upload.append(&chunk).await?;
                }
                upload.finish().await?;
                staged = Some(upload);
            }
            Some(filename) => {
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|source| ProxyError::Multipart { source })?;
                form.push_file(BufferedPart {
                    field: name,
                    filename,
                    content_type,
                    data,
                });
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|source| ProxyError::Multipart { source })?;
                form.push_field(name, value);
            }
        }
    }
    let staged = staged.ok_or(ProxyError::MissingFile { field: ASSET_FIELD })?;
    Ok((form, staged))
}

async fn run_job(
    state: &ProxyState,
    head: &RequestHead,
    form: &UploadForm,
    staged: StagedUpload,
) -> ProxyResult<(Response, &'static str)> {
    let task = match plan_upload(&state.tasks, &staged) {
        UploadPlan::Passthrough(reason) => {
            info!(reason = reason.as_str(), "forwarding upload unchanged");
            let response = forward(state, head, form, staged.filename(), staged.path()).await?;
            return Ok((response, "passthrough"));
        }
        UploadPlan::Convert(task) => task,
    };

    info!(task = task.name(), "converting upload");
    let mut processor = TaskProcessor::new(task, staged, state.tasks.working_dir());
    processor.run(&state.limits).await?;

    if !processor.processed_is_smaller() {
        info!(
            sizes = %processor.describe(),
            "converted file is not smaller, forwarding original"
        );
        processor.clean_work_dir();
        let original = processor.original().ok_or_else(released)?;
        let response = forward(state, head, form, original.filename(), original.path()).await?;
        return Ok((response, "original"));
    }

    let original = processor.original().ok_or_else(released)?;
    let original_hash = ContentHash::of_file(original.path()).await?;
    processor.clean_original();
    let processed = processor.processed().cloned().ok_or_else(released)?;
    let replacement = ContentHash::of_file(&processed.path).await?;
    let recorded = state
        .hashes
        .record(HashPair {
            replacement,
            original: original_hash,
        })
        .await?;

    info!(sizes = %processor.describe(), recorded, "forwarding converted upload");
    let response = forward(state, head, form, &processed.filename, &processed.path).await?;
    state
        .metrics
        .add_bytes_saved(processor.original_size().saturating_sub(processed.size));
    Ok((response, "processed"))
}

fn released() -> ProxyError {
    ProxyError::io(
        "upload.session",
        io::Error::new(io::ErrorKind::NotFound, "session file already released"),
    )
}

/// Stream the re-encoded form upstream and relay the answer.
async fn forward(
    state: &ProxyState,
    head: &RequestHead,
    form: &UploadForm,
    filename: &str,
    path: &Path,
) -> ProxyResult<Response> {
    let encoded = form.encode(filename, path);
    let content_type = HeaderValue::from_str(&encoded.content_type()).map_err(|err| {
        ProxyError::io(
            "upload.content_type",
            io::Error::new(io::ErrorKind::InvalidData, err),
        )
    })?;
    let mut headers = head.headers.clone();
    headers.remove(header::CONTENT_LENGTH);
    headers.insert(header::CONTENT_TYPE, content_type);

    let (body, writer) = encoded.into_parts();
    let sent = state
        .upstream
        .send(
            head.method.clone(),
            &head.uri,
            &headers,
            reqwest::Body::wrap_stream(body),
        )
        .await;
    // The body is gone once `send` returns, so the writer finishes or hits a closed pipe.
    let pipe = match writer.await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(err) => Some(io::Error::other(err)),
    };

    match sent {
        Ok(response) => {
            if let Some(err) = pipe {
                warn!(error = %err, "upload form writer stopped early");
            }
            info!(status = response.status().as_u16(), "upstream accepted upload");
            Ok(relay(response))
        }
        Err(ProxyError::Upstream { source, .. }) => {
            Err(ProxyError::UploadStream { send: source, pipe })
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        CaptureUpstream, asset_form, proxy_router, send, state_for, upload_request,
    };
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use crate::error::{DUPLICATE_JOB_MESSAGE, UPLOAD_FAILED_MESSAGE, error_chain};

    const SHRINK: &str = "tasks:\n  - name: shrink\n    command: head -c 10 {{.folder}}/{{.name}}.{{.extension}} > {{.result_folder}}/{{.name}}.avif\n    extensions: [jpg]\n";
    const GROW: &str = "tasks:\n  - name: grow\n    command: cat {{.folder}}/{{.name}}.{{.extension}} {{.folder}}/{{.name}}.{{.extension}} > {{.result_folder}}/{{.name}}.avif\n    extensions: [jpg]\n";
    const COPY: &str = "tasks:\n  - name: copy\n    command: cp {{.folder}}/{{.name}}.{{.extension}} {{.result_folder}}/{{.name}}.avif\n    extensions: [jpg]\n";
    const BROKEN: &str = "tasks:\n  - name: broken\n    command: echo nope && exit 3\n    extensions: [jpg]\n";

    #[tokio::test]
    async fn smaller_output_is_forwarded_and_recorded() -> anyhow::Result<()> {
        let upstream = CaptureUpstream::start().await?;
        let dir = tempfile::tempdir()?;
        let state = state_for(upstream.url()?, SHRINK, dir.path())?;
        let hashes = state.hashes.clone();
        let metrics = state.metrics.clone();
        let payload = vec![b'x'; 4096];

        let response = send(proxy_router(state), upload_request(&asset_form("photo.jpg", &payload))?).await?;
        assert_eq!(response.status(), StatusCode::CREATED);

        let captured = upstream.single()?;
        let body = String::from_utf8(captured.body.to_vec())?;
        assert!(body.contains("filename=\"photo.avif\""));
        assert!(body.contains("name=\"filename\"\r\n\r\nphoto.avif\r\n"));
        assert!(body.contains("name=\"deviceAssetId\"\r\n\r\nweb-photo\r\n"));
        assert!(body.contains("\r\n\r\nxxxxxxxxxx\r\n--"));
        assert!(captured.headers.get("x-api-key").is_some());

        let original = ContentHash::of_bytes(&payload);
        let replacement = ContentHash::of_bytes(&payload[..10]);
        assert_eq!(
            hashes.original_for(replacement.as_str()).as_ref(),
            Some(&original)
        );
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.uploads_processed, 1);
        assert_eq!(snapshot.bytes_saved, 4096 - 10);
        Ok(())
    }

    #[tokio::test]
    async fn larger_output_forwards_original_without_recording() -> anyhow::Result<()> {
        let upstream = CaptureUpstream::start().await?;
        let dir = tempfile::tempdir()?;
        let state = state_for(upstream.url()?, GROW, dir.path())?;
        let hashes = state.hashes.clone();
        let metrics = state.metrics.clone();

        let response = send(proxy_router(state), upload_request(&asset_form("photo.jpg", b"abcdef"))?).await?;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = String::from_utf8(upstream.single()?.body.to_vec())?;
        assert!(body.contains("filename=\"photo.jpg\""));
        assert!(body.contains("\r\n\r\nabcdef\r\n--"));
        assert!(hashes.is_empty());
        assert_eq!(metrics.snapshot().uploads_original, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unmatched_extension_passes_through() -> anyhow::Result<()> {
        let upstream = CaptureUpstream::start().await?;
        let dir = tempfile::tempdir()?;
        let state = state_for(upstream.url()?, SHRINK, dir.path())?;
        let metrics = state.metrics.clone();

        let response = send(proxy_router(state), upload_request(&asset_form("clip.mov", b"movie"))?).await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = String::from_utf8(upstream.single()?.body.to_vec())?;
        assert!(body.contains("filename=\"clip.mov\""));
        assert_eq!(metrics.snapshot().uploads_passthrough, 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_conversion_is_not_forwarded() -> anyhow::Result<()> {
        let upstream = CaptureUpstream::start().await?;
        let dir = tempfile::tempdir()?;
        let state = state_for(upstream.url()?, BROKEN, dir.path())?;
        let metrics = state.metrics.clone();

        let response = send(proxy_router(state), upload_request(&asset_form("photo.jpg", b"abc"))?).await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, UPLOAD_FAILED_MESSAGE.as_bytes());
        assert_eq!(upstream.count(), 0);
        assert_eq!(metrics.snapshot().uploads_failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_in_flight_upload_is_rejected() -> anyhow::Result<()> {
        let upstream = CaptureUpstream::start().await?;
        let dir = tempfile::tempdir()?;
        let state = state_for(upstream.url()?, SHRINK, dir.path())?;
        let jobs = state.jobs.clone();
        let metrics = state.metrics.clone();

        let held = jobs.try_register(JobKey::new("photo.jpg", 3), jobs.next_id());
        assert!(held.is_ok());
        let response = send(proxy_router(state), upload_request(&asset_form("photo.jpg", b"abc"))?).await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body, DUPLICATE_JOB_MESSAGE.as_bytes());
        assert_eq!(upstream.count(), 0);
        assert_eq!(metrics.snapshot().uploads_conflict, 1);
        Ok(())
    }

    #[tokio::test]
    async fn form_without_asset_is_a_bad_request() -> anyhow::Result<()> {
        let upstream = CaptureUpstream::start().await?;
        let dir = tempfile::tempdir()?;
        let state = state_for(upstream.url()?, SHRINK, dir.path())?;
        let form = "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"deviceId\"\r\n\r\nweb\r\n--XBOUNDARY--\r\n";

        let response = send(proxy_router(state), upload_request(form.as_bytes())?).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(upstream.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn equal_size_output_forwards_original_without_recording() -> anyhow::Result<()> {
        let upstream = CaptureUpstream::start().await?;
        let dir = tempfile::tempdir()?;
        let state = state_for(upstream.url()?, COPY, dir.path())?;
        let hashes = state.hashes.clone();
        let metrics = state.metrics.clone();

        let response = send(proxy_router(state), upload_request(&asset_form("photo.jpg", b"same-size"))?).await?;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = String::from_utf8(upstream.single()?.body.to_vec())?;
        assert!(body.contains("filename=\"photo.jpg\""));
        assert!(body.contains("\r\n\r\nsame-size\r\n--"));
        assert!(hashes.is_empty());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.uploads_original, 1);
        assert_eq!(snapshot.bytes_saved, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_upstream_reports_both_stream_errors() -> anyhow::Result<()> {
        let closed = std::net::TcpListener::bind("127.0.0.1:0")?;
        let url: url::Url = format!("http://{}", closed.local_addr()?).parse()?;
        drop(closed);

        let dir = tempfile::tempdir()?;
        let state = state_for(url, "tasks: []", dir.path())?;
        let jobs = state.jobs.clone();
        // Larger than the writer channel holds, so the writer is still busy when the send fails.
        let payload = vec![b'z'; 512 * 1024];

        let result = coordinate(&state, upload_request(&asset_form("photo.jpg", &payload))?).await;
        let err = match result {
            Err(err) => err,
            Ok(_) => anyhow::bail!("upload to a closed port succeeded"),
        };
        assert!(matches!(
            err,
            ProxyError::UploadStream { pipe: Some(_), .. }
        ));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let chain = error_chain(&err);
        assert!(chain.starts_with("upload stream failed: "));
        assert!(chain.contains("; form writer: upload body receiver closed"));

        assert!(jobs.is_empty());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .filter(|name| name != "checksums.csv")
            .collect();
        assert!(leftovers.is_empty(), "staged files left behind: {leftovers:?}");
        Ok(())
    }
}
