//! Re-encoding the upload form for the upstream.
//!
//! # Design
//!
//! - Text fields and small file parts are kept in memory; the asset file is streamed from
//!   disk so it is never held whole.
//! - A writer task produces the body into a bounded channel the HTTP client drains. The
//!   writer pushes its own failures into the stream so the send fails too, and reports
//!   them through its join handle.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

/// Form field carrying the uploaded asset.
pub const ASSET_FIELD: &str = "assetData";
/// Form field carrying the asset filename.
pub const FILENAME_FIELD: &str = "filename";

const CHANNEL_DEPTH: usize = 8;

/// A non-asset file part, buffered in memory.
#[derive(Debug, Clone)]
pub struct BufferedPart {
    /// Form field name.
    pub field: String,
    /// Filename the client sent.
    pub filename: String,
    /// Declared content type.
    pub content_type: Option<String>,
    /// Part contents.
    pub data: Bytes,
}

/// Every part of an upload form except the asset file, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    fields: Vec<(String, String)>,
    files: Vec<BufferedPart>,
}

impl UploadForm {
    /// Keep a text field.
    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Keep a non-asset file part.
    pub fn push_file(&mut self, part: BufferedPart) {
        self.files.push(part);
    }

    /// Value of the first text field called `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Start encoding the form with the asset file at `asset_path`, presented upstream as
    /// `asset_filename`. The `filename` field, when present, is set to `asset_filename`.
    #[must_use]
    pub fn encode(&self, asset_filename: &str, asset_path: &Path) -> EncodedForm {
        let boundary = format!("slimline-{}", uuid::Uuid::new_v4().simple());
        let (sender, receiver) = mpsc::channel(CHANNEL_DEPTH);
        let plan = WritePlan {
            boundary: boundary.clone(),
            fields: self
                .fields
                .iter()
                .map(|(name, value)| {
                    let value = if name == FILENAME_FIELD {
                        asset_filename.to_string()
                    } else {
                        value.clone()
                    };
                    (name.clone(), value)
                })
                .collect(),
            files: self.files.clone(),
            asset_filename: asset_filename.to_string(),
            asset_path: asset_path.to_path_buf(),
        };
        let writer = tokio::spawn(write_form(plan, sender));
        EncodedForm {
            boundary,
            receiver,
            writer,
        }
    }
}

/// A form being written by a background task.
#[derive(Debug)]
pub struct EncodedForm {
    boundary: String,
    receiver: mpsc::Receiver<io::Result<Bytes>>,
    writer: JoinHandle<io::Result<()>>,
}

impl EncodedForm {
    /// `Content-Type` header value for the encoded body.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Split into the body stream and the writer's handle.
    pub fn into_parts(
        self,
    ) -> (
        impl Stream<Item = io::Result<Bytes>> + Send + 'static,
        JoinHandle<io::Result<()>>,
    ) {
        let body = stream::unfold(self.receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        });
        (body, self.writer)
    }
}

struct WritePlan {
    boundary: String,
    fields: Vec<(String, String)>,
    files: Vec<BufferedPart>,
    asset_filename: String,
    asset_path: PathBuf,
}

async fn write_form(plan: WritePlan, sender: mpsc::Sender<io::Result<Bytes>>) -> io::Result<()> {
    let result = write_parts(&plan, &sender).await;
    if let Err(err) = &result {
        // Best effort: the receiver may already be gone.
        let _ = sender
            .send(Err(io::Error::new(err.kind(), err.to_string())))
            .await;
    }
    result
}

async fn write_parts(plan: &WritePlan, sender: &mpsc::Sender<io::Result<Bytes>>) -> io::Result<()> {
    let boundary = &plan.boundary;
    for (name, value) in &plan.fields {
        let part = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{value}\r\n",
            escape_quotes(name)
        );
        send(sender, Bytes::from(part)).await?;
    }

    for file in &plan.files {
        let head = file_part_head(
            boundary,
            &file.field,
            &file.filename,
            file.content_type.as_deref(),
        );
        send(sender, Bytes::from(head)).await?;
        send(sender, file.data.clone()).await?;
        send(sender, Bytes::from_static(b"\r\n")).await?;
    }

    let head = file_part_head(boundary, ASSET_FIELD, &plan.asset_filename, None);
    send(sender, Bytes::from(head)).await?;
    let asset = tokio::fs::File::open(&plan.asset_path).await?;
    let mut chunks = ReaderStream::new(asset);
    while let Some(chunk) = chunks.next().await {
        send(sender, chunk?).await?;
    }
    send(sender, Bytes::from(format!("\r\n--{boundary}--\r\n"))).await
}

fn file_part_head(
    boundary: &str,
    field: &str,
    filename: &str,
    content_type: Option<&str>,
) -> String {
    format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
         Content-Type: {}\r\n\r\n",
        escape_quotes(field),
        escape_quotes(filename),
        content_type.unwrap_or("application/octet-stream")
    )
}

async fn send(sender: &mpsc::Sender<io::Result<Bytes>>, chunk: Bytes) -> io::Result<()> {
    sender
        .send(Ok(chunk))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "upload body receiver closed"))
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
