//! Staging uploaded files and deciding whether to convert them.
//!
//! # Design
//!
//! - Every upload is spooled to a temp file first; the job key needs the received size
//!   and the converter needs a path.
//! - Only extensions made of `[A-Za-z0-9._-]` may reach a shell template. Anything else
//!   is forwarded untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use slimline_config::{Task, TaskRegistry};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::error::{ConvertError, ConvertResult};

/// An upload spooled to disk. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    writer: Option<tokio::fs::File>,
    filename: String,
    extension: Option<String>,
    size: u64,
}

impl StagedUpload {
    /// Create an empty staging file in the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Io`] when the temp file cannot be created.
    pub fn create(filename: &str) -> ConvertResult<Self> {
        Self::create_in(&std::env::temp_dir(), filename)
    }

    /// Create an empty staging file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Io`] when the temp file cannot be created.
    pub fn create_in(dir: &Path, filename: &str) -> ConvertResult<Self> {
        let extension = valid_extension(filename).map(str::to_string);
        let suffix = extension
            .as_deref()
            .map_or_else(String::new, |ext| format!(".{ext}"));
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(dir)
            .map_err(|err| ConvertError::io("stage.create", dir, err))?;
        let handle = file
            .as_file()
            .try_clone()
            .map_err(|err| ConvertError::io("stage.open", file.path(), err))?;

        Ok(Self {
            writer: Some(tokio::fs::File::from_std(handle)),
            file,
            filename: filename.to_string(),
            extension,
            size: 0,
        })
    }

    /// Append a chunk of the uploaded file.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Io`] when the write fails or staging was already finished.
    pub async fn append(&mut self, chunk: &[u8]) -> ConvertResult<()> {
        let path = self.file.path();
        let writer = self.writer.as_mut().ok_or_else(|| {
            ConvertError::io(
                "stage.write",
                path,
                std::io::Error::other("staging already finished"),
            )
        })?;
        writer
            .write_all(chunk)
            .await
            .map_err(|err| ConvertError::io("stage.write", path, err))?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Flush and close the write side. Further appends fail.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Io`] when the flush fails.
    pub async fn finish(&mut self) -> ConvertResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .await
                .map_err(|err| ConvertError::io("stage.flush", self.file.path(), err))?;
        }
        Ok(())
    }

    /// Location of the staged bytes.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Filename the client sent.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Validated extension of the client filename, without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Bytes received so far.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Remove the staged file now, reporting failures instead of ignoring them.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Io`] when the file cannot be removed.
    pub fn close(self) -> ConvertResult<()> {
        let path: PathBuf = self.file.path().to_path_buf();
        drop(self.writer);
        self.file
            .close()
            .map_err(|err| ConvertError::io("stage.remove", path, err))
    }
}

/// Why an upload is forwarded without conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// The filename has no extension or one with unsafe characters.
    InvalidExtension,
    /// No task handles the extension.
    NoTask,
    /// The matching task's minimum size was not reached.
    BelowMinimum {
        /// The task's threshold in bytes.
        minimum: u64,
    },
}

impl PassthroughReason {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidExtension => "invalid_extension",
            Self::NoTask => "no_task",
            Self::BelowMinimum { .. } => "below_minimum",
        }
    }
}

/// What to do with a staged upload.
#[derive(Debug, Clone)]
pub enum UploadPlan {
    /// Forward the original unchanged.
    Passthrough(PassthroughReason),
    /// Run the task and forward whichever file is smaller.
    Convert(Arc<Task>),
}

/// Decide how `upload` is handled.
#[must_use]
pub fn plan_upload(registry: &TaskRegistry, upload: &StagedUpload) -> UploadPlan {
    let Some(extension) = upload.extension() else {
        return UploadPlan::Passthrough(PassthroughReason::InvalidExtension);
    };
    let Some(task) = registry.find(extension) else {
        return UploadPlan::Passthrough(PassthroughReason::NoTask);
    };
    if !task.accepts_size(upload.size()) {
        return UploadPlan::Passthrough(PassthroughReason::BelowMinimum {
            minimum: task.min_filesize(),
        });
    }
    UploadPlan::Convert(Arc::clone(task))
}

static SAFE_EXTENSION: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._-]+$")
        .map_err(|err| tracing::error!(error = %err, "extension pattern failed to compile"))
        .ok()
});

/// Extension of `filename` if it is safe to hand to a shell template.
#[must_use]
pub fn valid_extension(filename: &str) -> Option<&str> {
    let extension = Path::new(filename).extension()?.to_str()?;
    SAFE_EXTENSION
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(extension))
        .then_some(extension)
}
