//! One conversion session: staged original in, at most one processed file out.
//!
//! # Design
//!
//! - The processor owns every temp resource it creates (staged original, output
//!   directory). Dropping it removes whatever is left, so early returns cannot leak.
//! - The conversion slot is held only while the external command runs.
//! - The converter must leave exactly one regular file in `result_folder`; anything
//!   else is a failed conversion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use slimline_config::{HumanSize, Task, TemplateValues};
use tempfile::TempDir;
use tracing::{info, warn};

use crate::command;
use crate::error::{ConvertError, ConvertResult};
use crate::limits::{ConversionLimits, MediaClass};
use crate::upload::StagedUpload;

/// The single file a converter produced.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    /// Location inside the session's output directory.
    pub path: PathBuf,
    /// Filename to present upstream: the client's stem plus the new extension.
    pub filename: String,
    /// New extension without the dot, if the output has one.
    pub extension: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

/// Drives a task's converter over one staged upload.
#[derive(Debug)]
pub struct TaskProcessor {
    task: Arc<Task>,
    working_dir: PathBuf,
    class: MediaClass,
    original_filename: String,
    original_size: u64,
    original: Option<StagedUpload>,
    work_dir: Option<TempDir>,
    processed: Option<ProcessedFile>,
}

impl TaskProcessor {
    /// Start a session for `original`. Converter commands run from `working_dir`.
    #[must_use]
    pub fn new(task: Arc<Task>, original: StagedUpload, working_dir: impl Into<PathBuf>) -> Self {
        let class = MediaClass::for_extension(original.extension().unwrap_or_default());
        Self {
            task,
            working_dir: working_dir.into(),
            class,
            original_filename: original.filename().to_string(),
            original_size: original.size(),
            original: Some(original),
            work_dir: None,
            processed: None,
        }
    }

    /// Run the converter, waiting for a slot in the matching pool first.
    ///
    /// # Errors
    ///
    /// Returns an error when the output directory cannot be created, a path is not UTF-8,
    /// the command fails, or the output directory does not hold exactly one file.
    pub async fn run(&mut self, limits: &ConversionLimits) -> ConvertResult<&ProcessedFile> {
        let metrics = limits.metrics().clone();
        let result = self.run_inner(limits).await;
        let status = if result.is_ok() { "ok" } else { "failed" };
        metrics.inc_conversion(self.class.as_str(), status);
        result?;
        self.processed
            .as_ref()
            .ok_or_else(|| ConvertError::invalid_input("processed", "missing", None))
    }

    async fn run_inner(&mut self, limits: &ConversionLimits) -> ConvertResult<()> {
        let original = self
            .original
            .as_ref()
            .ok_or_else(|| ConvertError::invalid_input("original", "already_cleaned", None))?;
        let input = original.path().to_path_buf();
        let folder = input.parent().unwrap_or_else(|| Path::new("."));
        let name = input
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| ConvertError::NonUtf8Path {
                field: "name",
                path: input.clone(),
            })?;
        let extension = original.extension().unwrap_or_default();

        let work_dir = tempfile::Builder::new()
            .prefix("processing-")
            .tempdir_in(folder)
            .map_err(|err| ConvertError::io("work_dir.create", folder, err))?;
        let result_folder = utf8(work_dir.path(), "result_folder")?;
        let folder_str = utf8(folder, "folder")?;
        let original_name = STANDARD.encode(self.original_filename.as_bytes());

        let command_line = self.task.command().render(&TemplateValues {
            result_folder,
            original_name: &original_name,
            folder: folder_str,
            name,
            extension,
        });
        let work_path = work_dir.path().to_path_buf();
        self.work_dir = Some(work_dir);

        {
            let _permit = limits.acquire(self.class).await?;
            info!(
                task = self.task.name(),
                class = self.class.as_str(),
                command = %command_line,
                "running task"
            );
            if let Err(err) = command::run(
                command::shell(&command_line, &self.working_dir),
                &command_line,
            )
            .await
            {
                if let ConvertError::CommandFailed { status, output, .. } = &err {
                    warn!(
                        task = self.task.name(),
                        status = ?status,
                        output = %output,
                        "converter failed"
                    );
                }
                return Err(err);
            }
        }

        self.processed = Some(self.collect_output(&work_path).await?);
        Ok(())
    }

    async fn collect_output(&self, work_path: &Path) -> ConvertResult<ProcessedFile> {
        let mut entries = tokio::fs::read_dir(work_path)
            .await
            .map_err(|err| ConvertError::io("work_dir.read", work_path, err))?;
        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| ConvertError::io("work_dir.read", work_path, err))?
        {
            found.push(entry.path());
        }
        if found.len() != 1 {
            return Err(ConvertError::UnexpectedOutput {
                path: work_path.to_path_buf(),
                count: found.len(),
            });
        }
        let path = found.remove(0);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| ConvertError::io("output.stat", &path, err))?;
        if !metadata.is_file() {
            return Err(ConvertError::UnexpectedOutput {
                path: work_path.to_path_buf(),
                count: 0,
            });
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_string);
        let stem = Path::new(&self.original_filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.original_filename);
        let filename = extension
            .as_deref()
            .map_or_else(|| stem.to_string(), |ext| format!("{stem}.{ext}"));

        Ok(ProcessedFile {
            path,
            filename,
            extension,
            size: metadata.len(),
        })
    }

    /// Task driving this session.
    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Pool the conversion draws from.
    #[must_use]
    pub const fn class(&self) -> MediaClass {
        self.class
    }

    /// Filename the client sent.
    #[must_use]
    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    /// Size of the client's file.
    #[must_use]
    pub const fn original_size(&self) -> u64 {
        self.original_size
    }

    /// Staged original, until [`Self::clean_original`] runs.
    #[must_use]
    pub const fn original(&self) -> Option<&StagedUpload> {
        self.original.as_ref()
    }

    /// Converter output, once [`Self::run`] succeeded.
    #[must_use]
    pub const fn processed(&self) -> Option<&ProcessedFile> {
        self.processed.as_ref()
    }

    /// Whether the converted file is strictly smaller than the original.
    #[must_use]
    pub fn processed_is_smaller(&self) -> bool {
        self.processed
            .as_ref()
            .is_some_and(|processed| processed.size < self.original_size)
    }

    /// Summary line for logs: `"new.avif" (1.2 MB) <- (4.0 MB) "old.jpg"`.
    #[must_use]
    pub fn describe(&self) -> String {
        self.processed.as_ref().map_or_else(
            || format!("\"{}\" ({})", self.original_filename, HumanSize(self.original_size)),
            |processed| {
                format!(
                    "\"{}\" ({}) <- ({}) \"{}\"",
                    processed.filename,
                    HumanSize(processed.size),
                    HumanSize(self.original_size),
                    self.original_filename
                )
            },
        )
    }

    /// Remove the staged original now. Failures are logged; the session continues.
    pub fn clean_original(&mut self) {
        if let Some(original) = self.original.take()
            && let Err(err) = original.close()
        {
            warn!(error = %err, "unable to remove staged original");
        }
    }

    /// Remove the output directory now. Failures are logged; the session continues.
    pub fn clean_work_dir(&mut self) {
        self.processed = None;
        if let Some(work_dir) = self.work_dir.take() {
            let path = work_dir.path().to_path_buf();
            if let Err(err) = work_dir.close() {
                warn!(path = %path.display(), error = %err, "unable to remove work directory");
            }
        }
    }
}

fn utf8<'a>(path: &'a Path, field: &'static str) -> ConvertResult<&'a str> {
    path.to_str().ok_or_else(|| ConvertError::NonUtf8Path {
        field,
        path: path.to_path_buf(),
    })
}
