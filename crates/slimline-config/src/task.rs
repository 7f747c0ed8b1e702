//! Conversion tasks and the registry loaded from the tasks file.
//!
//! # Design
//!
//! - The registry is built once at startup and is read-only afterwards; callers share it
//!   behind an `Arc` and never lock.
//! - Matching is by lowercase extension; the first task in file order wins.
//! - Minimum sizes are a caller decision: a match below the threshold means passthrough.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::size::parse_size;
use crate::template::CommandTemplate;

/// Immutable conversion rule.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    extensions: BTreeSet<String>,
    min_filesize: u64,
    command: CommandTemplate,
}

impl Task {
    /// Build a task, normalising extensions to lowercase without a leading dot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTask`] when the name or extension list is empty or the
    /// command template does not parse.
    pub fn new(
        name: impl Into<String>,
        extensions: impl IntoIterator<Item = impl AsRef<str>>,
        min_filesize: u64,
        command: &str,
    ) -> ConfigResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::invalid_field("tasks.name", "empty", None));
        }

        let extensions: BTreeSet<String> = extensions
            .into_iter()
            .map(|ext| normalise_extension(ext.as_ref()))
            .filter(|ext| !ext.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(ConfigError::task(
                name,
                ConfigError::invalid_field("tasks.extensions", "empty", None),
            ));
        }

        let command =
            CommandTemplate::parse(command).map_err(|err| ConfigError::task(name.clone(), err))?;

        Ok(Self {
            name,
            extensions,
            min_filesize,
            command,
        })
    }

    /// Task name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase extensions handled by this task.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    /// Inputs strictly smaller than this many bytes are forwarded untouched.
    #[must_use]
    pub const fn min_filesize(&self) -> u64 {
        self.min_filesize
    }

    /// Command template run for each matched upload.
    #[must_use]
    pub const fn command(&self) -> &CommandTemplate {
        &self.command
    }

    /// Whether the task handles `extension` (case-insensitive, dot optional).
    #[must_use]
    pub fn matches(&self, extension: &str) -> bool {
        self.extensions.contains(&normalise_extension(extension))
    }

    /// Whether an input of `size` bytes is large enough to be converted.
    #[must_use]
    pub const fn accepts_size(&self, size: u64) -> bool {
        size >= self.min_filesize
    }
}

/// Read-only set of tasks plus the directory their commands run from.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    tasks: Vec<Arc<Task>>,
    working_dir: PathBuf,
}

impl TaskRegistry {
    /// Build a registry from already-validated tasks.
    #[must_use]
    pub fn new(tasks: Vec<Task>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks: tasks.into_iter().map(Arc::new).collect(),
            working_dir: working_dir.into(),
        }
    }

    /// Load the tasks file at `path`. Commands will run from the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, is not valid YAML, or contains an
    /// invalid task.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let source =
            fs::read_to_string(path).map_err(|err| ConfigError::io("tasks.read", path, err))?;
        let working_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let registry = Self::parse(&source, working_dir).map_err(|err| match err {
            ConfigError::Yaml { source, .. } => ConfigError::Yaml {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })?;
        info!(
            path = %path.display(),
            tasks = registry.len(),
            "loaded conversion tasks"
        );
        Ok(registry)
    }

    /// Parse a YAML tasks document.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is malformed or a task is invalid.
    pub fn parse(source: &str, working_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let document: TasksDocument =
            serde_yaml::from_str(source).map_err(|source| ConfigError::Yaml { path: None, source })?;

        let mut tasks = Vec::with_capacity(document.tasks.len());
        for raw in document.tasks {
            let min_filesize = match raw.min_filesize {
                None => 0,
                Some(SizeValue::Bytes(bytes)) => bytes,
                Some(SizeValue::Human(text)) => parse_size("tasks.min_filesize", &text)
                    .map_err(|err| ConfigError::task(raw.name.clone(), err))?,
            };
            tasks.push(Task::new(
                raw.name,
                raw.extensions,
                min_filesize,
                &raw.command,
            )?);
        }

        Ok(Self::new(tasks, working_dir))
    }

    /// First task handling `extension`, if any.
    #[must_use]
    pub fn find(&self, extension: &str) -> Option<&Arc<Task>> {
        self.tasks.iter().find(|task| task.matches(extension))
    }

    /// Directory converter commands are started in.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Number of configured tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks are configured; every upload is then passthrough.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct TasksDocument {
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    name: String,
    command: String,
    extensions: Vec<String>,
    #[serde(default)]
    min_filesize: Option<SizeValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Human(String),
}

fn normalise_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}
