//! Shared state handed to every request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use slimline_config::{DownloadConversion, TaskRegistry};
use slimline_convert::{ConversionLimits, JpegConverter};
use slimline_identity::HashStore;
use slimline_telemetry::Metrics;

use crate::jobs::JobTable;
use crate::upstream::Upstream;

/// Everything a request handler needs; cloned cheaply behind an `Arc`.
pub struct ProxyState {
    pub(crate) upstream: Upstream,
    pub(crate) tasks: Arc<TaskRegistry>,
    pub(crate) limits: ConversionLimits,
    pub(crate) jobs: JobTable,
    pub(crate) hashes: HashStore,
    pub(crate) metrics: Metrics,
    pub(crate) downloads: DownloadConversion,
    pub(crate) jpeg: JpegConverter,
    pub(crate) staging_dir: PathBuf,
}

impl ProxyState {
    /// Assemble the state. Metrics are shared with `limits`.
    #[must_use]
    pub fn new(
        upstream: Upstream,
        tasks: TaskRegistry,
        hashes: HashStore,
        limits: ConversionLimits,
        downloads: DownloadConversion,
    ) -> Self {
        Self {
            upstream,
            tasks: Arc::new(tasks),
            metrics: limits.metrics().clone(),
            limits,
            jobs: JobTable::default(),
            hashes,
            downloads,
            jpeg: JpegConverter::default(),
            staging_dir: std::env::temp_dir(),
        }
    }

    /// Use explicit JPEG decoders.
    #[must_use]
    pub fn with_jpeg_converter(mut self, jpeg: JpegConverter) -> Self {
        self.jpeg = jpeg;
        self
    }

    /// Stage uploads in `dir` instead of the system temp directory.
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Metrics handle.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Hash identity store.
    #[must_use]
    pub const fn hashes(&self) -> &HashStore {
        &self.hashes
    }

    /// In-flight upload jobs.
    #[must_use]
    pub const fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    /// Directory uploads are staged in.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }
}
