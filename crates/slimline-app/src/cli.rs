//! Flags and environment variables.
//!
//! Every flag can also be set through a `SLIMLINE_` environment variable so the proxy
//! can be configured entirely from a container definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use slimline_config::{
    DEFAULT_CHECKSUMS_FILE, DEFAULT_LISTEN, DEFAULT_MAX_IMAGE_JOBS, DEFAULT_MAX_VIDEO_JOBS,
    DEFAULT_TASKS_FILE, DownloadConversion, ProxySettings,
};
use slimline_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig};

use crate::error::{AppError, AppResult};

/// Command-line interface of the `slimline` binary.
#[derive(Debug, Parser)]
#[command(
    name = "slimline",
    version,
    about = "Transparent proxy that shrinks photo uploads before they reach the server"
)]
pub struct Cli {
    /// Base URL of the storage server, e.g. `http://immich-server:2283`.
    #[arg(long, env = "SLIMLINE_UPSTREAM")]
    pub upstream: String,
    /// Address to listen on.
    #[arg(long, env = "SLIMLINE_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,
    /// YAML file describing conversion tasks.
    #[arg(long, env = "SLIMLINE_TASKS_FILE", default_value = DEFAULT_TASKS_FILE)]
    pub tasks_file: PathBuf,
    /// File the replacement/original hash pairs are appended to.
    #[arg(long, env = "SLIMLINE_CHECKSUMS_FILE", default_value = DEFAULT_CHECKSUMS_FILE)]
    pub checksums_file: PathBuf,
    /// Serve JXL originals as JPEG.
    #[arg(long = "download-jpg-from-jxl", env = "SLIMLINE_DOWNLOAD_JPG_FROM_JXL")]
    pub download_jpg_from_jxl: bool,
    /// Serve AVIF originals as JPEG.
    #[arg(long = "download-jpg-from-avif", env = "SLIMLINE_DOWNLOAD_JPG_FROM_AVIF")]
    pub download_jpg_from_avif: bool,
    /// Concurrent image conversions.
    #[arg(long, env = "SLIMLINE_MAX_IMAGE_JOBS", default_value_t = DEFAULT_MAX_IMAGE_JOBS)]
    pub max_image_jobs: usize,
    /// Concurrent video conversions.
    #[arg(long, env = "SLIMLINE_MAX_VIDEO_JOBS", default_value_t = DEFAULT_MAX_VIDEO_JOBS)]
    pub max_video_jobs: usize,
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "SLIMLINE_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
    /// Log output format: `json` or `pretty`.
    #[arg(long, env = "SLIMLINE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Validated proxy settings.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the upstream URL is invalid or a slot count is zero.
    pub fn settings(&self) -> AppResult<ProxySettings> {
        let upstream = ProxySettings::parse_upstream(&self.upstream)
            .map_err(|err| AppError::config("settings.upstream", err))?;
        let settings = ProxySettings {
            upstream,
            listen: self.listen,
            tasks_file: self.tasks_file.clone(),
            checksums_file: self.checksums_file.clone(),
            downloads: DownloadConversion {
                jxl: self.download_jpg_from_jxl,
                avif: self.download_jpg_from_avif,
            },
            max_image_jobs: self.max_image_jobs,
            max_video_jobs: self.max_video_jobs,
        };
        settings
            .validate()
            .map_err(|err| AppError::config("settings.validate", err))?;
        Ok(settings)
    }

    /// Logging configuration for the subscriber.
    #[must_use]
    pub fn logging(&self) -> LoggingConfig<'_> {
        LoggingConfig {
            level: &self.log_level,
            format: self.log_format.unwrap_or_else(LogFormat::infer),
            build_version: env!("CARGO_PKG_VERSION"),
        }
    }
}
