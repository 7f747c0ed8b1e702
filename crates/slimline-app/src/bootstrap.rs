//! Startup sequence: settings, logging, temp directory, stores, server.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use slimline_config::{ProxySettings, TaskRegistry};
use slimline_convert::ConversionLimits;
use slimline_identity::HashStore;
use slimline_proxy::{ProxyServer, ProxyState, Upstream};
use slimline_telemetry::{GlobalContextGuard, Metrics, init_logging};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::error::{AppError, AppResult};

/// Entry point for the slimline boot sequence.
///
/// # Errors
///
/// Returns an error when settings are invalid, a startup resource cannot be prepared, or
/// the listener fails.
pub async fn run_app() -> AppResult<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    init_logging(&cli.logging()).map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new(settings.upstream.as_str());

    info!("slimline bootstrap starting");
    let tmpdir = std::env::var_os("TMPDIR").map(PathBuf::from);
    let staging_dir = prepare_temp_dir(tmpdir.as_deref())?;
    let server = build_server(&settings, staging_dir)?;

    server
        .serve(settings.listen)
        .await
        .map_err(|err| AppError::proxy("proxy.serve", err))
}

/// Load every startup resource and assemble the proxy.
pub(crate) fn build_server(settings: &ProxySettings, staging_dir: PathBuf) -> AppResult<ProxyServer> {
    let tasks = TaskRegistry::load(&settings.tasks_file)
        .map_err(|err| AppError::config("tasks.load", err))?;
    if tasks.is_empty() {
        warn!(path = %settings.tasks_file.display(), "no conversion tasks configured, every upload passes through");
    }
    let hashes = HashStore::open(&settings.checksums_file)
        .map_err(|err| AppError::identity("checksums.open", err))?;
    info!(
        path = %hashes.path().display(),
        records = hashes.len(),
        "loaded checksum mapping"
    );

    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let limits = ConversionLimits::new(settings.max_image_jobs, settings.max_video_jobs, metrics);
    let upstream = Upstream::new(settings.upstream.clone())
        .map_err(|err| AppError::proxy("upstream.client", err))?;
    info!(
        image_slots = settings.max_image_jobs,
        video_slots = settings.max_video_jobs,
        jxl_downloads = settings.downloads.jxl,
        avif_downloads = settings.downloads.avif,
        "proxy configured"
    );

    let state = ProxyState::new(upstream, tasks, hashes, limits, settings.downloads)
        .with_staging_dir(staging_dir);
    Ok(ProxyServer::new(state))
}

/// Validate and clear the temp directory uploads are staged in.
///
/// Leftovers from a previous run are sessions that never finished; they are removed.
pub(crate) fn prepare_temp_dir(tmpdir: Option<&Path>) -> AppResult<PathBuf> {
    let Some(dir) = tmpdir else {
        warn!(
            "TMPDIR is not set; uploads will be written to disk several times. \
             Point TMPDIR at a tmpfs to keep them in memory"
        );
        return Ok(std::env::temp_dir());
    };

    let metadata = fs::metadata(dir).map_err(|err| AppError::io("tmpdir.stat", dir, err))?;
    if !metadata.is_dir() {
        return Err(AppError::InvalidConfig {
            field: "TMPDIR",
            reason: "not_a_directory",
            value: Some(dir.display().to_string()),
        });
    }

    let mut removed = 0_usize;
    for entry in fs::read_dir(dir).map_err(|err| AppError::io("tmpdir.read", dir, err))? {
        let entry = entry.map_err(|err| AppError::io("tmpdir.read", dir, err))?;
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map_err(|err| AppError::io("tmpdir.stat", &path, err))?
            .is_dir();
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|err| AppError::io("tmpdir.clean", &path, err))?;
        removed += 1;
    }
    if removed > 0 {
        info!(path = %dir.display(), removed, "cleared stale temporary files");
    }
    Ok(dir.to_path_buf())
}
