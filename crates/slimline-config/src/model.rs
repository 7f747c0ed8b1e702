//! Typed runtime settings.
//!
//! # Design
//! - Pure data carriers; parsing from flags/environment lives in the binary.
//! - `validate` runs once at startup and is the only place settings are rejected.

use std::net::SocketAddr;
use std::path::PathBuf;

use url::Url;

use crate::error::{ConfigError, ConfigResult};

/// Default listening address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:2284";
/// Default tasks file.
pub const DEFAULT_TASKS_FILE: &str = "config/lossy_avif.yaml";
/// Default persisted checksum mapping.
pub const DEFAULT_CHECKSUMS_FILE: &str = "checksums.csv";
/// Default number of concurrent image conversions.
pub const DEFAULT_MAX_IMAGE_JOBS: usize = 5;
/// Default number of concurrent video conversions.
pub const DEFAULT_MAX_VIDEO_JOBS: usize = 1;

/// Formats that may be converted to JPEG when a client downloads an original.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadConversion {
    /// Convert `image/jxl` originals.
    pub jxl: bool,
    /// Convert `image/avif` originals.
    pub avif: bool,
}

impl DownloadConversion {
    /// Whether any download conversion is enabled.
    #[must_use]
    pub const fn any(self) -> bool {
        self.jxl || self.avif
    }
}

/// Settings the proxy runs with.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Storage server base URL.
    pub upstream: Url,
    /// Address to listen on.
    pub listen: SocketAddr,
    /// YAML task registry.
    pub tasks_file: PathBuf,
    /// Append-only checksum mapping.
    pub checksums_file: PathBuf,
    /// Download-time conversions.
    pub downloads: DownloadConversion,
    /// Concurrent image conversion slots.
    pub max_image_jobs: usize,
    /// Concurrent video conversion slots.
    pub max_video_jobs: usize,
}

impl ProxySettings {
    /// Parse and validate an upstream URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the value is empty, unparsable, not
    /// http(s), or has no host.
    pub fn parse_upstream(value: &str) -> ConfigResult<Url> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::invalid_field("upstream", "missing", None));
        }
        let url = Url::parse(trimmed).map_err(|_| {
            ConfigError::invalid_field("upstream", "unparsable", Some(trimmed.to_string()))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid_field(
                "upstream",
                "unsupported_scheme",
                Some(trimmed.to_string()),
            ));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::invalid_field(
                "upstream",
                "missing_host",
                Some(trimmed.to_string()),
            ));
        }
        Ok(url)
    }

    /// Check invariants that cannot be expressed in the types.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a slot count is zero or a path is empty.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_image_jobs == 0 {
            return Err(ConfigError::invalid_field(
                "max_image_jobs",
                "zero",
                Some("0".to_string()),
            ));
        }
        if self.max_video_jobs == 0 {
            return Err(ConfigError::invalid_field(
                "max_video_jobs",
                "zero",
                Some("0".to_string()),
            ));
        }
        if self.tasks_file.as_os_str().is_empty() {
            return Err(ConfigError::invalid_field("tasks_file", "missing", None));
        }
        if self.checksums_file.as_os_str().is_empty() {
            return Err(ConfigError::invalid_field("checksums_file", "missing", None));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConfigResult<ProxySettings> {
        Ok(ProxySettings {
            upstream: ProxySettings::parse_upstream("http://immich-server:2283")?,
            listen: DEFAULT_LISTEN
                .parse()
                .map_err(|_| ConfigError::invalid_field("listen", "unparsable", None))?,
            tasks_file: PathBuf::from(DEFAULT_TASKS_FILE),
            checksums_file: PathBuf::from(DEFAULT_CHECKSUMS_FILE),
            downloads: DownloadConversion::default(),
            max_image_jobs: DEFAULT_MAX_IMAGE_JOBS,
            max_video_jobs: DEFAULT_MAX_VIDEO_JOBS,
        })
    }

    #[test]
    fn defaults_validate() -> ConfigResult<()> {
        let settings = settings()?;
        settings.validate()?;
        assert!(!settings.downloads.any());
        assert_eq!(settings.listen.port(), 2284);
        Ok(())
    }

    #[test]
    fn zero_slots_are_rejected() -> ConfigResult<()> {
        let mut settings = settings()?;
        settings.max_video_jobs = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidField {
                field: "max_video_jobs",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn parse_upstream_rejects_bad_urls() {
        for (value, reason) in [
            ("", "missing"),
            ("not a url", "unparsable"),
            ("ftp://files.example", "unsupported_scheme"),
        ] {
            assert!(
                matches!(
                    ProxySettings::parse_upstream(value),
                    Err(ConfigError::InvalidField { reason: found, .. }) if found == reason
                ),
                "{value} should fail with {reason}"
            );
        }
        assert!(ProxySettings::parse_upstream("https://photos.example.com/").is_ok());
    }
}
