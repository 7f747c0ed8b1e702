//! Byte sizes: parsing from configuration and rendering for logs.

use std::fmt;

use crate::error::{ConfigError, ConfigResult};

const KB: u64 = 1 << 10;
const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;
const TB: u64 = 1 << 40;

/// Parse a size such as `512`, `100KB`, `1.5 MB` or `2gb` (base 1024).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the number or unit is not recognised.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn parse_size(field: &'static str, value: &str) -> ConfigResult<u64> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KB,
        "m" | "mb" | "mib" => MB,
        "g" | "gb" | "gib" => GB,
        "t" | "tb" | "tib" => TB,
        _ => {
            return Err(ConfigError::invalid_field(
                field,
                "unknown_unit",
                Some(value.to_string()),
            ));
        }
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| ConfigError::invalid_field(field, "overflow", Some(value.to_string())));
    }

    let fractional = number
        .parse::<f64>()
        .map_err(|_| ConfigError::invalid_field(field, "not_a_number", Some(value.to_string())))?;
    let bytes = (fractional * multiplier as f64).round();
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(ConfigError::invalid_field(
            field,
            "overflow",
            Some(value.to_string()),
        ));
    }
    Ok(bytes as u64)
}

/// Display adapter rendering a byte count as `1.91 MB`, `512 bytes`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize(pub u64);

impl fmt::Display for HumanSize {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.0;
        let (divisor, unit) = match size {
            s if s >= TB => (TB, "TB"),
            s if s >= GB => (GB, "GB"),
            s if s >= MB => (MB, "MB"),
            s if s >= KB => (KB, "KB"),
            _ => return write!(formatter, "{size} bytes"),
        };
        write!(formatter, "{:.2} {unit}", size as f64 / divisor as f64)
    }
}
