//! On-demand JPEG conversion of JXL and AVIF originals for download.
//!
//! # Design
//! - The stored file's leading bytes must carry the expected signature before any
//!   decoder runs; a mismatch is an error and the caller falls back to passthrough.
//! - Decoders are plain programs (`djxl`, `avifdec`) run without a shell.

use std::path::{Path, PathBuf};

use slimline_config::DownloadConversion;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::command;
use crate::error::{ConvertError, ConvertResult};

const SIGNATURE_LEN: usize = 12;
const JXL_SIGNATURE: [u8; SIGNATURE_LEN] = [
    0x00, 0x00, 0x00, 0x0C, 0x4A, 0x58, 0x4C, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];
const AVIF_BRAND: &[u8; 8] = b"ftypavif";

/// Formats that can be converted to JPEG on download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    /// JPEG XL in the ISO BMFF container.
    Jxl,
    /// AVIF.
    Avif,
}

impl DownloadFormat {
    /// Pick a format for `mime` if its conversion is enabled.
    #[must_use]
    pub fn from_mime(mime: &str, enabled: DownloadConversion) -> Option<Self> {
        match mime.trim() {
            "image/jxl" if enabled.jxl => Some(Self::Jxl),
            "image/avif" if enabled.avif => Some(Self::Avif),
            _ => None,
        }
    }

    /// Whether `header` (the first bytes of a file) carries this format's signature.
    #[must_use]
    pub fn matches_signature(self, header: &[u8]) -> bool {
        if header.len() < SIGNATURE_LEN {
            return false;
        }
        match self {
            Self::Jxl => header[..SIGNATURE_LEN] == JXL_SIGNATURE,
            Self::Avif => &header[4..SIGNATURE_LEN] == AVIF_BRAND,
        }
    }

    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jxl => "jxl",
            Self::Avif => "avif",
        }
    }
}

/// Runs the external decoders.
#[derive(Debug, Clone)]
pub struct JpegConverter {
    djxl: PathBuf,
    avifdec: PathBuf,
}

impl Default for JpegConverter {
    fn default() -> Self {
        Self {
            djxl: PathBuf::from("djxl"),
            avifdec: PathBuf::from("avifdec"),
        }
    }
}

impl JpegConverter {
    /// Use explicit decoder programs.
    #[must_use]
    pub fn with_programs(djxl: impl Into<PathBuf>, avifdec: impl Into<PathBuf>) -> Self {
        Self {
            djxl: djxl.into(),
            avifdec: avifdec.into(),
        }
    }

    /// Check the signature of `input` and decode it to a JPEG at `output`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::InvalidInput`] when the signature does not match, or the
    /// decoder's spawn or exit error.
    pub async fn to_jpeg(
        &self,
        format: DownloadFormat,
        input: &Path,
        output: &Path,
    ) -> ConvertResult<()> {
        let header = read_header(input).await?;
        if !format.matches_signature(&header) {
            return Err(ConvertError::invalid_input(
                "signature",
                "mismatch",
                Some(format.as_str().to_string()),
            ));
        }

        let mut decoder = match format {
            DownloadFormat::Jxl => Command::new(&self.djxl),
            DownloadFormat::Avif => {
                let mut command = Command::new(&self.avifdec);
                command.args(["-q", "95"]);
                command
            }
        };
        decoder.arg(input).arg(output);
        let label = format!("{} {}", format.as_str(), input.display());
        command::run(decoder, &label).await?;
        Ok(())
    }
}

async fn read_header(path: &Path) -> ConvertResult<Vec<u8>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|err| ConvertError::io("download.open", path, err))?;
    let mut header = Vec::with_capacity(SIGNATURE_LEN);
    (&mut file)
        .take(SIGNATURE_LEN as u64)
        .read_to_end(&mut header)
        .await
        .map_err(|err| ConvertError::io("download.read", path, err))?;
    Ok(header)
}
