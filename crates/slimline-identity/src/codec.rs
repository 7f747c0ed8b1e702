//! Content-encoding support for rewritten response bodies.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::{IdentityError, IdentityResult};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;

/// Single content coding a response body may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    /// No transformation.
    Identity,
    /// `gzip` / `x-gzip`.
    Gzip,
    /// `deflate` (zlib framing).
    Deflate,
    /// `br`.
    Brotli,
}

impl ContentCoding {
    /// Interpret a `Content-Encoding` header value.
    ///
    /// Returns `None` for codings that cannot be rewritten, including stacked codings.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Some(Self::Identity);
        };
        match value.to_ascii_lowercase().as_str() {
            "identity" => Some(Self::Identity),
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            "br" => Some(Self::Brotli),
            _ => None,
        }
    }

    /// Token used in headers and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
        }
    }

    /// Decode `body` into plain bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Codec`] when the payload is not valid for this coding.
    pub fn decode(self, body: &[u8]) -> IdentityResult<Vec<u8>> {
        let mut out = Vec::with_capacity(body.len() * 2);
        let result = match self {
            Self::Identity => {
                out.extend_from_slice(body);
                Ok(0)
            }
            Self::Gzip => GzDecoder::new(body).read_to_end(&mut out),
            Self::Deflate => ZlibDecoder::new(body).read_to_end(&mut out),
            Self::Brotli => brotli::Decompressor::new(body, BROTLI_BUFFER).read_to_end(&mut out),
        };
        result.map_err(|source| self.error("decode", source))?;
        Ok(out)
    }

    /// Encode plain bytes with this coding.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Codec`] when the encoder fails.
    pub fn encode(self, body: &[u8]) -> IdentityResult<Vec<u8>> {
        let encoded = match self {
            Self::Identity => Ok(body.to_vec()),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).and_then(|()| encoder.finish())
            }
            Self::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).and_then(|()| encoder.finish())
            }
            Self::Brotli => {
                let mut encoder = brotli::CompressorWriter::new(
                    Vec::new(),
                    BROTLI_BUFFER,
                    BROTLI_QUALITY,
                    BROTLI_WINDOW,
                );
                encoder
                    .write_all(body)
                    .and_then(|()| encoder.flush())
                    .map(|()| encoder.into_inner())
            }
        };
        encoded.map_err(|source| self.error("encode", source))
    }

    fn error(self, operation: &'static str, source: std::io::Error) -> IdentityError {
        IdentityError::Codec {
            operation,
            coding: self.as_str(),
            source,
        }
    }
}
