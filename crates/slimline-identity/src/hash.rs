//! Fixed-width content hashes.
//!
//! # Design
//!
//! - A hash is the standard base64 encoding of a SHA-1 digest: always 28 ASCII bytes,
//!   the last being `=`. Every value held by the store has this width, which is what
//!   makes in-place substitution length preserving.

use std::borrow::Borrow;
use std::fmt;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{IdentityError, IdentityResult};

const READ_CHUNK: usize = 64 * 1024;

/// Base64 SHA-1 digest of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    /// Width in bytes of every content hash.
    pub const WIDTH: usize = 28;

    /// Validate `value` as a content hash.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidHash`] when the width, alphabet, or padding is wrong.
    pub fn parse(value: &str) -> IdentityResult<Self> {
        if value.len() != Self::WIDTH {
            return Err(IdentityError::invalid_hash("width", value));
        }
        if !value.ends_with('=') || !is_hash_shaped(value.as_bytes()) {
            return Err(IdentityError::invalid_hash("alphabet", value));
        }
        Ok(Self(value.to_string()))
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(Sha1::digest(bytes)))
    }

    /// Hash everything readable from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Io`] when reading fails.
    pub async fn of_reader<R>(reader: &mut R, path: &Path) -> IdentityResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut hasher = Sha1::new();
        let mut buffer = vec![0_u8; READ_CHUNK];
        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|err| IdentityError::io("hash.read", path, err))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(STANDARD.encode(hasher.finalize())))
    }

    /// Hash the file at `path` without loading it into memory.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Io`] when the file cannot be opened or read.
    pub async fn of_file(path: &Path) -> IdentityResult<Self> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|err| IdentityError::io("hash.open", path, err))?;
        Self::of_reader(&mut file, path).await
    }

    /// The encoded hash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl Borrow<str> for ContentHash {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Whether every byte belongs to the standard base64 alphabet (padding included).
pub(crate) fn is_hash_shaped(bytes: &[u8]) -> bool {
    bytes.iter().copied().all(is_base64_byte)
}

pub(crate) const fn is_base64_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'/' | b'=')
}
