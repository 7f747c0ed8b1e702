//! Length-preserving hash substitution in response bodies.
//!
//! # Design
//!
//! - Every known hash is [`ContentHash::WIDTH`] bytes and ends in `=`, so the scanner only
//!   checks windows whose last byte is `=`. Each check costs one map lookup, independent
//!   of how many hashes the store knows; neighbouring bytes do not matter.
//! - Matches never overlap: after a substitution the scan resumes past the match.
//! - A substitution is only applied when the replacement has the same length as the
//!   match. Store values are fixed width, so a mismatch is logged as an invariant
//!   violation and the match is left untouched.
//! - A body with nothing to substitute is returned as the original `Bytes`, unencoded
//!   and unchanged.

use bytes::Bytes;
use tracing::{error, trace};

use crate::codec::ContentCoding;
use crate::error::IdentityResult;
use crate::hash::{ContentHash, is_hash_shaped};
use crate::store::HashStore;

/// Result of rewriting one body.
#[derive(Debug, Clone)]
pub struct Rewrite {
    /// Body to forward, encoded with the original coding.
    pub body: Bytes,
    /// Number of hashes substituted.
    pub replaced: usize,
}

/// Replace every hash `lookup` knows with its counterpart, in place.
///
/// Returns the number of substitutions. The slice length never changes.
pub fn substitute_in_place<F>(body: &mut [u8], mut lookup: F) -> usize
where
    F: FnMut(&str) -> Option<ContentHash>,
{
    let width = ContentHash::WIDTH;
    let mut replaced = 0;
    let mut start = 0;
    while start + width <= body.len() {
        let end = start + width;
        let window = &body[start..end];
        if window[width - 1] != b'=' || !is_hash_shaped(window) {
            start += 1;
            continue;
        }

        let Some(counterpart) = std::str::from_utf8(window).ok().and_then(&mut lookup) else {
            start += 1;
            continue;
        };
        let counterpart = counterpart.as_str().as_bytes();
        if counterpart.len() != width {
            error!(
                expected = width,
                found = counterpart.len(),
                "hash width mismatch; substitution skipped"
            );
            start += 1;
            continue;
        }
        body[start..end].copy_from_slice(counterpart);
        replaced += 1;
        start = end;
    }
    replaced
}

/// Decode `body`, substitute every known original hash with its replacement, and
/// re-encode.
///
/// # Errors
///
/// Returns an error when the body cannot be decoded or re-encoded with `coding`.
pub fn rewrite_body(
    store: &HashStore,
    coding: ContentCoding,
    body: Bytes,
) -> IdentityResult<Rewrite> {
    if store.is_empty() {
        return Ok(Rewrite { body, replaced: 0 });
    }

    let mut plain = coding.decode(&body)?;
    let replaced = {
        let maps = store.maps();
        substitute_in_place(&mut plain, |candidate| {
            maps.replacement_for(candidate).cloned()
        })
    };
    if replaced == 0 {
        return Ok(Rewrite { body, replaced });
    }

    trace!(replaced, coding = coding.as_str(), "rewrote response hashes");
    let body = match coding {
        ContentCoding::Identity => Bytes::from(plain),
        other => Bytes::from(other.encode(&plain)?),
    };
    Ok(Rewrite { body, replaced })
}
