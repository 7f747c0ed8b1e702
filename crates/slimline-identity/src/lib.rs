#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Content identity bookkeeping for substituted uploads.
//!
//! The store remembers which converted file stands in for which original upload; the
//! rewriter uses it to swap original hashes for their replacements in responses the client reads.

pub mod codec;
pub mod error;
pub mod hash;
pub mod rewrite;
pub mod store;

pub use codec::ContentCoding;
pub use error::{IdentityError, IdentityResult};
pub use hash::ContentHash;
pub use rewrite::{Rewrite, rewrite_body, substitute_in_place};
pub use store::{HashPair, HashStore};
