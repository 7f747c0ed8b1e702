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

//! slimline application bootstrap wiring.
//!
//! Layout: `cli.rs` (flags and environment), `bootstrap.rs` (startup sequence),
//! `error.rs`.

/// Startup sequence.
pub mod bootstrap;
/// Command-line and environment settings.
pub mod cli;
/// Application error type.
pub mod error;

pub use bootstrap::run_app;
pub use cli::Cli;
pub use error::{AppError, AppResult};
