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

//! HTTP edge of slimline.
//!
//! Layout: `server.rs` (router and listener), `dispatch.rs` (request classification),
//! `upload.rs` (job coordinator), `jobs.rs` (in-flight table), `multipart.rs` (form
//! re-encoding), `rewrite.rs` (hash substitution in reads), `download.rs` (JPEG on
//! download), `websocket.rs`, `upstream.rs` (client and relay), `telemetry.rs`,
//! `state.rs`, `error.rs`.

pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod multipart;
pub mod server;
pub mod state;
pub mod upstream;

mod download;
mod rewrite;
mod telemetry;
mod upload;
mod websocket;

#[cfg(test)]
mod test_support;

pub use dispatch::{Route, RewriteRoute, classify};
pub use error::{DUPLICATE_JOB_MESSAGE, ProxyError, ProxyResult, UPLOAD_FAILED_MESSAGE};
pub use jobs::{JobKey, JobLease, JobTable};
pub use server::ProxyServer;
pub use state::ProxyState;
pub use upstream::Upstream;
