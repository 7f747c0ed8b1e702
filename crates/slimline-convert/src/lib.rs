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

//! Conversion pipeline for uploaded media.
//!
//! Layout: `upload.rs` (staging and planning), `processor.rs` (one conversion session),
//! `limits.rs` (slot pools), `command.rs` (process runner), `download.rs` (JPEG on
//! download), `error.rs`.

pub mod command;
pub mod download;
pub mod error;
pub mod limits;
pub mod processor;
pub mod upload;

pub use download::{DownloadFormat, JpegConverter};
pub use error::{ConvertError, ConvertResult};
pub use limits::{ConversionLimits, ConversionPermit, IMAGE_EXTENSIONS, MediaClass};
pub use processor::{ProcessedFile, TaskProcessor};
pub use upload::{PassthroughReason, StagedUpload, UploadPlan, plan_upload, valid_extension};
