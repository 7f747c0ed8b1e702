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

//! Configuration primitives shared across slimline services.
//!
//! Layout: `task.rs` (task registry), `template.rs` (command templates),
//! `model.rs` (runtime settings), `size.rs` (byte sizes), `error.rs`.

pub mod error;
pub mod model;
pub mod size;
pub mod task;
pub mod template;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    DEFAULT_CHECKSUMS_FILE, DEFAULT_LISTEN, DEFAULT_MAX_IMAGE_JOBS, DEFAULT_MAX_VIDEO_JOBS,
    DEFAULT_TASKS_FILE, DownloadConversion, ProxySettings,
};
pub use size::{HumanSize, parse_size};
pub use task::{Task, TaskRegistry};
pub use template::{CommandTemplate, TemplateValues, TemplateVar};
