#![forbid(unsafe_code)]
#![warn(
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Logging setup shared by the copytool binary and its tests.
//!
//! Layout: `init.rs` (subscriber installation and verbosity mapping),
//! `context.rs` (process-wide span guard), `error.rs` (`TelemetryError`).

pub mod context;
pub mod error;
pub mod init;

pub use context::{GlobalContextGuard, action_span};
pub use error::{Result, TelemetryError};
pub use init::{
    DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging, level_for_verbosity,
};
