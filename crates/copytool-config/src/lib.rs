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
#![allow(clippy::module_name_repetitions)]

//! Immutable process options for the copytool.
//!
//! Layout: `model.rs` (`Options`, archive id set, verbosity), `builder.rs`
//! (validating `OptionsBuilder`), `error.rs` (`ConfigError`).

pub mod builder;
pub mod error;
pub mod model;

pub use builder::OptionsBuilder;
pub use error::{ConfigError, ConfigResult};
pub use model::{ArchiveIdUpdate, ArchiveIds, Options, Verbosity};
