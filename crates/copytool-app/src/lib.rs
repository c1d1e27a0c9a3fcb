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

//! Copytool daemon wiring.
//!
//! Layout: `cli.rs` (flags), `bootstrap.rs` (process lifecycle and serving),
//! `pidfile.rs`, `signals.rs` (termination handling), `error.rs` (`AppError`).

pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod pidfile;
mod signals;

pub use bootstrap::{Collaborators, RunSummary, run, serve};
pub use cli::Cli;
pub use error::{AppError, AppResult};
