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

//! Local collaborators for running the copytool without a parallel filesystem.
//!
//! Layout: `coordinator.rs` (directory-backed coordinator fed from a batch
//! file), `store.rs` (directory-backed object store), `file.rs` (data
//! handle over a local file), `xattr.rs` (extended attribute calls),
//! `error.rs`.

pub mod coordinator;
pub mod error;
pub mod file;
pub mod store;
mod xattr;

pub use coordinator::{LeaseReport, LocalCoordinator};
pub use error::{LocalError, LocalResult};
pub use file::LocalFile;
pub use store::{LocalObjectStore, ObjectMeta};
