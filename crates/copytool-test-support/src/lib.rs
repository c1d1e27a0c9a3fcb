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
#![allow(clippy::missing_panics_doc)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (items, batches, options), mocks.rs (scripted coordinator,
//! recording object store, in-memory files).

pub mod fixtures;
pub mod mocks;
