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

//! Action item processing engine for the HSM copytool.
//!
//! Layout: `transfer.rs` (object store request building), `machine.rs`
//! (per-item lease/execute/finalize state machine), `worker.rs` (detached
//! per-item tasks), `dispatch.rs` (batch validation and control loop),
//! `counters.rs` (shared major/minor error counts), `error.rs`.

pub mod counters;
pub mod dispatch;
pub mod error;
pub mod machine;
pub mod transfer;
pub mod worker;

pub use counters::{CounterSnapshot, ErrorCounters};
pub use dispatch::{DispatchReport, Dispatcher};
pub use error::{ActionError, ActionResult, DispatchError, TransferError};
pub use machine::{ActionMachine, ActionState, ItemOutcome};
pub use transfer::TransferAdapter;
pub use worker::spawn_item;
