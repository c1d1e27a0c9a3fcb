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

//! Collaborator-agnostic HSM copytool interfaces and DTOs.
//!
//! Layout: `model/` (action items, batches, transfer requests), `hints.rs`
//! (user payload mini-language), `layout.rs` (placement descriptor codec),
//! `hexrecord.rs` (legacy fixed-width metadata codec), `objid.rs` (object
//! identifier resolution), `service/` (coordinator and object store traits).

pub mod error;
pub mod hexrecord;
pub mod hints;
pub mod layout;
pub mod model;
pub mod objid;
pub mod service;

pub use error::{BackendError, BackendResult, CoordinatorError, CoordinatorResult};
pub use hexrecord::HexRecordError;
pub use hints::{Hint, HintError, HintTable};
pub use layout::{
    LAYOUT_EOF, LayoutComponent, LayoutDescriptor, LayoutError, LayoutExtent, StripePattern,
};
pub use model::{
    ActionBatch, ActionItem, ActionKind, AttributeMap, EXTENT_UNBOUNDED, Extent, FileId,
    FileIdError, LeaseHandle, LeaseRequest, ObjectId, OpenFlags, Received, StorageFamily,
    TransferOp, TransferRequest, UnknownFamily,
};
pub use objid::{DEFAULT_FUID_XATTR, HINT_HSM_FUID, IdOverrides, ObjectIdResolver};
pub use service::{Coordinator, DataHandle, ObjectStore};
