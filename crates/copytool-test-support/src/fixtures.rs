//! Builders for items, batches and options used across test suites.

use std::sync::Arc;

use copytool_config::{Options, OptionsBuilder};
use copytool_core::{ActionBatch, ActionItem, ActionKind, Extent, FileId};

/// Filesystem name used by the fixtures.
pub const FS_NAME: &str = "lustre";

/// Deterministic file identity for test item `n`.
#[must_use]
pub const fn fid(n: u32) -> FileId {
    FileId::new(0x2_0000_0401, n, 0)
}

/// Action item of `kind` on file `n`, with `cookie` equal to `n`.
#[must_use]
pub fn item(kind: ActionKind, n: u32) -> ActionItem {
    ActionItem {
        kind,
        fid: fid(n),
        dfid: fid(n),
        extent: Extent::whole_file(),
        cookie: u64::from(n),
        data: Vec::new(),
    }
}

/// Action item carrying a hint payload.
#[must_use]
pub fn item_with_hints(kind: ActionKind, n: u32, hints: &str) -> ActionItem {
    ActionItem {
        data: hints.as_bytes().to_vec(),
        ..item(kind, n)
    }
}

/// Batch for [`FS_NAME`] with a computed byte bound.
#[must_use]
pub fn batch(items: Vec<ActionItem>) -> ActionBatch {
    ActionBatch {
        fs_name: FS_NAME.to_string(),
        archive_id: 1,
        flags: 0,
        declared_len: None,
        items,
    }
}

/// Builder preloaded with a mount point.
#[must_use]
pub fn options_builder() -> OptionsBuilder {
    OptionsBuilder::new().mount(format!("/mnt/{FS_NAME}"))
}

/// Default options.
///
/// # Panics
///
/// Panics if the fixed fixture options fail validation.
#[must_use]
pub fn options() -> Arc<Options> {
    options_builder()
        .build()
        .expect("fixture options are valid")
}
