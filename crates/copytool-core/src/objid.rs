//! Object identifier resolution.
//!
//! # Design
//! - Default identifiers are `"<fs_name>:<fid>"`.
//! - A caller-supplied alternate identifier always wins.
//! - Deletes honour an `hsm_fuid` hint; the last non-empty occurrence wins.
//! - Empty alternates and empty hint values override nothing.
//! - Restores recover the alternate identifier from the file's extended attribute
//!   through the coordinator and pass it in as the alternate.

use crate::hints::HintTable;
use crate::model::{FileId, ObjectId, TransferOp};

/// Hint key overriding the object identifier of a delete.
pub const HINT_HSM_FUID: &str = "hsm_fuid";

/// Extended attribute the object identifier is recorded under by default.
pub const DEFAULT_FUID_XATTR: &str = "trusted.hsm_fuid";

/// Optional inputs that may replace the computed identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdOverrides<'a> {
    /// Identifier recovered from the file or supplied by the caller.
    pub alternate: Option<&'a str>,
    /// Hints of the action item.
    pub hints: Option<&'a HintTable>,
}

impl<'a> IdOverrides<'a> {
    /// Overrides carrying only an alternate identifier.
    #[must_use]
    pub const fn alternate(alternate: Option<&'a str>) -> Self {
        Self {
            alternate,
            hints: None,
        }
    }

    /// Overrides carrying only the item's hints.
    #[must_use]
    pub const fn hints(hints: &'a HintTable) -> Self {
        Self {
            alternate: None,
            hints: Some(hints),
        }
    }
}

/// Derives backend object identifiers for file identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectIdResolver {
    fs_name: String,
}

impl ObjectIdResolver {
    /// Resolver for the named filesystem.
    #[must_use]
    pub fn new(fs_name: impl Into<String>) -> Self {
        Self {
            fs_name: fs_name.into(),
        }
    }

    /// Filesystem name prefixed to default identifiers.
    #[must_use]
    pub fn fs_name(&self) -> &str {
        &self.fs_name
    }

    /// Identifier used when nothing overrides it.
    #[must_use]
    pub fn default_id(&self, fid: FileId) -> ObjectId {
        ObjectId::from(format!("{}:{fid}", self.fs_name))
    }

    /// Resolve the identifier for `op` on `fid`.
    #[must_use]
    pub fn resolve(&self, op: TransferOp, fid: FileId, overrides: IdOverrides<'_>) -> ObjectId {
        if let Some(alternate) = overrides.alternate.filter(|value| !value.is_empty()) {
            return ObjectId::from(alternate);
        }
        if op == TransferOp::Delete
            && let Some(fuid) = overrides.hints.and_then(|hints| {
                hints
                    .all(HINT_HSM_FUID)
                    .filter(|value| !value.is_empty())
                    .last()
            })
        {
            return ObjectId::from(fuid);
        }
        self.default_id(fid)
    }

    /// Decode the raw value of the alternate identifier attribute.
    ///
    /// Trailing NULs are dropped; an empty or non UTF-8 value yields `None`.
    #[must_use]
    pub fn alternate_from_attr(raw: &[u8]) -> Option<String> {
        let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
        std::str::from_utf8(&raw[..end])
            .ok()
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}
