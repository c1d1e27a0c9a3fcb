//! Typed option values shared read-only by every component.

use std::path::PathBuf;

use copytool_core::StorageFamily;
use serde::Serialize;

/// Message verbosity on the coordinator's 0..=7 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Verbosity(u8);

impl Verbosity {
    /// Highest supported level.
    pub const MAX: u8 = 7;
    /// Level of informational messages; the default.
    pub const INFO: Self = Self(5);

    /// Clamp a raw level into range.
    #[must_use]
    pub fn new(level: i32) -> Self {
        let clamped = level.clamp(0, i32::from(Self::MAX));
        Self(u8::try_from(clamped).unwrap_or(Self::MAX))
    }

    /// Apply repeated `-v` and `-q` flags to the default level.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: u8) -> Self {
        Self::new(i32::from(Self::INFO.0) + i32::from(verbose) - i32::from(quiet))
    }

    /// Raw level.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }

    /// Whether informational messages are enabled.
    #[must_use]
    pub const fn is_info(self) -> bool {
        self.0 >= Self::INFO.0
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Self::INFO
    }
}

/// Result of offering an archive id to [`ArchiveIds::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveIdUpdate {
    /// The id was added to the explicit list.
    Added,
    /// The id was already listed.
    Duplicate,
    /// Zero was given; every backend is now accepted.
    AcceptAll,
    /// Every backend was already accepted; the id was ignored.
    Ignored,
}

/// Set of archive backends the copytool serves.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ArchiveIds {
    ids: Vec<u32>,
    accept_all: bool,
}

impl ArchiveIds {
    /// Offer one id; `0` selects every backend and clears the explicit list.
    pub fn push(&mut self, id: u32) -> ArchiveIdUpdate {
        if self.accept_all {
            return ArchiveIdUpdate::Ignored;
        }
        if id == 0 {
            self.ids.clear();
            self.accept_all = true;
            return ArchiveIdUpdate::AcceptAll;
        }
        if self.ids.contains(&id) {
            return ArchiveIdUpdate::Duplicate;
        }
        self.ids.push(id);
        ArchiveIdUpdate::Added
    }

    /// Whether every backend is accepted.
    #[must_use]
    pub fn accepts_all(&self) -> bool {
        self.accept_all || self.ids.is_empty()
    }

    /// Whether a batch routed to `id` is served.
    #[must_use]
    pub fn accepts(&self, id: u32) -> bool {
        self.accepts_all() || self.ids.contains(&id)
    }

    /// Explicit ids in the order given; empty when every backend is accepted.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.ids
    }
}

/// Process-wide options, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Options {
    /// Detach from the terminal before starting.
    pub daemonize: bool,
    /// Log actions without moving data.
    pub dry_run: bool,
    /// Stop receiving batches once a major error was counted.
    pub abort_on_error: bool,
    /// Message verbosity.
    pub verbosity: Verbosity,
    /// Accepted archive backends.
    pub archive_ids: ArchiveIds,
    /// External event sink.
    pub event_fifo: Option<PathBuf>,
    /// Filesystem mount point.
    pub mount: PathBuf,
    /// Placement family for archives; `None` lets the backend decide.
    pub default_family: Option<StorageFamily>,
    /// Restore original placement metadata on restore.
    pub restore_layout: bool,
    /// File the daemon pid is written to.
    pub pid_file: Option<PathBuf>,
    /// Extended attribute holding the object identifier of an archived file.
    pub fuid_xattr: String,
}

impl Options {
    /// Whether per-item path tracing is enabled.
    #[must_use]
    pub const fn traces_paths(&self) -> bool {
        self.verbosity.is_info() || self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_clamps_flag_adjustments() {
        assert_eq!(Verbosity::from_flags(0, 0).level(), 5);
        assert_eq!(Verbosity::from_flags(9, 0).level(), 7);
        assert_eq!(Verbosity::from_flags(0, 9).level(), 0);
        assert!(!Verbosity::from_flags(0, 1).is_info());
    }

    #[test]
    fn zero_archive_id_accepts_everything() {
        let mut ids = ArchiveIds::default();
        assert!(ids.accepts_all());
        assert_eq!(ids.push(2), ArchiveIdUpdate::Added);
        assert_eq!(ids.push(2), ArchiveIdUpdate::Duplicate);
        assert!(!ids.accepts(3));
        assert_eq!(ids.push(0), ArchiveIdUpdate::AcceptAll);
        assert!(ids.as_slice().is_empty());
        assert_eq!(ids.push(4), ArchiveIdUpdate::Ignored);
        assert!(ids.accepts(3));
    }
}
