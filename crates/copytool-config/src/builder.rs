//! Validating builder producing the shared [`Options`] value.

use std::path::PathBuf;
use std::sync::Arc;

use copytool_core::{DEFAULT_FUID_XATTR, StorageFamily};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ArchiveIdUpdate, ArchiveIds, Options, Verbosity};

/// Longest extended attribute name the kernel accepts.
const XATTR_NAME_MAX: usize = 255;

/// Accumulates raw option values and validates them once in [`OptionsBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    daemonize: bool,
    dry_run: bool,
    abort_on_error: bool,
    verbose: u8,
    quiet: u8,
    archive_ids: Vec<String>,
    event_fifo: Option<PathBuf>,
    mount: Option<PathBuf>,
    default_family: Option<String>,
    restore_layout: bool,
    pid_file: Option<PathBuf>,
    fuid_xattr: Option<String>,
}

impl OptionsBuilder {
    /// Empty builder with every flag off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detach before starting.
    #[must_use]
    pub const fn daemonize(mut self, enabled: bool) -> Self {
        self.daemonize = enabled;
        self
    }

    /// Skip data movement.
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Stop after the first major error.
    #[must_use]
    pub const fn abort_on_error(mut self, enabled: bool) -> Self {
        self.abort_on_error = enabled;
        self
    }

    /// Number of `-v` and `-q` flags given.
    #[must_use]
    pub const fn verbosity_flags(mut self, verbose: u8, quiet: u8) -> Self {
        self.verbose = verbose;
        self.quiet = quiet;
        self
    }

    /// Raw archive id arguments in command-line order.
    #[must_use]
    pub fn archive_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.archive_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Event sink path.
    #[must_use]
    pub fn event_fifo(mut self, path: Option<PathBuf>) -> Self {
        self.event_fifo = path;
        self
    }

    /// Filesystem mount point.
    #[must_use]
    pub fn mount(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount = Some(path.into());
        self
    }

    /// Raw default family name.
    #[must_use]
    pub fn default_family(mut self, family: Option<String>) -> Self {
        self.default_family = family;
        self
    }

    /// Restore original placement metadata.
    #[must_use]
    pub const fn restore_layout(mut self, enabled: bool) -> Self {
        self.restore_layout = enabled;
        self
    }

    /// PID file path.
    #[must_use]
    pub fn pid_file(mut self, path: Option<PathBuf>) -> Self {
        self.pid_file = path;
        self
    }

    /// Override of the object identifier attribute name.
    #[must_use]
    pub fn fuid_xattr(mut self, name: Option<String>) -> Self {
        self.fuid_xattr = name;
        self
    }

    /// Validate and freeze the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an archive id is not a number, the family is
    /// unknown, the mount point is missing, or the attribute name is unusable.
    pub fn build(self) -> ConfigResult<Arc<Options>> {
        let mut archive_ids = ArchiveIds::default();
        for raw in &self.archive_ids {
            let id = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidField {
                    field: "archive",
                    value: Some(raw.clone()),
                    reason: "must be a non-negative integer",
                })?;
            match archive_ids.push(id) {
                ArchiveIdUpdate::AcceptAll => {
                    warn!("archive id 0 given, any backend will be served");
                }
                ArchiveIdUpdate::Duplicate => {
                    debug!(archive_id = id, "skipping duplicate archive id");
                }
                ArchiveIdUpdate::Added | ArchiveIdUpdate::Ignored => {}
            }
        }

        let default_family = self
            .default_family
            .map(|name| {
                name.parse::<StorageFamily>()
                    .map_err(|err| ConfigError::InvalidField {
                        field: "default_family",
                        value: Some(err.value),
                        reason: "expected one of disk, tape, dir, rados_pool",
                    })
            })
            .transpose()?;

        let mount = self
            .mount
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(ConfigError::MissingField {
                field: "mount_point",
            })?;

        let fuid_xattr = self
            .fuid_xattr
            .unwrap_or_else(|| DEFAULT_FUID_XATTR.to_string());
        if fuid_xattr.is_empty() || fuid_xattr.len() > XATTR_NAME_MAX || fuid_xattr.contains('\0')
        {
            return Err(ConfigError::InvalidField {
                field: "fuid_xattr",
                value: Some(fuid_xattr),
                reason: "must be a non-empty attribute name of at most 255 bytes",
            });
        }

        Ok(Arc::new(Options {
            daemonize: self.daemonize,
            dry_run: self.dry_run,
            abort_on_error: self.abort_on_error,
            verbosity: Verbosity::from_flags(self.verbose, self.quiet),
            archive_ids,
            event_fifo: self.event_fifo,
            mount,
            default_family,
            restore_layout: self.restore_layout,
            pid_file: self.pid_file,
            fuid_xattr,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_daemon() -> anyhow::Result<()> {
        let options = OptionsBuilder::new().mount("/mnt/lustre").build()?;
        assert_eq!(options.verbosity, Verbosity::INFO);
        assert!(options.archive_ids.accepts_all());
        assert_eq!(options.fuid_xattr, "trusted.hsm_fuid");
        assert_eq!(options.default_family, None);
        assert!(options.traces_paths());
        Ok(())
    }

    #[test]
    fn archive_ids_follow_accept_any_rules() -> anyhow::Result<()> {
        let options = OptionsBuilder::new()
            .mount("/mnt/lustre")
            .archive_ids(["1", "2", "1"])
            .build()?;
        assert_eq!(options.archive_ids.as_slice(), &[1, 2]);

        let options = OptionsBuilder::new()
            .mount("/mnt/lustre")
            .archive_ids(["3", "0", "5"])
            .build()?;
        assert!(options.archive_ids.accepts_all());
        assert!(options.archive_ids.as_slice().is_empty());
        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        let err = OptionsBuilder::new()
            .mount("/mnt/lustre")
            .archive_ids(["one"])
            .build();
        assert!(matches!(
            err,
            Err(ConfigError::InvalidField {
                field: "archive",
                ..
            })
        ));

        let err = OptionsBuilder::new()
            .mount("/mnt/lustre")
            .default_family(Some("floppy".into()))
            .build();
        assert!(matches!(
            err,
            Err(ConfigError::InvalidField {
                field: "default_family",
                ..
            })
        ));

        assert_eq!(
            OptionsBuilder::new().build(),
            Err(ConfigError::MissingField {
                field: "mount_point"
            })
        );

        let err = OptionsBuilder::new()
            .mount("/mnt/lustre")
            .fuid_xattr(Some(String::new()))
            .build();
        assert!(matches!(
            err,
            Err(ConfigError::InvalidField {
                field: "fuid_xattr",
                ..
            })
        ));
    }

    #[test]
    fn family_and_flags_are_carried() -> anyhow::Result<()> {
        let options = OptionsBuilder::new()
            .mount("/mnt/lustre")
            .default_family(Some("tape".into()))
            .dry_run(true)
            .abort_on_error(true)
            .restore_layout(true)
            .verbosity_flags(0, 3)
            .build()?;
        assert_eq!(options.default_family, Some(StorageFamily::Tape));
        assert!(options.dry_run && options.abort_on_error && options.restore_layout);
        assert_eq!(options.verbosity.level(), 2);
        assert!(options.traces_paths());
        Ok(())
    }
}
