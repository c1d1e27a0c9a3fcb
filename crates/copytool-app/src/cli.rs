//! Command-line surface of the copytool daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use copytool_config::{ConfigResult, Options, OptionsBuilder, Verbosity};
use copytool_telemetry::LogFormat;

/// Relay HSM action items between a filesystem and an object store.
#[derive(Debug, Parser)]
#[command(name = "hsm-copytool", version)]
pub struct Cli {
    /// Detach from the terminal before serving.
    #[arg(long)]
    pub daemon: bool,
    /// Log actions without moving data.
    #[arg(long)]
    pub dry_run: bool,
    /// Stop serving after the first major error.
    #[arg(long, alias = "abort_on_error")]
    pub abort_on_error: bool,
    /// Archive backend to serve; repeatable, 0 serves every backend.
    #[arg(short = 'A', long = "archive", value_name = "ID")]
    pub archive: Vec<String>,
    /// Event sink (file or FIFO) receiving one JSON line per event.
    #[arg(short = 'f', long, alias = "event_fifo", value_name = "PATH")]
    pub event_fifo: Option<PathBuf>,
    /// Storage family for archived objects.
    #[arg(short = 'F', long, alias = "default_family", value_name = "FAMILY")]
    pub default_family: Option<String>,
    /// Lower verbosity; repeatable.
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,
    /// Raise verbosity; repeatable.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
    /// Extended attribute recording the object identifier.
    #[arg(short = 'x', long, value_name = "NAME")]
    pub fuid_xattr: Option<String>,
    /// Write the daemon pid to this file.
    #[arg(short = 'P', long, value_name = "PATH")]
    pub pid_file: Option<PathBuf>,
    /// Restore the stored placement of files.
    #[arg(short = 'l', long)]
    pub restore_lov: bool,
    /// Log output format.
    #[arg(long, value_name = "FORMAT", default_value = "pretty", value_parser = parse_log_format)]
    pub log_format: LogFormat,
    /// Directory holding the local object store.
    #[arg(long, env = "COPYTOOL_STORE_ROOT", value_name = "DIR")]
    pub store_root: PathBuf,
    /// Newline-delimited JSON feed of action batches.
    #[arg(long, env = "COPYTOOL_FEED", value_name = "PATH")]
    pub feed: PathBuf,
    /// Filesystem mount point.
    pub mount_point: PathBuf,
}

fn parse_log_format(value: &str) -> Result<LogFormat, copytool_telemetry::TelemetryError> {
    value.parse()
}

impl Cli {
    /// Verbosity selected by the `-v` and `-q` flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }

    /// Validate the flags into the shared process options.
    ///
    /// # Errors
    ///
    /// Returns a [`copytool_config::ConfigError`] when a value fails validation.
    pub fn options(&self) -> ConfigResult<Arc<Options>> {
        OptionsBuilder::new()
            .daemonize(self.daemon)
            .dry_run(self.dry_run)
            .abort_on_error(self.abort_on_error)
            .verbosity_flags(self.verbose, self.quiet)
            .archive_ids(self.archive.iter().cloned())
            .event_fifo(self.event_fifo.clone())
            .mount(&self.mount_point)
            .default_family(self.default_family.clone())
            .restore_layout(self.restore_lov)
            .pid_file(self.pid_file.clone())
            .fuid_xattr(self.fuid_xattr.clone())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytool_config::ConfigError;
    use copytool_core::StorageFamily;

    const REQUIRED: [&str; 5] = [
        "hsm-copytool",
        "--store-root",
        "/srv/objects",
        "--feed",
        "/run/copytool.feed",
    ];

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(REQUIRED.iter().chain(extra))
    }

    #[test]
    fn short_flags_and_underscore_aliases_are_accepted() -> anyhow::Result<()> {
        let cli = parse(&[
            "-A",
            "1",
            "--archive",
            "2",
            "-vv",
            "-q",
            "--abort_on_error",
            "--event_fifo",
            "/run/events",
            "--default_family",
            "tape",
            "-l",
            "-x",
            "user.fuid",
            "-P",
            "/run/copytool.pid",
            "/mnt/lustre",
        ])?;
        assert_eq!(cli.verbosity().level(), 6);

        let options = cli.options()?;
        assert_eq!(options.archive_ids.as_slice(), &[1, 2]);
        assert!(options.abort_on_error && options.restore_layout);
        assert!(!options.dry_run && !options.daemonize);
        assert_eq!(options.default_family, Some(StorageFamily::Tape));
        assert_eq!(options.fuid_xattr, "user.fuid");
        assert_eq!(options.event_fifo, Some(PathBuf::from("/run/events")));
        assert_eq!(options.pid_file, Some(PathBuf::from("/run/copytool.pid")));
        assert_eq!(options.mount, PathBuf::from("/mnt/lustre"));
        Ok(())
    }

    #[test]
    fn log_format_defaults_to_pretty() -> anyhow::Result<()> {
        let cli = parse(&["/mnt/lustre"])?;
        assert_eq!(cli.log_format, LogFormat::Pretty);
        let cli = parse(&["--log-format", "json", "/mnt/lustre"])?;
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(parse(&["--log-format", "xml", "/mnt/lustre"]).is_err());
        Ok(())
    }

    #[test]
    fn mount_point_is_required() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn invalid_values_surface_as_config_errors() -> anyhow::Result<()> {
        let cli = parse(&["-A", "tape", "/mnt/lustre"])?;
        assert!(matches!(
            cli.options(),
            Err(ConfigError::InvalidField {
                field: "archive",
                ..
            })
        ));
        let cli = parse(&["-F", "floppy", "/mnt/lustre"])?;
        assert!(matches!(
            cli.options(),
            Err(ConfigError::InvalidField {
                field: "default_family",
                ..
            })
        ));
        Ok(())
    }
}
