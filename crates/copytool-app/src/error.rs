//! # Design
//!
//! - Centralize process-level errors for startup and the serving loop.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Every variant maps onto the positive errno used as the exit status.

use std::io;
use std::path::PathBuf;

use copytool_config::ConfigError;
use copytool_core::CoordinatorError;
use copytool_engine::DispatchError;
use copytool_local::LocalError;
use copytool_telemetry::TelemetryError;
use nix::errno::Errno;
use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Options failed validation.
    #[error("invalid options")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ConfigError,
    },
    /// Logging could not be installed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: TelemetryError,
    },
    /// A local collaborator could not be opened.
    #[error("local collaborator setup failed")]
    Local {
        /// Operation identifier.
        operation: &'static str,
        /// Source collaborator error.
        source: LocalError,
    },
    /// The coordinator refused a lifecycle call.
    #[error("coordinator operation failed")]
    Coordinator {
        /// Operation identifier.
        operation: &'static str,
        /// Source coordinator error.
        source: CoordinatorError,
    },
    /// The dispatch loop stopped on an error.
    #[error("dispatch loop failed")]
    Dispatch {
        /// Source dispatch error.
        source: DispatchError,
    },
    /// Detaching from the terminal failed.
    #[error("cannot daemonize")]
    Daemonize {
        /// Failure reported by the system.
        source: Errno,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
}

fn io_errno(source: &io::Error) -> Errno {
    source.raw_os_error().map_or(Errno::EIO, Errno::from_raw)
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn local(operation: &'static str, source: LocalError) -> Self {
        Self::Local { operation, source }
    }

    pub(crate) const fn coordinator(operation: &'static str, source: CoordinatorError) -> Self {
        Self::Coordinator { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: Option<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }

    /// POSIX code reported for this failure.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            Self::Config { source, .. } => source.errno(),
            Self::Telemetry { .. } => Errno::EINVAL,
            Self::Local { source, .. } => match source {
                LocalError::Io { source, .. } => io_errno(source),
                LocalError::InvalidMount { .. } => Errno::ENOTDIR,
                LocalError::Metadata { .. } | LocalError::Feed { .. } => Errno::EPROTO,
            },
            Self::Coordinator { source, .. } => source.errno(),
            Self::Dispatch { source } => source.errno(),
            Self::Daemonize { source } => *source,
            Self::Io { source, .. } => io_errno(source),
        }
    }

    /// Process exit status for this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.errno() as i32
    }
}
