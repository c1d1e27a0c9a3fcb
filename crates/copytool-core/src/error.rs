//! Error types for the collaborator seams.

use std::error::Error;
use std::io;

use nix::errno::Errno;
use thiserror::Error;

fn io_errno(source: &io::Error) -> Errno {
    source.raw_os_error().map_or(Errno::EIO, Errno::from_raw)
}

fn code_errno(code: i32) -> Errno {
    match code.checked_abs() {
        Some(0) | None => Errno::EIO,
        Some(raw) => Errno::from_raw(raw),
    }
}

/// Failure reported by the object store.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend did not answer in time.
    #[error("object store operation timed out")]
    Timeout {
        /// Operation identifier.
        operation: &'static str,
        /// Object the operation targeted.
        object_id: String,
    },
    /// The object does not exist.
    #[error("object not found")]
    NotFound {
        /// Operation identifier.
        operation: &'static str,
        /// Missing object.
        object_id: String,
    },
    /// An object with the same identifier already exists.
    #[error("object already exists")]
    AlreadyExists {
        /// Conflicting object.
        object_id: String,
    },
    /// The request itself was invalid.
    #[error("invalid object store request")]
    InvalidRequest {
        /// Operation identifier.
        operation: &'static str,
        /// Human-readable reason.
        reason: &'static str,
    },
    /// The backend returned a raw failure code.
    #[error("object store rejected the operation")]
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// Signed result code returned by the backend.
        code: i32,
    },
    /// Local I/O while moving data failed.
    #[error("object store i/o failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Any other backend failure.
    #[error("object store operation failed")]
    OperationFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl BackendError {
    /// Whether the failure is timeout-class and the coordinator may resubmit.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.errno(), Errno::ETIMEDOUT)
    }

    /// POSIX code reported for this failure.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            Self::Timeout { .. } => Errno::ETIMEDOUT,
            Self::NotFound { .. } => Errno::ENOENT,
            Self::AlreadyExists { .. } => Errno::EEXIST,
            Self::InvalidRequest { .. } => Errno::EINVAL,
            Self::Rejected { code, .. } => code_errno(*code),
            Self::Io { source, .. } => io_errno(source),
            Self::OperationFailed { .. } => Errno::EIO,
        }
    }
}

/// Convenience alias for object store results.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported by the HSM coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The coordinator did not answer in time.
    #[error("coordinator operation timed out")]
    Timeout {
        /// Operation identifier.
        operation: &'static str,
    },
    /// The request was canceled while in flight.
    #[error("coordinator operation canceled")]
    Canceled {
        /// Operation identifier.
        operation: &'static str,
    },
    /// The coordinator is shutting the service down.
    #[error("coordinator is shutting down")]
    Shutdown,
    /// A message did not follow the expected framing.
    #[error("coordinator protocol violation")]
    Protocol {
        /// Operation identifier.
        operation: &'static str,
        /// Human-readable reason.
        reason: String,
    },
    /// The targeted file or lease does not exist.
    #[error("coordinator target not found")]
    NotFound {
        /// Operation identifier.
        operation: &'static str,
        /// Missing target.
        target: String,
    },
    /// The requested extended attribute is not set.
    #[error("file attribute not set")]
    AttributeMissing {
        /// Attribute name.
        name: String,
    },
    /// The coordinator does not implement the operation.
    #[error("coordinator operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// The coordinator returned a raw failure code.
    #[error("coordinator rejected the operation")]
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// Signed result code returned by the coordinator.
        code: i32,
    },
    /// Local I/O on behalf of the coordinator failed.
    #[error("coordinator i/o failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
}

impl CoordinatorError {
    /// Whether the failure is timeout-class.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.errno(), Errno::ETIMEDOUT)
    }

    /// POSIX code reported for this failure.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            Self::Timeout { .. } => Errno::ETIMEDOUT,
            Self::Canceled { .. } => Errno::ECANCELED,
            Self::Shutdown => Errno::ESHUTDOWN,
            Self::Protocol { .. } => Errno::EPROTO,
            Self::NotFound { .. } => Errno::ENOENT,
            Self::AttributeMissing { .. } => Errno::ENODATA,
            Self::Unsupported { .. } => Errno::EOPNOTSUPP,
            Self::Rejected { code, .. } => code_errno(*code),
            Self::Io { source, .. } => io_errno(source),
        }
    }
}

/// Convenience alias for coordinator results.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
