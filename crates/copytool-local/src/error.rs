//! # Design
//!
//! - Constant messages; paths and operations travel in fields.
//! - Converted into the collaborator error types at the trait boundary.

use std::io;
use std::path::PathBuf;

use copytool_core::{BackendError, CoordinatorError};
use thiserror::Error;

/// Result type for local collaborator operations.
pub type LocalResult<T> = Result<T, LocalError>;

/// Errors raised by the local coordinator and object store.
#[derive(Debug, Error)]
pub enum LocalError {
    /// Filesystem access failed.
    #[error("local i/o failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Object metadata could not be encoded or decoded.
    #[error("object metadata is invalid")]
    Metadata {
        /// Metadata file involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: serde_json::Error,
    },
    /// A feed line is not a valid batch.
    #[error("batch feed record is invalid")]
    Feed {
        /// One-based line number.
        line: usize,
        /// Underlying failure.
        #[source]
        source: serde_json::Error,
    },
    /// The mount point cannot serve as a filesystem root.
    #[error("invalid mount point")]
    InvalidMount {
        /// Offending path.
        path: PathBuf,
        /// Static reason.
        reason: &'static str,
    },
}

impl LocalError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure reports a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    pub(crate) fn into_backend(self, operation: &'static str) -> BackendError {
        match self {
            Self::Io { source, .. } => BackendError::Io { operation, source },
            other => BackendError::OperationFailed {
                operation,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn into_coordinator(self, operation: &'static str) -> CoordinatorError {
        match self {
            Self::Io { source, path, .. } if source.kind() == io::ErrorKind::NotFound => {
                CoordinatorError::NotFound {
                    operation,
                    target: path.display().to_string(),
                }
            }
            Self::Io { source, .. } => CoordinatorError::Io { operation, source },
            Self::Feed { line, source } => CoordinatorError::Protocol {
                operation,
                reason: format!("line {line}: {source}"),
            },
            other => CoordinatorError::Protocol {
                operation,
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_map_to_not_found() {
        let err = LocalError::io(
            "open",
            "/mnt/lustre/0x1:0x2:0x0",
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(err.is_not_found());
        assert!(matches!(
            err.into_coordinator("read_file_attr"),
            CoordinatorError::NotFound { .. }
        ));
    }

    #[test]
    fn feed_errors_become_protocol_errors() -> anyhow::Result<()> {
        let source = match serde_json::from_str::<serde_json::Value>("{") {
            Err(err) => err,
            Ok(_) => anyhow::bail!("expected a parse failure"),
        };
        let err = LocalError::Feed { line: 3, source };
        assert!(matches!(
            err.into_coordinator("receive_batch"),
            CoordinatorError::Protocol { reason, .. } if reason.starts_with("line 3")
        ));
        Ok(())
    }
}
