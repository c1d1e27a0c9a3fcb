//! Event sink error primitives.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error raised while attaching or feeding an external event sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not be opened.
    #[error("failed to open event sink")]
    Open {
        /// Sink location.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// An envelope could not be written.
    #[error("failed to write event sink")]
    Write {
        /// Sink location.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// An envelope could not be serialized.
    #[error("failed to encode event")]
    Encode {
        /// Underlying failure.
        #[source]
        source: serde_json::Error,
    },
}

impl SinkError {
    /// Raw OS error code when the failure came from the filesystem.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Open { source, .. } | Self::Write { source, .. } => source.raw_os_error(),
            Self::Encode { .. } => None,
        }
    }
}

/// Result wrapper for event sink operations.
pub type SinkResult<T> = Result<T, SinkError>;
