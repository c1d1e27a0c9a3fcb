//! # Design
//!
//! - Lower layers (transfer adapter) report a typed reason; only the action
//!   machine decides retryability and compensation from it.
//! - Keep error messages constant; store operational context in fields.
//! - Every error maps onto the positive errno reported to the coordinator.

use std::io;

use copytool_core::{
    ActionKind, BackendError, CoordinatorError, HintError, LayoutError, TransferOp,
};
use nix::errno::Errno;
use thiserror::Error;

/// Failure building or executing a backend transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The object store rejected the request.
    #[error("backend transfer failed")]
    Backend {
        /// Transfer operation.
        op: TransferOp,
        /// Underlying failure.
        #[source]
        source: BackendError,
    },
    /// The local data handle could not be inspected.
    #[error("local data handle failed")]
    DataHandle {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Layout metadata could not be encoded or decoded.
    #[error("layout metadata is invalid")]
    Layout {
        /// Underlying failure.
        #[source]
        source: LayoutError,
    },
}

impl TransferError {
    /// Whether the failure is timeout-class.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { source, .. } if source.is_retryable())
    }

    /// POSIX code reported for this failure.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            Self::Backend { source, .. } => source.errno(),
            Self::DataHandle { source, .. } => {
                source.raw_os_error().map_or(Errno::EIO, Errno::from_raw)
            }
            Self::Layout { source } => source.errno(),
        }
    }
}

/// Typed reason an action item did not complete.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A coordinator call failed.
    #[error("coordinator call failed")]
    Coordinator {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: CoordinatorError,
    },
    /// The backend transfer failed.
    #[error("transfer failed")]
    Transfer {
        /// Underlying failure.
        #[source]
        source: TransferError,
    },
    /// The hint payload was malformed.
    #[error("invalid hints")]
    Hints {
        /// Underlying failure.
        #[source]
        source: HintError,
    },
    /// The action code is not handled by this tool.
    #[error("unsupported action")]
    UnsupportedAction {
        /// Action received.
        action: ActionKind,
    },
    /// Releasing the lease failed after the action ran.
    #[error("failed to finalize action")]
    Finalize {
        /// Underlying failure.
        #[source]
        source: CoordinatorError,
    },
}

impl ActionError {
    /// Wrap a coordinator failure.
    #[must_use]
    pub const fn coordinator(operation: &'static str, source: CoordinatorError) -> Self {
        Self::Coordinator { operation, source }
    }

    /// Whether the coordinator may resubmit the item.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Coordinator { source, .. } | Self::Finalize { source } => source.is_retryable(),
            Self::Transfer { source } => source.is_retryable(),
            Self::Hints { .. } | Self::UnsupportedAction { .. } => false,
        }
    }

    /// POSIX code reported for this failure.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            Self::Coordinator { source, .. } | Self::Finalize { source } => source.errno(),
            Self::Transfer { source } => source.errno(),
            Self::Hints { source } => source.errno(),
            Self::UnsupportedAction { .. } => Errno::EINVAL,
        }
    }
}

impl From<TransferError> for ActionError {
    fn from(source: TransferError) -> Self {
        Self::Transfer { source }
    }
}

/// Convenience alias for action results.
pub type ActionResult<T> = Result<T, ActionError>;

/// Batch-level failure seen by the dispatch engine.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The batch targets another filesystem.
    #[error("batch filesystem mismatch")]
    FsNameMismatch {
        /// Locally configured filesystem.
        expected: String,
        /// Filesystem named by the batch.
        actual: String,
    },
    /// A record runs past the declared end of the batch.
    #[error("action record past end of batch")]
    RecordOverrun {
        /// One-based index of the offending record.
        index: usize,
        /// Offset the record starts at.
        offset: usize,
        /// Bytes the record claims.
        record_len: usize,
        /// Declared batch size.
        bound: usize,
    },
    /// Waiting for the next batch failed.
    #[error("failed to receive action batch")]
    Receive {
        /// Underlying failure.
        #[source]
        source: CoordinatorError,
    },
    /// Abort-on-error is set and a major error was counted.
    #[error("stopping after major error")]
    AbortOnError {
        /// Major errors counted when the loop stopped.
        major: u64,
    },
}

impl DispatchError {
    /// POSIX code reported for this failure.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            Self::FsNameMismatch { .. } => Errno::EINVAL,
            Self::RecordOverrun { .. } => Errno::EPROTO,
            Self::Receive { source } => source.errno(),
            Self::AbortOnError { .. } => Errno::ECANCELED,
        }
    }
}
