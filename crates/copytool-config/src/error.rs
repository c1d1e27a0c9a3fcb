//! Error types for option validation.

use nix::errno::Errno;
use thiserror::Error;

/// Primary error type for option parsing and validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid option value")]
    InvalidField {
        /// Option that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// A required option was not supplied.
    #[error("missing required option")]
    MissingField {
        /// Name of the missing option.
        field: &'static str,
    },
}

impl ConfigError {
    /// POSIX code reported for this failure.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        Errno::EINVAL
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
