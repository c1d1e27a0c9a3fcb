//! Parser for the `key=value[,key=value...]` hint payload carried by action items.
//!
//! # Design
//! - Pairs are split on the first `,`; the value may itself contain `=`.
//! - A pair that ends the input must carry a value; `key=,` yields an empty value.
//! - Duplicate keys are kept in encounter order; precedence is left to callers.

use std::fmt::{self, Display, Formatter};
use std::str::Utf8Error;

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while parsing a hint payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HintError {
    /// A pair had no key before the `=`.
    #[error("hint is missing a key")]
    MissingKey {
        /// Zero-based index of the offending pair.
        index: usize,
        /// Raw text of the offending pair.
        segment: String,
    },
    /// The final pair had no value and no trailing comma.
    #[error("hint is missing a value")]
    MissingValue {
        /// Key of the offending pair.
        key: String,
    },
    /// The payload was not valid UTF-8.
    #[error("hint payload is not valid utf-8")]
    InvalidEncoding {
        /// Underlying decode failure.
        #[source]
        source: Utf8Error,
    },
}

impl HintError {
    /// POSIX code reported for this failure.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        Errno::EINVAL
    }
}

/// A single `key=value` hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    /// Case-sensitive key.
    pub key: String,
    /// Value, possibly empty.
    pub value: String,
}

/// Ordered hint pairs parsed from one action item payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintTable {
    hints: Vec<Hint>,
}

/// Split the next pair off `input`, returning the pair and the unparsed remainder.
///
/// The remainder is `None` when the pair ran to the end of the input.
fn next_pair(input: &str, index: usize) -> Result<(Hint, Option<&str>), HintError> {
    let (segment, rest) = match input.split_once(',') {
        Some((segment, rest)) => (segment, Some(rest)),
        None => (input, None),
    };
    let Some((key, value)) = segment.split_once('=').filter(|(key, _)| !key.is_empty()) else {
        return Err(HintError::MissingKey {
            index,
            segment: segment.to_string(),
        });
    };
    if value.is_empty() && rest.is_none() {
        return Err(HintError::MissingValue {
            key: key.to_string(),
        });
    }
    Ok((
        Hint {
            key: key.to_string(),
            value: value.to_string(),
        },
        rest,
    ))
}

impl HintTable {
    /// Parse a raw payload. Bytes after the first NUL are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HintError`] when a pair lacks a key, the final pair lacks a
    /// value, or the payload is not UTF-8.
    pub fn parse(raw: &[u8]) -> Result<Self, HintError> {
        let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
        let text = std::str::from_utf8(&raw[..end])
            .map_err(|source| HintError::InvalidEncoding { source })?;
        Self::parse_str(text)
    }

    /// Parse an already decoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`HintError`] when a pair lacks a key or the final pair lacks a value.
    pub fn parse_str(text: &str) -> Result<Self, HintError> {
        let capacity = text.bytes().filter(|byte| *byte == b',').count() + 1;
        let mut hints = Vec::with_capacity(capacity);
        let mut remaining = Some(text).filter(|text| !text.is_empty());
        while let Some(input) = remaining {
            let (hint, rest) = next_pair(input, hints.len())?;
            hints.push(hint);
            remaining = rest.filter(|rest| !rest.is_empty());
        }
        hints.shrink_to_fit();
        Ok(Self { hints })
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hints.len()
    }

    /// Whether the table holds no pair.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Pairs in encounter order.
    pub fn iter(&self) -> impl Iterator<Item = &Hint> {
        self.hints.iter()
    }

    /// Last value recorded for `key`.
    #[must_use]
    pub fn last(&self, key: &str) -> Option<&str> {
        self.hints
            .iter()
            .rev()
            .find(|hint| hint.key == key)
            .map(|hint| hint.value.as_str())
    }

    /// Every value recorded for `key`, in encounter order.
    pub fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.hints
            .iter()
            .filter(move |hint| hint.key == key)
            .map(|hint| hint.value.as_str())
    }
}

impl<'a> IntoIterator for &'a HintTable {
    type Item = &'a Hint;
    type IntoIter = std::slice::Iter<'a, Hint>;

    fn into_iter(self) -> Self::IntoIter {
        self.hints.iter()
    }
}

impl Display for HintTable {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        for (index, hint) in self.hints.iter().enumerate() {
            if index > 0 {
                formatter.write_str(",")?;
            }
            write!(formatter, "{}={}", hint.key, hint.value)?;
        }
        // an empty final value only parses when a comma follows it
        if self.hints.last().is_some_and(|hint| hint.value.is_empty()) {
            formatter.write_str(",")?;
        }
        Ok(())
    }
}
