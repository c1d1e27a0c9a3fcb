//! Legacy fixed-width hex record codec.
//!
//! A record is a two-digit hex length followed by `|`, then one `xxxxxxxx:` field
//! per byte. Bytes are rendered as sign-extended 32-bit words, so `0x80` becomes
//! `ffffff80`; decoding keeps the low byte of each field.

use std::fmt::Write as _;

use nix::errno::Errno;
use thiserror::Error;

/// Longest payload the two-digit header can describe.
pub const MAX_RECORD_LEN: usize = 0xff;

const HEADER_LEN: usize = 3;
const FIELD_LEN: usize = 9;

/// Errors raised by the hex record codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexRecordError {
    /// The payload does not fit the two-digit length header.
    #[error("hex record payload too long")]
    TooLong {
        /// Payload length.
        len: usize,
    },
    /// The length header is missing or malformed.
    #[error("hex record header is malformed")]
    Header {
        /// Offending record.
        value: String,
    },
    /// The record length disagrees with its header.
    #[error("hex record length mismatch")]
    Length {
        /// Byte count announced by the header.
        declared: usize,
        /// Characters found after the header.
        actual: usize,
    },
    /// A per-byte field is malformed.
    #[error("hex record field is malformed")]
    Field {
        /// Zero-based byte index.
        index: usize,
    },
}

impl HexRecordError {
    /// POSIX code reported for this failure.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        Errno::EINVAL
    }
}

/// Encode `bytes` as a hex record.
///
/// # Errors
///
/// Returns [`HexRecordError::TooLong`] when `bytes` is longer than [`MAX_RECORD_LEN`].
pub fn encode(bytes: &[u8]) -> Result<String, HexRecordError> {
    if bytes.len() > MAX_RECORD_LEN {
        return Err(HexRecordError::TooLong { len: bytes.len() });
    }
    let mut out = String::with_capacity(HEADER_LEN + FIELD_LEN * bytes.len());
    let _ = write!(out, "{:02x}|", bytes.len());
    for byte in bytes {
        // reinterpreted as a signed char, then widened
        let word = i32::from(i8::from_ne_bytes([*byte]));
        let _ = write!(out, "{word:08x}:");
    }
    Ok(out)
}

/// Decode a hex record back into bytes.
///
/// # Errors
///
/// Returns [`HexRecordError`] when the header, length or any field is malformed.
pub fn decode(record: &str) -> Result<Vec<u8>, HexRecordError> {
    let header_error = || HexRecordError::Header {
        value: record.to_string(),
    };
    let header = record.get(..HEADER_LEN).ok_or_else(header_error)?;
    let digits = header.strip_suffix('|').ok_or_else(header_error)?;
    let declared = usize::from_str_radix(digits, 16).map_err(|_| header_error())?;

    let body = &record[HEADER_LEN..];
    if body.len() != declared * FIELD_LEN {
        return Err(HexRecordError::Length {
            declared,
            actual: body.len(),
        });
    }

    body.as_bytes()
        .chunks(FIELD_LEN)
        .enumerate()
        .map(|(index, field)| {
            let (digits, separator) = field.split_at(FIELD_LEN - 1);
            if separator != b":" {
                return Err(HexRecordError::Field { index });
            }
            let text = std::str::from_utf8(digits).map_err(|_| HexRecordError::Field { index })?;
            let word =
                u32::from_str_radix(text, 16).map_err(|_| HexRecordError::Field { index })?;
            Ok(word.to_le_bytes()[0])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_and_sign_extended_fields() -> Result<(), HexRecordError> {
        assert_eq!(encode(b"")?, "00|");
        assert_eq!(encode(&[0x41, 0x80])?, "02|00000041:ffffff80:");
        Ok(())
    }

    #[test]
    fn decodes_what_it_encodes() -> Result<(), HexRecordError> {
        let bytes: Vec<u8> = (0..=MAX_RECORD_LEN)
            .map(|value| u8::try_from(value).unwrap_or_default())
            .collect();
        let record = encode(&bytes)?;
        assert_eq!(&record[..3], "ff|");
        assert_eq!(decode(&record)?, bytes);
        Ok(())
    }

    #[test]
    fn decode_keeps_low_byte_of_plain_fields() -> Result<(), HexRecordError> {
        assert_eq!(decode("01|00000080:")?, vec![0x80]);
        Ok(())
    }

    #[test]
    fn rejects_oversized_payloads() {
        assert_eq!(
            encode(&[0; MAX_RECORD_LEN + 1]),
            Err(HexRecordError::TooLong { len: 256 })
        );
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(matches!(decode("0"), Err(HexRecordError::Header { .. })));
        assert!(matches!(decode("zz|"), Err(HexRecordError::Header { .. })));
        assert!(matches!(decode("01-00000041:"), Err(HexRecordError::Header { .. })));
        assert_eq!(
            decode("02|00000041:"),
            Err(HexRecordError::Length {
                declared: 2,
                actual: 9
            })
        );
        assert_eq!(decode("01|00000041;"), Err(HexRecordError::Field { index: 0 }));
        assert_eq!(decode("01|0000004g:"), Err(HexRecordError::Field { index: 0 }));
    }
}
