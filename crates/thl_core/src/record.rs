//! Physical log records.
//!
//! A record is the unit of storage inside a segment file:
//!
//! ```text
//! | length (4) | type (1) | crc32 (4, optional) | payload (N) |
//! ```
//!
//! `length` counts every byte after the length field itself. The checksum
//! covers the type byte and the payload and is present only in segments
//! created with checksums enabled. All integers are big-endian.

use crate::error::{ThlError, ThlResult};
use bytes::{BufMut, BytesMut};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: u64 = 4;

/// Largest accepted value of the length prefix.
pub const MAX_RECORD_LENGTH: u32 = 1 << 30;

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A replication event.
    Event = 1,
    /// End-of-segment marker pointing at the next segment.
    Rotate = 2,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Event),
            2 => Some(Self::Rotate),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A typed block of bytes as stored in a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Record type.
    pub record_type: RecordType,
    /// Type-specific payload.
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(record_type: RecordType, payload: Vec<u8>) -> Self {
        Self {
            record_type,
            payload,
        }
    }

    /// Returns the smallest legal length prefix.
    #[must_use]
    pub const fn min_length(checksums: bool) -> u32 {
        if checksums {
            5
        } else {
            1
        }
    }

    /// Returns the number of bytes this record occupies on disk.
    #[must_use]
    pub fn encoded_len(&self, checksums: bool) -> u64 {
        LENGTH_PREFIX_SIZE + u64::from(Self::min_length(checksums)) + self.payload.len() as u64
    }

    /// Encodes the record including its length prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too large for the length field.
    pub fn encode(&self, checksums: bool) -> ThlResult<Vec<u8>> {
        let body_len = u64::from(Self::min_length(checksums)) + self.payload.len() as u64;
        if body_len > u64::from(MAX_RECORD_LENGTH) {
            return Err(ThlError::invalid_operation(format!(
                "record too large: {} bytes exceeds maximum of {} bytes",
                body_len, MAX_RECORD_LENGTH
            )));
        }

        let mut buf = BytesMut::with_capacity(4 + body_len as usize);
        buf.put_u32(body_len as u32);
        buf.put_u8(self.record_type.as_byte());
        if checksums {
            buf.put_u32(compute_checksum(self.record_type.as_byte(), &self.payload));
        }
        buf.put_slice(&self.payload);
        Ok(buf.to_vec())
    }

    /// Decodes a record body (everything after the length prefix).
    ///
    /// `file` and `offset` only label errors. When `verify` is false a
    /// stored checksum is skipped rather than checked.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::ChecksumMismatch`] on a bad checksum and
    /// [`ThlError::Corruption`] on an unknown type or short body.
    pub fn decode_body(
        body: &[u8],
        checksums: bool,
        verify: bool,
        file: &str,
        offset: u64,
    ) -> ThlResult<Self> {
        let header_len = Self::min_length(checksums) as usize;
        if body.len() < header_len {
            return Err(ThlError::corruption(format!(
                "record body too short in {file} at offset {offset}: {} bytes",
                body.len()
            )));
        }

        let type_byte = body[0];
        let record_type = RecordType::from_byte(type_byte).ok_or_else(|| {
            ThlError::corruption(format!(
                "unknown record type {type_byte} in {file} at offset {offset}"
            ))
        })?;

        let payload = &body[header_len..];
        if checksums && verify {
            let expected = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
            let actual = compute_checksum(type_byte, payload);
            if expected != actual {
                return Err(ThlError::ChecksumMismatch {
                    file: file.to_string(),
                    offset,
                    expected,
                    actual,
                });
            }
        }

        Ok(Self {
            record_type,
            payload: payload.to_vec(),
        })
    }

    /// Checks a length prefix read from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Corruption`] if the length cannot belong to a
    /// well-formed record.
    pub fn check_length(length: u32, checksums: bool, file: &str, offset: u64) -> ThlResult<()> {
        if length < Self::min_length(checksums) || length > MAX_RECORD_LENGTH {
            return Err(ThlError::corruption(format!(
                "malformed record length {length} in {file} at offset {offset}"
            )));
        }
        Ok(())
    }
}

/// Computes the CRC-32 of a record type byte followed by its payload.
#[must_use]
pub fn compute_checksum(record_type: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[record_type]);
    hasher.update(payload);
    hasher.finalize()
}
