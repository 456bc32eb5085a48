//! Error types for the THL disk log.

use std::io;
use thiserror::Error;

/// Result type for log operations.
pub type ThlResult<T> = Result<T, ThlError>;

/// Errors that can occur in THL log operations.
#[derive(Debug, Error)]
pub enum ThlError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] thl_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bad or unusable configuration, detected at prepare time.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// Another connection already holds the log for writing.
    #[error("log writer already held by another connection")]
    WriterAlreadyHeld,

    /// A write was attempted through a read-only connection or log.
    #[error("log is read-only: {message}")]
    ReadOnly {
        /// The operation that was refused.
        message: String,
    },

    /// A bounded wait expired.
    #[error("timed out: {message}")]
    Timeout {
        /// What was being waited for.
        message: String,
    },

    /// The log contents do not match the position the caller asked for.
    #[error("log position error: {message}")]
    Position {
        /// Description of the mismatch.
        message: String,
    },

    /// A record checksum did not match its contents.
    #[error("checksum mismatch in {file} at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Segment file name.
        file: String,
        /// Offset of the record.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed from the record contents.
        actual: u32,
    },

    /// A record or file header is malformed.
    #[error("log corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// The log structure violates an ordering or linkage rule.
    #[error("log inconsistency: {message}")]
    Consistency {
        /// Description of the inconsistency.
        message: String,
    },

    /// A blocked call was woken because its connection was released.
    #[error("interrupted: {message}")]
    Interrupted {
        /// What was interrupted.
        message: String,
    },

    /// Retention could not proceed because a reader is using the segment.
    #[error("segment busy: {message}")]
    Busy {
        /// Description of the blocked deletion.
        message: String,
    },

    /// The connection has been released.
    #[error("connection has been released")]
    Released,

    /// Event payload could not be serialized or deserialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl ThlError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a read-only error.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::ReadOnly {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a position error.
    pub fn position(message: impl Into<String>) -> Self {
        Self::Position {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Creates an interruption error.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::Interrupted {
            message: message.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for timeout errors.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the caller may reasonably retry the operation.
    ///
    /// Timeouts, writer contention and retention conflicts clear up on their
    /// own. Everything else needs caller intervention.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::WriterAlreadyHeld | Self::Busy { .. }
        )
    }

    /// Returns true for checksum and structural corruption.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::Corruption { .. } | Self::Consistency { .. }
        )
    }
}
