//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the file.
    #[error("read beyond end of file: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The file size observed when the read failed.
        size: u64,
    },

    /// A truncation asked for a length past the logical end of the file.
    #[error("cannot set length to {requested}: current length is {current}")]
    InvalidLength {
        /// The requested length.
        requested: u64,
        /// The current logical length.
        current: u64,
    },
}

impl StorageError {
    /// Returns true if the error means the data simply is not there yet.
    #[must_use]
    pub fn is_read_past_end(&self) -> bool {
        matches!(self, Self::ReadPastEnd { .. })
    }
}
