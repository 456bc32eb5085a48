//! Log configuration.

use crate::error::{ThlError, ThlResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Payload serializer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// Compact tagged binary encoding.
    #[default]
    Binary,
    /// JSON encoding via `serde_json`.
    Json,
}

/// Configuration for preparing a [`DiskLog`](crate::DiskLog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding the segment files.
    pub log_dir: PathBuf,

    /// Open without taking the write lock or modifying any file.
    pub read_only: bool,

    /// Write checksums into new segments and verify them on read.
    pub checksums: bool,

    /// Segment size in bytes past which the log rotates at the next
    /// transaction boundary.
    pub segment_size: u64,

    /// In-memory write buffer size in bytes.
    pub buffer_size: usize,

    /// How long a blocking read waits for new data.
    pub timeout: Duration,

    /// How long a store waits for the shared writer.
    pub write_lock_timeout: Duration,

    /// Interval for implicit commits (zero disables them).
    pub flush_interval: Duration,

    /// Age after which old segments may be purged (zero keeps everything).
    pub retention: Duration,

    /// How often the background task runs the retention sweep.
    pub retention_check_interval: Duration,

    /// Event payload serializer.
    pub serializer: SerializerKind,
}

impl LogConfig {
    /// Creates a configuration for `log_dir` with default values.
    #[must_use]
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            log_dir: log_dir.as_ref().to_path_buf(),
            read_only: false,
            checksums: true,
            segment_size: 100 * 1024 * 1024,              // 100 MB
            buffer_size: 128 * 1024,                      // 128 KiB
            timeout: Duration::from_secs(8 * 60 * 60),    // 8 h
            write_lock_timeout: Duration::from_secs(10),
            flush_interval: Duration::from_millis(3000),
            retention: Duration::ZERO,                    // keep forever
            retention_check_interval: Duration::from_secs(60),
            serializer: SerializerKind::Binary,
        }
    }

    /// Sets whether the log is opened read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether record checksums are written and verified.
    #[must_use]
    pub const fn checksums(mut self, value: bool) -> Self {
        self.checksums = value;
        self
    }

    /// Sets the rotation threshold in bytes.
    #[must_use]
    pub const fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the write buffer size in bytes.
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the default read timeout for new connections.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how long a store waits for the writer.
    #[must_use]
    pub const fn write_lock_timeout(mut self, timeout: Duration) -> Self {
        self.write_lock_timeout = timeout;
        self
    }

    /// Sets the implicit commit interval. Zero disables implicit commits.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the retention window. Zero disables retention.
    #[must_use]
    pub const fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the retention sweep interval.
    #[must_use]
    pub const fn retention_check_interval(mut self, interval: Duration) -> Self {
        self.retention_check_interval = interval;
        self
    }

    /// Sets the payload serializer.
    #[must_use]
    pub const fn serializer(mut self, kind: SerializerKind) -> Self {
        self.serializer = kind;
        self
    }

    /// Checks the configuration for values the log cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Config`] describing the first bad value.
    pub fn validate(&self) -> ThlResult<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(ThlError::config("log directory must be set"));
        }
        if self.segment_size == 0 {
            return Err(ThlError::config("segment size must be greater than zero"));
        }
        if self.buffer_size == 0 {
            return Err(ThlError::config("buffer size must be greater than zero"));
        }
        if !self.retention.is_zero() && self.retention_check_interval.is_zero() {
            return Err(ThlError::config(
                "retention check interval must be set when retention is enabled",
            ));
        }
        Ok(())
    }

    /// Returns true if a background task is needed for this configuration.
    #[must_use]
    pub fn needs_maintenance(&self) -> bool {
        !self.read_only && (!self.flush_interval.is_zero() || !self.retention.is_zero())
    }
}
