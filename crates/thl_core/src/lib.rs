//! # THL Core
//!
//! The transaction history log (THL) engine: a durable, segmented,
//! append-only log of replication events.
//!
//! This crate provides:
//! - Log records with optional CRC-32 checksums
//! - Event encoding with pluggable payload serializers
//! - Segment files with rotation, recovery and truncation
//! - The [`DiskLog`] with one writer and any number of concurrent readers
//! - Retention of old segments and background implicit commits
//!
//! ## Example
//!
//! ```rust
//! use thl_core::{DiskLog, LogConfig, LogEvent};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let log = DiskLog::prepare(LogConfig::new(dir.path())).unwrap();
//!
//! let mut writer = log.connect(false).unwrap();
//! for seqno in 0..3 {
//!     writer.store(&LogEvent::change(seqno, b"row".to_vec()), true).unwrap();
//! }
//!
//! let mut reader = log.connect(true).unwrap();
//! assert!(reader.seek_seqno(1).unwrap());
//! assert_eq!(reader.next(false).unwrap().unwrap().seqno(), 1);
//! assert_eq!(log.max_seqno(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod connection;
mod disk_log;
mod error;
mod event;
mod index;
mod lock;
mod maintenance;
mod record;
mod segment;
mod serializer;

pub use codec::{EventCodec, LogEntry};
pub use config::{LogConfig, SerializerKind};
pub use connection::{ConnectionHandle, LogConnection, ReadFilter};
pub use disk_log::{DiskLog, ValidationReport};
pub use error::{ThlError, ThlResult};
pub use event::{EventHeader, LogEvent, LogPosition, ReplEvent, NO_SEQNO};
pub use index::{SegmentIndex, SegmentMeta};
pub use lock::{WriteLock, LOCK_FILE};
pub use record::{compute_checksum, LogRecord, RecordType, LENGTH_PREFIX_SIZE, MAX_RECORD_LENGTH};
pub use segment::{
    parse_segment_index, segment_file_name, segment_path, ReadOutcome, SegmentHeader,
    SegmentReader, SegmentScan, SegmentWriter, HEADER_SIZE, MAJOR_VERSION, MINOR_VERSION,
    SEGMENT_MAGIC, SEGMENT_PREFIX,
};
pub use serializer::{serializer_for, BinarySerializer, EventSerializer, JsonSerializer};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
