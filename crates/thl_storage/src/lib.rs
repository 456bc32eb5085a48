//! # THL Storage
//!
//! Buffered binary file I/O used by the THL disk log.
//!
//! This crate is the lowest layer of the log. It moves big-endian
//! primitives in and out of a single file and knows nothing about records,
//! events or segments.
//!
//! ## Durability
//!
//! - Writes land in an in-memory buffer first
//! - [`BufferedFileWriter::flush`] hands buffered bytes to the OS
//! - [`BufferedFileWriter::fsync`] is the only call that makes data durable
//!
//! ## Example
//!
//! ```rust
//! use thl_storage::{BufferedFileReader, BufferedFileWriter};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("data.bin");
//!
//! let mut writer = BufferedFileWriter::open(&path, 4096).unwrap();
//! writer.write_i64(42).unwrap();
//! writer.fsync().unwrap();
//!
//! let mut reader = BufferedFileReader::open(&path).unwrap();
//! assert_eq!(reader.read_i64().unwrap(), 42);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reader;
mod writer;

pub use error::{StorageError, StorageResult};
pub use reader::BufferedFileReader;
pub use writer::BufferedFileWriter;
