//! Buffered big-endian file writer.

use crate::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An append-only writer with an in-memory buffer and offset tracking.
///
/// Every `write_*` call appends to the buffer and advances [`offset`].
/// When the buffer grows past its configured size it is handed to the OS,
/// but nothing is durable until [`fsync`] returns successfully. A writer
/// switched to [`hold_until_flush`] never spills: its bytes reach the file
/// only through an explicit `flush()` or `fsync()`.
///
/// # Durability
///
/// - `flush()` writes buffered bytes through to the OS without syncing
/// - `fsync()` flushes and then calls `File::sync_data()`
/// - `set_length()` truncates, syncs, and resets the offset
///
/// [`offset`]: BufferedFileWriter::offset
/// [`fsync`]: BufferedFileWriter::fsync
/// [`hold_until_flush`]: BufferedFileWriter::hold_until_flush
#[derive(Debug)]
pub struct BufferedFileWriter {
    path: PathBuf,
    file: File,
    buffer: Vec<u8>,
    buffer_size: usize,
    /// Bytes already handed to the OS.
    written: u64,
    /// Whether a full buffer is written through on its own.
    spill: bool,
}

impl BufferedFileWriter {
    /// Opens or creates a file for appending.
    ///
    /// The logical offset starts at the current file length.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path, buffer_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let written = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            buffer: Vec::with_capacity(buffer_size.min(1 << 20)),
            buffer_size: buffer_size.max(1),
            written,
            spill: true,
        })
    }

    /// Keeps every appended byte in memory until `flush()` or `fsync()`.
    ///
    /// The buffer then grows past `buffer_size` as needed, and the file
    /// never holds bytes the caller has not explicitly written through.
    #[must_use]
    pub fn hold_until_flush(mut self) -> Self {
        self.spill = false;
        self
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the logical end of the file, including buffered bytes.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.written + self.buffer.len() as u64
    }

    /// Returns the number of bytes waiting in the buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a single byte.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer spill to the OS fails.
    pub fn write_u8(&mut self, value: u8) -> StorageResult<()> {
        self.write_bytes(&[value])
    }

    /// Appends a big-endian `i16`.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer spill to the OS fails.
    pub fn write_i16(&mut self, value: i16) -> StorageResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Appends a big-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer spill to the OS fails.
    pub fn write_i32(&mut self, value: i32) -> StorageResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Appends a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer spill to the OS fails.
    pub fn write_u32(&mut self, value: u32) -> StorageResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Appends a big-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer spill to the OS fails.
    pub fn write_i64(&mut self, value: i64) -> StorageResult<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Appends raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer spill to the OS fails.
    pub fn write_bytes(&mut self, data: &[u8]) -> StorageResult<()> {
        self.buffer.extend_from_slice(data);
        if self.spill && self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes buffered bytes through to the OS without syncing them.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. Buffered bytes are kept so a
    /// later call can retry.
    pub fn flush(&mut self) -> StorageResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(self.written))?;
        self.file.write_all(&self.buffer)?;
        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Flushes and syncs file data to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if either step fails. A failed sync means the data
    /// must not be treated as durable.
    pub fn fsync(&mut self) -> StorageResult<()> {
        self.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Truncates the file to `len` bytes, discarding anything after it.
    ///
    /// Buffered bytes past `len` are dropped; bytes before it stay buffered.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidLength`] if `len` is past the logical
    /// end, or an I/O error if truncation fails.
    pub fn set_length(&mut self, len: u64) -> StorageResult<()> {
        let current = self.offset();
        if len > current {
            return Err(StorageError::InvalidLength {
                requested: len,
                current,
            });
        }

        if len >= self.written {
            self.buffer.truncate((len - self.written) as usize);
            return Ok(());
        }

        self.buffer.clear();
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.written = len;

        tracing::debug!(path = %self.path.display(), len, "truncated file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    #[test]
    fn writer_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.bin");

        let writer = BufferedFileWriter::open(&path, 64).unwrap();
        assert_eq!(writer.offset(), 0);
        assert!(path.exists());
    }

    #[test]
    fn writes_advance_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("offsets.bin");

        let mut writer = BufferedFileWriter::open(&path, 1024).unwrap();
        writer.write_u8(1).unwrap();
        writer.write_i16(2).unwrap();
        writer.write_i32(3).unwrap();
        writer.write_i64(4).unwrap();
        writer.write_bytes(b"abc").unwrap();

        assert_eq!(writer.offset(), 1 + 2 + 4 + 8 + 3);
        assert_eq!(writer.buffered(), 18);
        assert_eq!(file_len(&path), 0);
    }

    #[test]
    fn fsync_makes_bytes_visible() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync.bin");

        let mut writer = BufferedFileWriter::open(&path, 1024).unwrap();
        writer.write_i64(0x0102_0304_0506_0708).unwrap();
        writer.fsync().unwrap();

        assert_eq!(writer.buffered(), 0);
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn buffer_spills_when_full() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spill.bin");

        let mut writer = BufferedFileWriter::open(&path, 8).unwrap();
        writer.write_i32(1).unwrap();
        assert_eq!(file_len(&path), 0);
        writer.write_i32(2).unwrap();
        assert_eq!(file_len(&path), 8);
        assert_eq!(writer.buffered(), 0);
    }

    #[test]
    fn held_buffer_reaches_file_only_on_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("held.bin");

        let mut writer = BufferedFileWriter::open(&path, 8).unwrap().hold_until_flush();
        for value in 0..10 {
            writer.write_i64(value).unwrap();
        }
        assert_eq!(writer.buffered(), 80);
        assert_eq!(writer.offset(), 80);
        assert_eq!(file_len(&path), 0);

        writer.fsync().unwrap();
        assert_eq!(file_len(&path), 80);
        assert_eq!(writer.buffered(), 0);
    }

    #[test]
    fn reopen_appends_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("append.bin");

        {
            let mut writer = BufferedFileWriter::open(&path, 64).unwrap();
            writer.write_bytes(b"hello").unwrap();
            writer.fsync().unwrap();
        }

        let mut writer = BufferedFileWriter::open(&path, 64).unwrap();
        assert_eq!(writer.offset(), 5);
        writer.write_bytes(b" world").unwrap();
        writer.fsync().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn set_length_truncates_durable_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truncate.bin");

        let mut writer = BufferedFileWriter::open(&path, 64).unwrap();
        writer.write_bytes(b"hello world").unwrap();
        writer.fsync().unwrap();

        writer.set_length(5).unwrap();
        assert_eq!(writer.offset(), 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        writer.write_bytes(b"!").unwrap();
        writer.fsync().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello!");
    }

    #[test]
    fn set_length_trims_buffer_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trim.bin");

        let mut writer = BufferedFileWriter::open(&path, 64).unwrap();
        writer.write_bytes(b"abc").unwrap();
        writer.fsync().unwrap();
        writer.write_bytes(b"defgh").unwrap();

        writer.set_length(5).unwrap();
        assert_eq!(writer.offset(), 5);
        writer.fsync().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcde");
    }

    #[test]
    fn set_length_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grow.bin");

        let mut writer = BufferedFileWriter::open(&path, 64).unwrap();
        writer.write_bytes(b"abc").unwrap();

        let result = writer.set_length(10);
        assert!(matches!(
            result,
            Err(StorageError::InvalidLength {
                requested: 10,
                current: 3
            })
        ));
    }
}
