//! Buffered big-endian file reader.

use crate::error::{StorageError, StorageResult};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A positioned reader that mirrors [`BufferedFileWriter`](crate::BufferedFileWriter).
///
/// The reader keeps its own offset. A read that would run past the current
/// end of the file fails with [`StorageError::ReadPastEnd`] and leaves the
/// offset where it was, so the caller can retry once more data is written.
#[derive(Debug)]
pub struct BufferedFileReader {
    path: PathBuf,
    input: BufReader<File>,
    offset: u64,
}

impl BufferedFileReader {
    /// Opens an existing file for reading, positioned at offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            input: BufReader::new(file),
            offset: 0,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current read offset.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the current length of the file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn len(&self) -> StorageResult<u64> {
        Ok(self.input.get_ref().metadata()?.len())
    }

    /// Returns true if the file is currently empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Moves the read position to `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying seek fails.
    pub fn seek(&mut self, offset: u64) -> StorageResult<()> {
        if offset != self.offset {
            self.input.seek(SeekFrom::Start(offset))?;
            self.offset = offset;
        }
        Ok(())
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the byte is not there.
    pub fn read_u8(&mut self) -> StorageResult<u8> {
        let mut buf = [0u8; 1];
        self.read_fully(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a big-endian `i16`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if fewer than 2 bytes remain.
    pub fn read_i16(&mut self) -> StorageResult<i16> {
        let mut buf = [0u8; 2];
        self.read_fully(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    /// Reads a big-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if fewer than 4 bytes remain.
    pub fn read_i32(&mut self) -> StorageResult<i32> {
        let mut buf = [0u8; 4];
        self.read_fully(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    /// Reads a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if fewer than 4 bytes remain.
    pub fn read_u32(&mut self) -> StorageResult<u32> {
        let mut buf = [0u8; 4];
        self.read_fully(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Reads a big-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if fewer than 8 bytes remain.
    pub fn read_i64(&mut self) -> StorageResult<i64> {
        let mut buf = [0u8; 8];
        self.read_fully(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Fills `buf` completely from the current offset.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the file ends first. The
    /// offset is unchanged in that case.
    pub fn read_fully(&mut self, buf: &mut [u8]) -> StorageResult<()> {
        if buf.is_empty() {
            return Ok(());
        }

        match self.input.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                let size = self.len()?;
                self.input.seek(SeekFrom::Start(self.offset))?;
                Err(StorageError::ReadPastEnd {
                    offset: self.offset,
                    len: buf.len(),
                    size,
                })
            }
            Err(e) => {
                self.input.seek(SeekFrom::Start(self.offset))?;
                Err(e.into())
            }
        }
    }
}
