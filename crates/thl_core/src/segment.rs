//! Segment files.
//!
//! A segment is one physical file of the log:
//!
//! ```text
//! | magic (4) | major (2) | minor (2) | base_seqno (8) | flags (1) | records... |
//! ```
//!
//! Files are named `thl.data.NNNNNNNNNN` after their segment index, so a
//! lexical sort of the directory matches log order. A segment is sealed once
//! a ROTATE record has been appended to it.

use crate::codec::{EventCodec, LogEntry};
use crate::error::{ThlError, ThlResult};
use crate::event::{LogPosition, NO_SEQNO};
use crate::record::{LogRecord, RecordType, LENGTH_PREFIX_SIZE};
use std::fs::File;
use std::path::{Path, PathBuf};
use thl_storage::{BufferedFileReader, BufferedFileWriter, StorageError};

/// Magic number at the start of every segment.
pub const SEGMENT_MAGIC: u32 = 0xC001_CAFE;

/// Major format version. A mismatch is fatal.
pub const MAJOR_VERSION: u16 = 1;

/// Minor format version. A mismatch is only logged.
pub const MINOR_VERSION: u16 = 1;

/// Size of the segment file header.
pub const HEADER_SIZE: u64 = 17;

/// Prefix of every segment file name.
pub const SEGMENT_PREFIX: &str = "thl.data.";

const FLAG_CHECKSUMS: u8 = 0x01;

/// Returns the file name of segment `index`.
#[must_use]
pub fn segment_file_name(index: u64) -> String {
    format!("{SEGMENT_PREFIX}{index:010}")
}

/// Parses a segment index out of a file name.
#[must_use]
pub fn parse_segment_index(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(SEGMENT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Decoded segment file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// First seqno the segment holds.
    pub base_seqno: i64,
    /// Whether records carry checksums.
    pub checksums: bool,
    /// Minor version found in the file.
    pub minor_version: u16,
}

impl SegmentHeader {
    fn read(input: &mut BufferedFileReader, name: &str) -> ThlResult<Self> {
        input.seek(0)?;
        let magic = input.read_u32().map_err(|e| short_header(e, name))?;
        if magic != SEGMENT_MAGIC {
            return Err(ThlError::corruption(format!(
                "bad magic {magic:08x} in segment {name}"
            )));
        }
        let major = input.read_i16().map_err(|e| short_header(e, name))? as u16;
        let minor = input.read_i16().map_err(|e| short_header(e, name))? as u16;
        if major != MAJOR_VERSION {
            return Err(ThlError::corruption(format!(
                "unsupported major version {major} in segment {name}"
            )));
        }
        if minor != MINOR_VERSION {
            tracing::warn!(file = name, minor, "segment minor version differs");
        }
        let base_seqno = input.read_i64().map_err(|e| short_header(e, name))?;
        let flags = input.read_u8().map_err(|e| short_header(e, name))?;

        Ok(Self {
            base_seqno,
            checksums: flags & FLAG_CHECKSUMS != 0,
            minor_version: minor,
        })
    }

    fn write(&self, out: &mut BufferedFileWriter) -> ThlResult<()> {
        out.write_u32(SEGMENT_MAGIC)?;
        out.write_i16(MAJOR_VERSION as i16)?;
        out.write_i16(MINOR_VERSION as i16)?;
        out.write_i64(self.base_seqno)?;
        out.write_u8(if self.checksums { FLAG_CHECKSUMS } else { 0 })?;
        Ok(())
    }
}

fn short_header(err: StorageError, name: &str) -> ThlError {
    if err.is_read_past_end() {
        ThlError::corruption(format!("segment {name} has a truncated header"))
    } else {
        err.into()
    }
}

/// The write side of a segment.
///
/// Appended records stay in memory until [`fsync`](Self::fsync), so the
/// file only ever holds records that were committed or are being
/// committed.
#[derive(Debug)]
pub struct SegmentWriter {
    index: u64,
    name: String,
    header: SegmentHeader,
    out: BufferedFileWriter,
}

impl SegmentWriter {
    /// Creates a brand-new, empty segment and syncs its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file already exists or cannot be written.
    pub fn create(
        dir: &Path,
        index: u64,
        base_seqno: i64,
        checksums: bool,
        buffer_size: usize,
    ) -> ThlResult<Self> {
        let name = segment_file_name(index);
        let path = dir.join(&name);
        if path.exists() {
            return Err(ThlError::invalid_operation(format!(
                "segment {name} already exists"
            )));
        }

        let header = SegmentHeader {
            base_seqno,
            checksums,
            minor_version: MINOR_VERSION,
        };
        let mut out = BufferedFileWriter::open(&path, buffer_size)?.hold_until_flush();
        header.write(&mut out)?;
        out.fsync()?;
        sync_directory(dir)?;

        tracing::debug!(file = %name, base_seqno, "created segment");
        Ok(Self {
            index,
            name,
            header,
            out,
        })
    }

    /// Opens an existing segment for appending at its current end.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or its header is invalid.
    pub fn open_write(path: &Path, buffer_size: usize) -> ThlResult<Self> {
        let name = file_name_of(path)?;
        let index = parse_segment_index(&name)
            .ok_or_else(|| ThlError::config(format!("not a segment file: {name}")))?;
        let mut input = BufferedFileReader::open(path)?;
        let header = SegmentHeader::read(&mut input, &name)?;
        let out = BufferedFileWriter::open(path, buffer_size)?.hold_until_flush();

        Ok(Self {
            index,
            name,
            header,
            out,
        })
    }

    /// Returns the segment index.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the header.
    #[must_use]
    pub fn header(&self) -> SegmentHeader {
        self.header
    }

    /// Returns the logical length including buffered bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.out.offset()
    }

    /// Returns true if the segment holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= HEADER_SIZE
    }

    /// Appends a record and returns the offset it starts at.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the buffered write fails.
    pub fn write_record(&mut self, record: &LogRecord) -> ThlResult<u64> {
        let offset = self.out.offset();
        let bytes = record.encode(self.header.checksums)?;
        self.out.write_bytes(&bytes)?;
        Ok(offset)
    }

    /// Makes every appended record durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails; the data is then not durable.
    pub fn fsync(&mut self) -> ThlResult<()> {
        self.out.fsync()?;
        Ok(())
    }

    /// Cuts the segment back to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `len` would remove the header or truncation fails.
    pub fn truncate(&mut self, len: u64) -> ThlResult<()> {
        if len < HEADER_SIZE {
            return Err(ThlError::invalid_operation(format!(
                "cannot truncate segment {} into its header",
                self.name
            )));
        }
        self.out.set_length(len)?;
        Ok(())
    }

    /// Flushes buffered records to the OS and closes the file.
    ///
    /// Flushed data is not durable until a later fsync or the OS writes it
    /// back; committed data is already synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn close(mut self) -> ThlResult<()> {
        self.out.flush()?;
        tracing::debug!(file = %self.name, len = self.out.offset(), "closed segment");
        Ok(())
    }
}

/// Outcome of reading at an offset.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete record and the offset just past it.
    Record {
        /// The record.
        record: LogRecord,
        /// Offset of the following record.
        next_offset: u64,
    },
    /// The record at this offset is not (fully) readable yet.
    Pending,
}

/// The read side of a segment.
#[derive(Debug)]
pub struct SegmentReader {
    index: u64,
    name: String,
    header: SegmentHeader,
    input: BufferedFileReader,
    verify: bool,
}

impl SegmentReader {
    /// Opens a segment for reading and validates its header.
    ///
    /// `verify` enables checksum verification for segments that carry
    /// checksums.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the header is bad.
    pub fn open_read(path: &Path, verify: bool) -> ThlResult<Self> {
        let name = file_name_of(path)?;
        let index = parse_segment_index(&name)
            .ok_or_else(|| ThlError::config(format!("not a segment file: {name}")))?;
        let mut input = BufferedFileReader::open(path)?;
        let header = SegmentHeader::read(&mut input, &name)?;

        Ok(Self {
            index,
            name,
            header,
            input,
            verify,
        })
    }

    /// Returns the segment index.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the header.
    #[must_use]
    pub fn header(&self) -> SegmentHeader {
        self.header
    }

    /// Returns the current file length on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata cannot be read.
    pub fn file_len(&self) -> ThlResult<u64> {
        Ok(self.input.len()?)
    }

    /// Reads the record at `offset`, never looking past `limit`.
    ///
    /// A record that is incomplete within `limit` yields
    /// [`ReadOutcome::Pending`]; torn data is never returned.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Corruption`] for a malformed length and
    /// [`ThlError::ChecksumMismatch`] for a bad checksum.
    pub fn read_record(&mut self, offset: u64, limit: u64) -> ThlResult<ReadOutcome> {
        if offset + LENGTH_PREFIX_SIZE > limit {
            return Ok(ReadOutcome::Pending);
        }

        self.input.seek(offset)?;
        let length = match self.input.read_u32() {
            Ok(length) => length,
            Err(e) if e.is_read_past_end() => return Ok(ReadOutcome::Pending),
            Err(e) => return Err(e.into()),
        };
        LogRecord::check_length(length, self.header.checksums, &self.name, offset)?;

        let next_offset = offset + LENGTH_PREFIX_SIZE + u64::from(length);
        if next_offset > limit {
            return Ok(ReadOutcome::Pending);
        }

        let mut body = vec![0u8; length as usize];
        match self.input.read_fully(&mut body) {
            Ok(()) => {}
            Err(e) if e.is_read_past_end() => return Ok(ReadOutcome::Pending),
            Err(e) => return Err(e.into()),
        }

        let record = LogRecord::decode_body(
            &body,
            self.header.checksums,
            self.verify,
            &self.name,
            offset,
        )?;
        Ok(ReadOutcome::Record {
            record,
            next_offset,
        })
    }

    /// Walks every complete record up to `limit` and summarizes the segment.
    ///
    /// With `strict` set, out-of-order events and records following a
    /// ROTATE record are reported as [`ThlError::Consistency`]; otherwise
    /// they are tolerated.
    ///
    /// # Errors
    ///
    /// Returns corruption errors from [`read_record`](Self::read_record),
    /// payload errors from the codec, and ordering errors in strict mode.
    pub fn scan(&mut self, codec: &EventCodec, limit: u64, strict: bool) -> ThlResult<SegmentScan> {
        self.scan_from(codec, HEADER_SIZE, limit, strict)
    }

    /// Like [`scan`](Self::scan), but starts at `offset`, which must be a
    /// record boundary.
    ///
    /// Offsets in the result are absolute; counts and seqnos only cover the
    /// records from `offset` on.
    ///
    /// # Errors
    ///
    /// Same as [`scan`](Self::scan).
    pub fn scan_from(
        &mut self,
        codec: &EventCodec,
        offset: u64,
        limit: u64,
        strict: bool,
    ) -> ThlResult<SegmentScan> {
        let mut scan = SegmentScan::starting_at(offset);
        let mut offset = offset;

        while let ReadOutcome::Record {
            record,
            next_offset,
        } = self.read_record(offset, limit)?
        {
            if strict && scan.rotate_next.is_some() {
                return Err(ThlError::consistency(format!(
                    "record found after rotate in {} at offset {offset}",
                    self.name
                )));
            }

            match codec.decode(&record)? {
                LogEntry::Event(event) => {
                    let start = event.start_position();
                    if strict && event.end_position() < start {
                        return Err(ThlError::consistency(format!(
                            "event {start} ends before it starts ({}) in {} at offset {offset}",
                            event.end_position(),
                            self.name
                        )));
                    }
                    if let Some(last) = scan.last_position {
                        if start <= last && strict {
                            return Err(ThlError::consistency(format!(
                                "event {start} follows {last} in {} at offset {offset}",
                                self.name
                            )));
                        }
                    }
                    if scan.first_seqno == NO_SEQNO {
                        scan.first_seqno = event.seqno();
                    }
                    scan.last_position = Some(event.end_position());
                    if event.last_frag() {
                        scan.last_seqno = event.last_seqno();
                        scan.committed_offset = next_offset;
                    }
                    scan.events += 1;
                }
                LogEntry::Rotate(next) => {
                    scan.rotate_next = Some(next);
                    scan.committed_offset = next_offset;
                }
            }
            scan.end_offset = next_offset;
            offset = next_offset;
        }

        scan.torn = scan.end_offset < limit;
        Ok(scan)
    }

    /// Finds where to cut the segment so it keeps only events below `seqno`.
    ///
    /// The cut never leaves a partial transaction or a ROTATE record behind.
    /// Returns the cut offset and the last complete seqno kept.
    ///
    /// # Errors
    ///
    /// Returns read and decode errors.
    pub fn cut_point(&mut self, codec: &EventCodec, seqno: i64, limit: u64) -> ThlResult<(u64, i64)> {
        let mut offset = HEADER_SIZE;
        let mut cut = HEADER_SIZE;
        let mut last_kept = NO_SEQNO;

        while let ReadOutcome::Record {
            record,
            next_offset,
        } = self.read_record(offset, limit)?
        {
            if record.record_type == RecordType::Rotate {
                break;
            }
            let event = codec.decode_event(&record)?;
            if event.last_seqno() >= seqno {
                break;
            }
            if event.last_frag() {
                cut = next_offset;
                last_kept = event.last_seqno();
            }
            offset = next_offset;
        }

        Ok((cut, last_kept))
    }
}

/// Summary of a segment produced by [`SegmentReader::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentScan {
    /// Number of event records.
    pub events: u64,
    /// Seqno of the first event, or [`NO_SEQNO`].
    pub first_seqno: i64,
    /// Highest seqno completed by a last fragment, or [`NO_SEQNO`].
    pub last_seqno: i64,
    /// End position of the last event of any kind.
    pub last_position: Option<LogPosition>,
    /// Offset just past the last complete record.
    pub end_offset: u64,
    /// Offset just past the last completed transaction or rotate record.
    pub committed_offset: u64,
    /// Target of a trailing ROTATE record.
    pub rotate_next: Option<u64>,
    /// True if bytes follow the last complete record.
    pub torn: bool,
}

impl SegmentScan {
    fn starting_at(offset: u64) -> Self {
        Self {
            events: 0,
            first_seqno: NO_SEQNO,
            last_seqno: NO_SEQNO,
            last_position: None,
            end_offset: offset,
            committed_offset: offset,
            rotate_next: None,
            torn: false,
        }
    }

    /// Returns true if the segment ends with a ROTATE record.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.rotate_next.is_some()
    }

    /// Returns true if data follows the last completed transaction.
    #[must_use]
    pub fn has_partial_tail(&self, file_len: u64) -> bool {
        self.committed_offset < file_len
    }
}

fn file_name_of(path: &Path) -> ThlResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| ThlError::config(format!("invalid segment path: {}", path.display())))
}

/// Returns the path of segment `index` in `dir`.
#[must_use]
pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(segment_file_name(index))
}

/// Syncs a directory so file creations and deletions are durable.
#[cfg(unix)]
pub(crate) fn sync_directory(dir: &Path) -> ThlResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_dir: &Path) -> ThlResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LogEvent, ReplEvent};
    use crate::serializer::BinarySerializer;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn codec() -> EventCodec {
        EventCodec::new(Arc::new(BinarySerializer))
    }

    fn write_events(writer: &mut SegmentWriter, codec: &EventCodec, seqnos: std::ops::Range<i64>) {
        for seqno in seqnos {
            let event = LogEvent::change(seqno, vec![seqno as u8; 8]);
            writer.write_record(&codec.encode_event(&event).unwrap()).unwrap();
        }
    }

    #[test]
    fn file_names_sort_in_log_order() {
        assert_eq!(segment_file_name(1), "thl.data.0000000001");
        assert_eq!(parse_segment_index("thl.data.0000000042"), Some(42));
        assert_eq!(parse_segment_index("thl.data."), None);
        assert_eq!(parse_segment_index("thl.data.12a"), None);
        assert_eq!(parse_segment_index("disklog.lck"), None);
        assert!(segment_file_name(9) < segment_file_name(10));
    }

    #[test]
    fn create_writes_header() {
        let dir = tempdir().unwrap();
        let writer = SegmentWriter::create(dir.path(), 1, 100, true, 1024).unwrap();
        assert_eq!(writer.len(), HEADER_SIZE);
        assert!(writer.is_empty());

        let reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        assert_eq!(reader.header().base_seqno, 100);
        assert!(reader.header().checksums);
        assert_eq!(reader.index(), 1);
    }

    #[test]
    fn close_flushes_buffered_records() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1 << 16).unwrap();
        write_events(&mut writer, &codec, 0..3);
        let len = writer.len();
        writer.close().unwrap();

        let reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        assert_eq!(reader.file_len().unwrap(), len);
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        assert!(SegmentWriter::create(dir.path(), 1, 0, true, 1024).is_err());
    }

    #[test]
    fn bad_magic_is_corruption() {
        let dir = tempdir().unwrap();
        let path = segment_path(dir.path(), 3);
        std::fs::write(&path, [0u8; 17]).unwrap();

        let err = SegmentReader::open_read(&path, true).unwrap_err();
        assert!(matches!(err, ThlError::Corruption { .. }));
    }

    #[test]
    fn write_then_read_records() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        write_events(&mut writer, &codec, 0..3);
        writer.fsync().unwrap();
        let limit = writer.len();

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        let mut offset = HEADER_SIZE;
        for expected in 0..3 {
            match reader.read_record(offset, limit).unwrap() {
                ReadOutcome::Record {
                    record,
                    next_offset,
                } => {
                    assert_eq!(codec.decode_event(&record).unwrap().seqno(), expected);
                    offset = next_offset;
                }
                ReadOutcome::Pending => panic!("record {expected} missing"),
            }
        }
        assert!(matches!(
            reader.read_record(offset, limit).unwrap(),
            ReadOutcome::Pending
        ));
    }

    #[test]
    fn unsynced_records_are_pending() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, false, 1 << 16).unwrap();
        write_events(&mut writer, &codec, 0..1);

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        // Buffered bytes are not on disk even with a generous limit.
        assert!(matches!(
            reader.read_record(HEADER_SIZE, writer.len()).unwrap(),
            ReadOutcome::Pending
        ));
    }

    #[test]
    fn scan_finds_partial_transaction() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        write_events(&mut writer, &codec, 0..2);
        let committed = writer.len();
        for fragno in 0..2 {
            let event = LogEvent::new(2, fragno, false, ReplEvent::Change(vec![1]));
            writer.write_record(&codec.encode_event(&event).unwrap()).unwrap();
        }
        writer.fsync().unwrap();
        let len = writer.len();

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        let scan = reader.scan(&codec, len, true).unwrap();
        assert_eq!(scan.events, 4);
        assert_eq!(scan.first_seqno, 0);
        assert_eq!(scan.last_seqno, 1);
        assert_eq!(scan.committed_offset, committed);
        assert_eq!(scan.end_offset, len);
        assert!(!scan.torn);
        assert!(scan.has_partial_tail(len));
    }

    #[test]
    fn scan_flags_torn_record() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        write_events(&mut writer, &codec, 0..2);
        writer.fsync().unwrap();
        let good = writer.len();
        writer.write_bytes_for_test(&[0, 0, 0, 40, 1, 2]);
        writer.fsync().unwrap();

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        let len = reader.file_len().unwrap();
        let scan = reader.scan(&codec, len, false).unwrap();
        assert_eq!(scan.end_offset, good);
        assert!(scan.torn);
    }

    #[test]
    fn scan_records_rotate() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 4, 0, true, 1024).unwrap();
        write_events(&mut writer, &codec, 0..2);
        writer.write_record(&codec.encode_rotate(5)).unwrap();
        writer.fsync().unwrap();

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 4), true).unwrap();
        let scan = reader.scan(&codec, writer.len(), true).unwrap();
        assert!(scan.is_sealed());
        assert_eq!(scan.rotate_next, Some(5));
        assert_eq!(scan.committed_offset, writer.len());
    }

    #[test]
    fn strict_scan_rejects_out_of_order_events() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        write_events(&mut writer, &codec, 5..6);
        write_events(&mut writer, &codec, 3..4);
        writer.fsync().unwrap();

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        assert!(reader.scan(&codec, writer.len(), false).is_ok());
        let err = reader.scan(&codec, writer.len(), true).unwrap_err();
        assert!(matches!(err, ThlError::Consistency { .. }));
    }

    #[test]
    fn strict_scan_rejects_backwards_filtered_range() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        let event = LogEvent::filtered(10, 5, 0);
        writer.write_record(&codec.encode_event(&event).unwrap()).unwrap();
        writer.fsync().unwrap();

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        let err = reader.scan(&codec, writer.len(), true).unwrap_err();
        assert!(matches!(err, ThlError::Consistency { .. }));
    }

    #[test]
    fn scan_from_picks_up_appended_records() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        write_events(&mut writer, &codec, 0..2);
        writer.fsync().unwrap();
        let first = writer.len();
        write_events(&mut writer, &codec, 2..5);
        writer.fsync().unwrap();

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        let scan = reader.scan_from(&codec, first, writer.len(), false).unwrap();
        assert_eq!(scan.events, 3);
        assert_eq!(scan.first_seqno, 2);
        assert_eq!(scan.last_seqno, 4);
        assert_eq!(scan.committed_offset, writer.len());

        let idle = reader.scan_from(&codec, writer.len(), writer.len(), false).unwrap();
        assert_eq!(idle.events, 0);
        assert_eq!(idle.committed_offset, writer.len());
    }

    #[test]
    fn cut_point_keeps_lower_events() {
        let dir = tempdir().unwrap();
        let codec = codec();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        write_events(&mut writer, &codec, 0..5);
        writer.write_record(&codec.encode_rotate(2)).unwrap();
        writer.fsync().unwrap();

        let mut reader = SegmentReader::open_read(&segment_path(dir.path(), 1), true).unwrap();
        let (cut, last) = reader.cut_point(&codec, 3, writer.len()).unwrap();
        assert_eq!(last, 2);

        writer.truncate(cut).unwrap();
        let scan = reader.scan(&codec, writer.len(), true).unwrap();
        assert_eq!(scan.last_seqno, 2);
        assert!(!scan.is_sealed());

        // A cut past every event still removes the rotate record.
        let (cut_all, last_all) = reader.cut_point(&codec, 100, writer.len()).unwrap();
        assert_eq!(cut_all, writer.len());
        assert_eq!(last_all, 2);
    }

    #[test]
    fn truncate_refuses_header() {
        let dir = tempdir().unwrap();
        let mut writer = SegmentWriter::create(dir.path(), 1, 0, true, 1024).unwrap();
        assert!(writer.truncate(HEADER_SIZE - 1).is_err());
        assert!(writer.truncate(HEADER_SIZE).is_ok());
    }

    impl SegmentWriter {
        fn write_bytes_for_test(&mut self, bytes: &[u8]) {
            self.out.write_bytes(bytes).unwrap();
        }
    }
}
