//! Crash simulation for the THL disk log.
//!
//! These helpers damage the files of a log that is not currently open, the
//! way an interrupted process or a failing disk would, so tests can check
//! what recovery keeps and what it discards.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use thl_testkit::crash::{simulate_crash, CrashPoint};
//!
//! let log = scenarios::populated_log(10);
//! let dir = log.dir().to_path_buf();
//! // release the log, then:
//! simulate_crash(&dir, CrashPoint::TornRecord).unwrap();
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thl_core::{
    parse_segment_index, BinarySerializer, EventCodec, LogEvent, ReplEvent, SegmentWriter,
    ThlResult,
};

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The process died halfway through writing a record.
    TornRecord,
    /// The process died between fragments of a transaction.
    PartialTransaction,
    /// The process died while creating a new segment.
    TornSegmentHeader,
}

/// Returns the segment files in `dir`, oldest first.
pub fn segment_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let index = entry.file_name().to_str().and_then(parse_segment_index)?;
            Some((index, entry.path()))
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Returns the newest segment file in `dir`.
pub fn newest_segment(dir: &Path) -> io::Result<PathBuf> {
    segment_files(dir)?
        .pop()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "log has no segments"))
}

/// Appends raw bytes to a file.
pub fn append_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_data()
}

/// Removes the last `count` bytes of a file.
pub fn chop_tail(path: &Path, count: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    file.set_len(len.saturating_sub(count))?;
    file.sync_data()
}

/// Flips the bits of the byte `back` bytes before the end of a file.
pub fn flip_byte_from_end(path: &Path, back: usize) -> io::Result<()> {
    let mut bytes = fs::read(path)?;
    let pos = bytes
        .len()
        .checked_sub(back)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file too short"))?;
    bytes[pos] ^= 0xff;
    fs::write(path, &bytes)
}

/// Appends the first `fragments` fragments of transaction `seqno` to the
/// newest segment without its last fragment.
pub fn append_partial_transaction(dir: &Path, seqno: i64, fragments: i16) -> ThlResult<()> {
    let path = newest_segment(dir)?;
    let codec = EventCodec::new(Arc::new(BinarySerializer));
    let mut writer = SegmentWriter::open_write(&path, 4096)?;
    for fragno in 0..fragments {
        let event = LogEvent::new(seqno, fragno, false, ReplEvent::Change(vec![0xab; 32]));
        writer.write_record(&codec.encode_event(&event)?)?;
    }
    writer.fsync()
}

/// Damages the log in `dir` as a crash at `point` would.
///
/// The log must not be open in this process.
pub fn simulate_crash(dir: &Path, point: CrashPoint) -> ThlResult<()> {
    match point {
        CrashPoint::TornRecord => {
            let path = newest_segment(dir)?;
            // A length prefix promising far more than follows.
            append_bytes(&path, &[0, 0, 0, 200, 1, 0, 0])?;
        }
        CrashPoint::PartialTransaction => {
            let next = next_seqno(dir)?;
            append_partial_transaction(dir, next, 2)?;
        }
        CrashPoint::TornSegmentHeader => {
            let newest = newest_segment(dir)?;
            let index = newest
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(parse_segment_index)
                .unwrap_or(0);
            let path = dir.join(thl_core::segment_file_name(index + 1));
            fs::write(path, thl_core::SEGMENT_MAGIC.to_be_bytes())?;
        }
    }
    Ok(())
}

fn next_seqno(dir: &Path) -> ThlResult<i64> {
    let path = newest_segment(dir)?;
    let codec = EventCodec::new(Arc::new(BinarySerializer));
    let mut reader = thl_core::SegmentReader::open_read(&path, false)?;
    let len = reader.file_len()?;
    let scan = reader.scan(&codec, len, false)?;
    Ok(scan
        .last_position
        .map_or(reader.header().base_seqno, |last| last.seqno + 1))
}
