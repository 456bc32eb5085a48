//! The disk log: an ordered set of segment files forming one logical log.
//!
//! ## Layout
//!
//! ```text
//! <log_dir>/
//! ├─ disklog.lck            # Advisory lock held by the writing process
//! ├─ thl.data.0000000001    # Oldest segment
//! ├─ thl.data.0000000002
//! └─ thl.data.0000000003    # Active segment
//! ```
//!
//! ## Commit Visibility
//!
//! Stores land in the active segment's write buffer. Only a commit (explicit,
//! or implicit once the flush interval has elapsed) fsyncs them and
//! publishes the new committed length to readers. `max_seqno` moves only
//! when a committed record completes its transaction. Uncommitted records
//! never reach the segment files, so a reopened log and a read-only
//! instance in another process both see only committed data.
//!
//! ## Read-only Instances
//!
//! An instance without the write lock cannot be notified by the writing
//! process. Its connections re-read the segment files when they seek and
//! poll them with backoff while waiting for data.
//!
//! ## Recovery
//!
//! At prepare time the last segment is scanned. Torn records and any
//! trailing transaction without its last fragment are cut off. A last
//! segment that ends in a ROTATE record whose successor is missing gets the
//! successor created.
//!
//! ## Locking
//!
//! Locks are always taken in this order:
//!
//! 1. `writer` - the active segment writer
//! 2. `files` - shared by readers, exclusive for deletions
//! 3. `state` - segment index and connection registry

use crate::codec::EventCodec;
use crate::config::LogConfig;
use crate::connection::LogConnection;
use crate::error::{ThlError, ThlResult};
use crate::event::{LogEvent, LogPosition, NO_SEQNO};
use crate::index::{SegmentIndex, SegmentMeta};
use crate::lock::WriteLock;
use crate::maintenance::MaintenanceTask;
use crate::segment::{
    parse_segment_index, segment_path, sync_directory, SegmentReader, SegmentWriter, HEADER_SIZE,
};
use crate::serializer::{serializer_for, EventSerializer};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

/// Per-connection bookkeeping visible to structural operations.
#[derive(Debug, Default)]
pub(crate) struct ConnSlot {
    /// Segment the connection is currently reading.
    pub(crate) segment: Option<u64>,
    /// Set when a deletion removed data under the connection's position.
    pub(crate) invalidated: bool,
    /// Set when the connection was released from any thread.
    pub(crate) released: bool,
}

/// State guarded by the `state` mutex.
#[derive(Debug)]
pub(crate) struct LogState {
    pub(crate) index: SegmentIndex,
    pub(crate) min_seqno: i64,
    pub(crate) max_seqno: i64,
    next_file_index: u64,
    /// Bumped on every commit and structural change; readers wait on it.
    pub(crate) generation: u64,
    active_seqno: Option<i64>,
    writer_conn: Option<u64>,
    pub(crate) connections: HashMap<u64, ConnSlot>,
}

impl LogState {
    fn refresh_bounds(&mut self) {
        self.min_seqno = self.index.min_seqno();
        self.max_seqno = self.index.max_seqno();
    }

    fn invalidate_readers(&mut self, affected: impl Fn(u64) -> bool) {
        for slot in self.connections.values_mut() {
            if slot.segment.is_some_and(&affected) {
                slot.invalidated = true;
                slot.segment = None;
            }
        }
    }
}

/// The open segment being appended to.
#[derive(Debug)]
struct ActiveWriter {
    segment: SegmentWriter,
    dirty: bool,
    /// Seqno completed by the last stored last fragment, not yet committed.
    pending_max: i64,
    last_commit: Instant,
}

impl ActiveWriter {
    fn new(segment: SegmentWriter) -> Self {
        Self {
            segment,
            dirty: false,
            pending_max: NO_SEQNO,
            last_commit: Instant::now(),
        }
    }
}

/// State guarded by the `writer` mutex.
#[derive(Debug, Default)]
pub(crate) struct WriterSlot {
    active: Option<ActiveWriter>,
    /// End position of the last stored record.
    last_end: Option<LogPosition>,
    /// True between a first fragment and its last fragment.
    txn_open: bool,
}

/// Everything shared between a [`DiskLog`] and its connections.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: LogConfig,
    pub(crate) codec: EventCodec,
    pub(crate) writable: bool,
    pub(crate) state: Mutex<LogState>,
    pub(crate) data_ready: Condvar,
    writer: Mutex<WriterSlot>,
    pub(crate) files: RwLock<()>,
    write_lock: Mutex<Option<WriteLock>>,
    pub(crate) released: AtomicBool,
    next_conn_id: AtomicU64,
}

/// Result of [`DiskLog::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Segments checked.
    pub segments: usize,
    /// Event records checked.
    pub events: u64,
    /// Lowest committed seqno.
    pub min_seqno: i64,
    /// Highest committed seqno.
    pub max_seqno: i64,
}

/// A segmented, append-only transaction history log.
///
/// # Thread Safety
///
/// `DiskLog` is `Send + Sync`. Any number of read connections may be used
/// concurrently from different threads; at most one write connection exists
/// at a time.
///
/// # Example
///
/// ```rust,no_run
/// use thl_core::{DiskLog, LogConfig, LogEvent};
///
/// let log = DiskLog::prepare(LogConfig::new("/var/lib/thl"))?;
/// let mut writer = log.connect(false)?;
/// writer.store(&LogEvent::change(0, b"insert".to_vec()), true)?;
///
/// let mut reader = log.connect(true)?;
/// assert!(reader.seek_seqno(0)?);
/// let event = reader.next(true)?.expect("event 0");
/// assert_eq!(event.seqno(), 0);
/// # Ok::<(), thl_core::ThlError>(())
/// ```
#[derive(Debug)]
pub struct DiskLog {
    shared: Arc<Shared>,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

impl DiskLog {
    /// Opens the log described by `config`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Config`] if the directory cannot be created, or
    /// if a read-only log has no segments. Returns corruption errors if
    /// existing segments cannot be scanned.
    pub fn prepare(config: LogConfig) -> ThlResult<Self> {
        let serializer = serializer_for(config.serializer);
        Self::prepare_with_serializer(config, serializer)
    }

    /// Opens the log with a caller-supplied payload serializer.
    ///
    /// # Errors
    ///
    /// Same as [`prepare`](Self::prepare).
    pub fn prepare_with_serializer(
        config: LogConfig,
        serializer: Arc<dyn EventSerializer>,
    ) -> ThlResult<Self> {
        config.validate()?;
        let dir = config.log_dir.clone();

        if !dir.exists() {
            if config.read_only {
                return Err(ThlError::config(format!(
                    "log directory does not exist: {}",
                    dir.display()
                )));
            }
            fs::create_dir_all(&dir).map_err(|e| {
                ThlError::config(format!(
                    "cannot create log directory {}: {e}",
                    dir.display()
                ))
            })?;
        }
        if !dir.is_dir() {
            return Err(ThlError::config(format!(
                "log path is not a directory: {}",
                dir.display()
            )));
        }

        let write_lock = if config.read_only {
            None
        } else {
            WriteLock::try_acquire(&dir)?
        };
        let writable = write_lock.is_some();
        if !config.read_only && !writable {
            warn!(dir = %dir.display(), "write lock unavailable, opening log read-only");
        }

        let codec = EventCodec::new(serializer);
        let (index, next_file_index) = recover(&config, &codec, writable)?;
        if index.is_empty() && !writable {
            return Err(ThlError::config(format!(
                "read-only log has no segments: {}",
                dir.display()
            )));
        }

        let mut state = LogState {
            index,
            min_seqno: NO_SEQNO,
            max_seqno: NO_SEQNO,
            next_file_index,
            generation: 0,
            active_seqno: None,
            writer_conn: None,
            connections: HashMap::new(),
        };
        state.refresh_bounds();

        info!(
            dir = %dir.display(),
            writable,
            segments = state.index.len(),
            min_seqno = state.min_seqno,
            max_seqno = state.max_seqno,
            "prepared log"
        );

        let writer = WriterSlot {
            active: None,
            last_end: end_of_log(state.max_seqno),
            txn_open: false,
        };
        let shared = Arc::new(Shared {
            config,
            codec,
            writable,
            state: Mutex::new(state),
            data_ready: Condvar::new(),
            writer: Mutex::new(writer),
            files: RwLock::new(()),
            write_lock: Mutex::new(write_lock),
            released: AtomicBool::new(false),
            next_conn_id: AtomicU64::new(1),
        });

        let maintenance = if writable && shared.config.needs_maintenance() {
            Some(MaintenanceTask::start(&shared)?)
        } else {
            None
        };

        Ok(Self {
            shared,
            maintenance: Mutex::new(maintenance),
        })
    }

    /// Opens a connection.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::WriterAlreadyHeld`] if a write connection is
    /// requested while another exists, and [`ThlError::ReadOnly`] if the log
    /// itself is read-only.
    pub fn connect(&self, read_only: bool) -> ThlResult<LogConnection> {
        if self.shared.released.load(Ordering::Acquire) {
            return Err(ThlError::Released);
        }
        if !read_only && !self.shared.writable {
            return Err(ThlError::read_only("log was opened without the write lock"));
        }
        let id = self.shared.register(!read_only)?;
        debug!(connection = id, read_only, "opened log connection");
        Ok(LogConnection::new(Arc::clone(&self.shared), id, read_only))
    }

    /// Picks up what the process holding the write lock has committed,
    /// created or deleted since this instance last looked.
    ///
    /// Read connections of a read-only instance do this on their own when
    /// they seek or run out of data. Returns true if anything changed; a
    /// writable instance always returns false.
    ///
    /// # Errors
    ///
    /// Returns I/O and corruption errors from reading the segment files.
    pub fn refresh(&self) -> ThlResult<bool> {
        self.shared.refresh()
    }

    /// Returns the configuration the log was prepared with.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.shared.config
    }

    /// Returns true if this instance holds the write lock.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.shared.writable
    }

    /// Returns the number of segment files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.shared.state.lock().index.len()
    }

    /// Returns segment file names, oldest first.
    #[must_use]
    pub fn log_file_names(&self) -> Vec<String> {
        self.shared.state.lock().index.file_names()
    }

    /// Returns metadata for every segment, oldest first.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentMeta> {
        self.shared.state.lock().index.snapshot()
    }

    /// Returns the lowest committed seqno, or -1 if the log is empty.
    #[must_use]
    pub fn min_seqno(&self) -> i64 {
        self.shared.state.lock().min_seqno
    }

    /// Returns the highest committed seqno, or -1 if the log is empty.
    #[must_use]
    pub fn max_seqno(&self) -> i64 {
        self.shared.state.lock().max_seqno
    }

    /// Records the seqno downstream consumers still need.
    ///
    /// Retention never purges a segment holding this seqno or anything
    /// after it.
    pub fn set_active_seqno(&self, seqno: i64) {
        self.shared.state.lock().active_seqno = Some(seqno);
    }

    /// Runs the retention sweep now and returns the number of segments
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Busy`] if nothing could be deleted because a
    /// reader is positioned in the oldest expired segment.
    pub fn purge_expired(&self) -> ThlResult<usize> {
        self.shared.purge_expired()
    }

    /// Verifies checksums, ordering and segment linkage of the whole log.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: [`ThlError::ChecksumMismatch`],
    /// [`ThlError::Corruption`] or [`ThlError::Consistency`].
    pub fn validate(&self) -> ThlResult<ValidationReport> {
        self.shared.validate()
    }

    /// Commits pending writes, interrupts every connection and drops the
    /// write lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the final commit fails. The log is released
    /// regardless.
    pub fn release(&self) -> ThlResult<()> {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(task) = self.maintenance.lock().take() {
            task.stop();
        }

        let result = {
            let mut slot = self.shared.writer.lock();
            let result = self.shared.commit_locked(&mut slot);
            match slot.active.take() {
                Some(active) if result.is_ok() => active.segment.close(),
                _ => result,
            }
        };

        {
            let mut state = self.shared.state.lock();
            for slot in state.connections.values_mut() {
                slot.released = true;
                slot.segment = None;
            }
            state.writer_conn = None;
            state.generation += 1;
        }
        self.shared.data_ready.notify_all();
        self.shared.write_lock.lock().take();

        info!(dir = %self.shared.config.log_dir.display(), "released log");
        result
    }
}

impl Drop for DiskLog {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "failed to release log cleanly");
        }
    }
}

/// Returns the last-stored position implied by a committed maximum.
///
/// A completed transaction admits no further fragments.
fn end_of_log(max_seqno: i64) -> Option<LogPosition> {
    (max_seqno != NO_SEQNO).then(|| LogPosition::end_of(max_seqno))
}

/// Returns the segment files in `dir`, ordered by segment index.
fn list_segment_files(dir: &Path) -> ThlResult<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_segment_index) {
            files.push((index, entry.path()));
        }
    }
    files.sort_by_key(|(index, _)| *index);
    Ok(files)
}

/// Rebuilds the segment index from the directory and repairs the tail.
fn recover(
    config: &LogConfig,
    codec: &EventCodec,
    writable: bool,
) -> ThlResult<(SegmentIndex, u64)> {
    let dir = &config.log_dir;
    let files = list_segment_files(dir)?;

    let next_file_index = files.last().map_or(1, |(index, _)| index + 1);
    let mut index = SegmentIndex::new();
    let mut trailing_rotate = None;
    let count = files.len();

    for (pos, (seg_index, path)) in files.into_iter().enumerate() {
        let is_last = pos + 1 == count;
        let file_len = fs::metadata(&path)?.len();

        if file_len < HEADER_SIZE {
            if !is_last {
                return Err(ThlError::corruption(format!(
                    "segment {} has a truncated header",
                    path.display()
                )));
            }
            if writable {
                warn!(file = %path.display(), "removing segment with torn header");
                fs::remove_file(&path)?;
                sync_directory(dir)?;
            }
            continue;
        }

        // Framing only; checksums are verified by readers and validate().
        let mut reader = SegmentReader::open_read(&path, false)?;
        let scan = reader.scan(codec, file_len, false)?;
        let header = reader.header();

        if is_last && scan.has_partial_tail(file_len) {
            if writable {
                info!(
                    file = reader.name(),
                    from = scan.committed_offset,
                    to = file_len,
                    "discarding incomplete log tail"
                );
                let mut writer = SegmentWriter::open_write(&path, config.buffer_size)?;
                writer.truncate(scan.committed_offset)?;
            } else {
                debug!(file = reader.name(), "ignoring incomplete tail of read-only log");
            }
        } else if !is_last && !scan.is_sealed() {
            warn!(file = reader.name(), "segment before the log tail is not sealed");
        }

        trailing_rotate = scan.rotate_next;
        index.push(SegmentMeta {
            index: seg_index,
            file_name: reader.name().to_string(),
            path,
            base_seqno: header.base_seqno,
            last_seqno: scan.last_seqno,
            committed_len: scan.committed_offset,
            sealed: scan.is_sealed(),
            checksums: header.checksums,
        });
    }

    let mut next_file_index = next_file_index;
    if let (Some(next), true) = (trailing_rotate, writable) {
        let base_seqno = index.max_seqno() + 1;
        warn!(segment = next, base_seqno, "creating segment missing after rotate");
        let segment = SegmentWriter::create(
            dir,
            next,
            base_seqno,
            config.checksums,
            config.buffer_size,
        )?;
        index.push(new_segment_meta(&segment, dir, base_seqno));
        next_file_index = next_file_index.max(next + 1);
    }

    Ok((index, next_file_index))
}

fn new_segment_meta(segment: &SegmentWriter, dir: &Path, base_seqno: i64) -> SegmentMeta {
    SegmentMeta {
        index: segment.index(),
        file_name: segment.name().to_string(),
        path: segment_path(dir, segment.index()),
        base_seqno,
        last_seqno: NO_SEQNO,
        committed_len: HEADER_SIZE,
        sealed: false,
        checksums: segment.header().checksums,
    }
}

impl Shared {
    pub(crate) fn register(&self, writer: bool) -> ThlResult<u64> {
        let mut state = self.state.lock();
        if writer && state.writer_conn.is_some() {
            return Err(ThlError::WriterAlreadyHeld);
        }
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        state.connections.insert(id, ConnSlot::default());
        if writer {
            state.writer_conn = Some(id);
        }
        Ok(id)
    }

    /// Marks a connection released and wakes any call it has parked.
    pub(crate) fn release_connection(&self, id: u64) {
        {
            let mut state = self.state.lock();
            if let Some(slot) = state.connections.get_mut(&id) {
                slot.released = true;
                slot.segment = None;
            }
            if state.writer_conn == Some(id) {
                state.writer_conn = None;
            }
            state.generation += 1;
        }
        self.data_ready.notify_all();
    }

    pub(crate) fn unregister(&self, id: u64) {
        let mut state = self.state.lock();
        state.connections.remove(&id);
        if state.writer_conn == Some(id) {
            state.writer_conn = None;
        }
    }

    /// Catches a read-only instance up with the files the writing process
    /// has committed, created or deleted since the last look.
    ///
    /// Returns true if anything changed. A writable instance already knows
    /// its own state and returns false at once.
    pub(crate) fn refresh(&self) -> ThlResult<bool> {
        if self.writable {
            return Ok(false);
        }

        let mut state = self.state.lock();
        let mut changed = false;

        // Segments removed from either end of the log.
        while let Some(first) = state.index.first() {
            if first.path.exists() {
                break;
            }
            let gone = first.index;
            state.index.pop_front();
            state.invalidate_readers(|segment| segment <= gone);
            changed = true;
        }
        while let Some(last) = state.index.last() {
            if last.path.exists() {
                break;
            }
            let gone = last.index;
            state.index.pop_back();
            state.invalidate_readers(|segment| segment >= gone);
            changed = true;
        }

        // Commits into segments that were still open.
        let open: Vec<SegmentMeta> = state.index.iter().filter(|m| !m.sealed).cloned().collect();
        for meta in open {
            let mut reader = SegmentReader::open_read(&meta.path, false)?;
            let file_len = reader.file_len()?;
            if file_len == meta.committed_len {
                continue;
            }
            let (scan, cut) = if file_len < meta.committed_len {
                (reader.scan(&self.codec, file_len, false)?, true)
            } else {
                let scan = reader.scan_from(&self.codec, meta.committed_len, file_len, false)?;
                (scan, false)
            };
            if !cut && scan.committed_offset == meta.committed_len {
                continue;
            }
            if let Some(entry) = state.index.by_index_mut(meta.index) {
                entry.committed_len = scan.committed_offset;
                if cut || scan.last_seqno != NO_SEQNO {
                    entry.last_seqno = scan.last_seqno;
                }
                entry.sealed = scan.is_sealed();
            }
            if cut {
                state.invalidate_readers(|segment| segment >= meta.index);
            }
            changed = true;
        }

        // Segments created since.
        let newest = state.index.last().map_or(0, |m| m.index);
        for (index, path) in list_segment_files(&self.config.log_dir)? {
            if index <= newest {
                continue;
            }
            if fs::metadata(&path)?.len() < HEADER_SIZE {
                // Still being created.
                break;
            }
            let mut reader = SegmentReader::open_read(&path, false)?;
            let file_len = reader.file_len()?;
            let scan = reader.scan(&self.codec, file_len, false)?;
            let header = reader.header();
            state.index.push(SegmentMeta {
                index,
                file_name: reader.name().to_string(),
                path,
                base_seqno: header.base_seqno,
                last_seqno: scan.last_seqno,
                committed_len: scan.committed_offset,
                sealed: scan.is_sealed(),
                checksums: header.checksums,
            });
            changed = true;
        }

        if changed {
            state.refresh_bounds();
            state.generation += 1;
            debug!(
                segments = state.index.len(),
                min_seqno = state.min_seqno,
                max_seqno = state.max_seqno,
                "refreshed read-only log"
            );
            drop(state);
            self.data_ready.notify_all();
        }
        Ok(changed)
    }

    fn check_writer(&self, id: u64) -> ThlResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(ThlError::Released);
        }
        let state = self.state.lock();
        match state.connections.get(&id) {
            Some(slot) if !slot.released => {}
            _ => return Err(ThlError::Released),
        }
        if state.writer_conn != Some(id) {
            return Err(ThlError::read_only("connection is not the log writer"));
        }
        Ok(())
    }

    fn lock_writer(&self) -> ThlResult<parking_lot::MutexGuard<'_, WriterSlot>> {
        self.writer
            .try_lock_for(self.config.write_lock_timeout)
            .ok_or_else(|| ThlError::timeout("waiting for the log writer"))
    }

    pub(crate) fn store(&self, id: u64, event: &LogEvent, commit: bool) -> ThlResult<()> {
        self.check_writer(id)?;
        let mut slot = self.lock_writer()?;

        let start = event.start_position();
        if event.end_position() < start {
            return Err(ThlError::invalid_operation(format!(
                "event {start} ends before it starts ({})",
                event.end_position()
            )));
        }
        if let Some(last) = slot.last_end {
            if start <= last {
                return Err(ThlError::invalid_operation(format!(
                    "event {start} does not follow last stored event {last}"
                )));
            }
        }

        self.ensure_writer(&mut slot, event.seqno())?;
        let rotate = match slot.active.as_ref() {
            Some(active) => {
                active.segment.len() > self.config.segment_size
                    && !active.segment.is_empty()
                    && event.fragno() == 0
                    && !slot.txn_open
            }
            None => false,
        };
        if rotate {
            self.rotate(&mut slot, event.seqno())?;
        }

        let record = self.codec.encode_event(event)?;
        let flush_interval = self.config.flush_interval;
        let due = {
            let active = slot
                .active
                .as_mut()
                .ok_or_else(|| ThlError::invalid_operation("no active segment"))?;
            active.segment.write_record(&record)?;
            active.dirty = true;
            if event.last_frag() {
                active.pending_max = event.last_seqno();
            }
            !flush_interval.is_zero() && active.last_commit.elapsed() >= flush_interval
        };
        slot.last_end = Some(event.end_position());
        slot.txn_open = !event.last_frag();

        if commit || due {
            self.commit_locked(&mut slot)?;
        }
        Ok(())
    }

    pub(crate) fn commit(&self, id: u64) -> ThlResult<()> {
        self.check_writer(id)?;
        let mut slot = self.lock_writer()?;
        self.commit_locked(&mut slot)
    }

    /// Commits if the flush interval has elapsed and the writer is idle.
    pub(crate) fn flush_if_due(&self) -> ThlResult<()> {
        let Some(mut slot) = self.writer.try_lock() else {
            return Ok(());
        };
        let due = slot.active.as_ref().is_some_and(|active| {
            active.dirty && active.last_commit.elapsed() >= self.config.flush_interval
        });
        if due {
            debug!("implicit commit");
            self.commit_locked(&mut slot)?;
        }
        Ok(())
    }

    fn ensure_writer(&self, slot: &mut WriterSlot, base_seqno: i64) -> ThlResult<()> {
        if slot.active.is_some() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let segment = match state.index.last() {
            Some(meta) if !meta.sealed => {
                SegmentWriter::open_write(&meta.path, self.config.buffer_size)?
            }
            _ => {
                let index = state.next_file_index;
                let segment = SegmentWriter::create(
                    &self.config.log_dir,
                    index,
                    base_seqno,
                    self.config.checksums,
                    self.config.buffer_size,
                )?;
                state.next_file_index = index + 1;
                state
                    .index
                    .push(new_segment_meta(&segment, &self.config.log_dir, base_seqno));
                state.generation += 1;
                info!(file = segment.name(), base_seqno, "started new log segment");
                segment
            }
        };
        drop(state);
        self.data_ready.notify_all();

        slot.active = Some(ActiveWriter::new(segment));
        Ok(())
    }

    pub(crate) fn commit_locked(&self, slot: &mut WriterSlot) -> ThlResult<()> {
        let Some(active) = slot.active.as_mut() else {
            return Ok(());
        };
        if !active.dirty {
            return Ok(());
        }

        active.segment.fsync()?;
        active.dirty = false;
        active.last_commit = Instant::now();

        let index = active.segment.index();
        let len = active.segment.len();
        let pending_max = active.pending_max;
        {
            let mut state = self.state.lock();
            if let Some(meta) = state.index.by_index_mut(index) {
                meta.committed_len = len;
                if pending_max != NO_SEQNO {
                    meta.last_seqno = pending_max;
                }
            }
            state.refresh_bounds();
            state.generation += 1;
        }
        self.data_ready.notify_all();
        Ok(())
    }

    fn rotate(&self, slot: &mut WriterSlot, next_seqno: i64) -> ThlResult<()> {
        self.commit_locked(slot)?;

        let next_index = {
            let mut state = self.state.lock();
            let next = state.next_file_index;
            state.next_file_index = next + 1;
            next
        };
        let active = slot
            .active
            .as_mut()
            .ok_or_else(|| ThlError::invalid_operation("no active segment to rotate"))?;
        let sealed_index = active.segment.index();
        let committed_len = active.segment.len();
        let next = SegmentWriter::create(
            &self.config.log_dir,
            next_index,
            next_seqno,
            self.config.checksums,
            self.config.buffer_size,
        )?;

        let rotate = self.codec.encode_rotate(next_index);
        let sealed = active
            .segment
            .write_record(&rotate)
            .and_then(|_| active.segment.fsync());
        if let Err(e) = sealed {
            if let Err(undo) = active.segment.truncate(committed_len) {
                warn!(file = active.segment.name(), error = %undo, "cannot drop failed rotate record");
            }
            self.discard_segment(next);
            return Err(e);
        }
        let sealed_len = active.segment.len();

        // The successor becomes visible together with the ROTATE record
        // that points at it.
        {
            let mut state = self.state.lock();
            state
                .index
                .push(new_segment_meta(&next, &self.config.log_dir, next_seqno));
            if let Some(meta) = state.index.by_index_mut(sealed_index) {
                meta.committed_len = sealed_len;
                meta.sealed = true;
            }
            state.generation += 1;
        }
        self.data_ready.notify_all();

        info!(
            sealed = active.segment.name(),
            next = next.name(),
            seqno = next_seqno,
            "rotated log"
        );
        if let Some(sealed) = slot.active.replace(ActiveWriter::new(next)) {
            sealed.segment.close()?;
        }

        if !self.config.retention.is_zero() {
            match self.purge_expired() {
                Ok(_) => {}
                Err(ThlError::Busy { message }) => debug!(%message, "retention deferred"),
                Err(e) => warn!(error = %e, "retention sweep failed"),
            }
        }
        Ok(())
    }

    /// Removes a successor segment whose ROTATE record never made it to disk.
    fn discard_segment(&self, segment: SegmentWriter) {
        let path = segment_path(&self.config.log_dir, segment.index());
        let name = segment.name().to_string();
        drop(segment);
        match fs::remove_file(&path).map_err(ThlError::from).and_then(|()| {
            sync_directory(&self.config.log_dir)
        }) {
            Ok(()) => warn!(file = %name, "discarded segment after failed rotation"),
            Err(e) => warn!(file = %name, error = %e, "cannot discard segment after failed rotation"),
        }
    }

    pub(crate) fn delete(&self, id: u64, low: Option<i64>, high: Option<i64>) -> ThlResult<()> {
        self.check_writer(id)?;
        let mut slot = self.lock_writer()?;
        self.commit_locked(&mut slot)?;
        if let Some(active) = slot.active.take() {
            active.segment.close()?;
        }
        slot.txn_open = false;

        let _files = self.files.write();
        let mut state = self.state.lock();
        let (min, max) = (state.min_seqno, state.max_seqno);

        let (removed, from_tail) = match (low, high) {
            (None, None) => (self.delete_all(&mut state)?, true),
            (Some(low), None) => (self.delete_tail(&mut state, low)?, true),
            (None, Some(high)) => (self.delete_head(&mut state, high)?, false),
            (Some(low), Some(high)) if low <= min && high >= max => {
                (self.delete_all(&mut state)?, true)
            }
            (Some(low), Some(high)) if low <= min => (self.delete_head(&mut state, high)?, false),
            (Some(low), Some(high)) if high >= max => (self.delete_tail(&mut state, low)?, true),
            (Some(low), Some(high)) => {
                return Err(ThlError::invalid_operation(format!(
                    "delete range {low}..={high} must include the start or end of the log \
                     ({min}..={max})"
                )));
            }
        };

        if removed > 0 {
            sync_directory(&self.config.log_dir)?;
        }
        state.refresh_bounds();
        state.generation += 1;
        if from_tail || state.index.is_empty() {
            slot.last_end = end_of_log(state.max_seqno);
        }
        info!(
            low = ?low,
            high = ?high,
            files_removed = removed,
            min_seqno = state.min_seqno,
            max_seqno = state.max_seqno,
            "deleted log range"
        );
        drop(state);
        self.data_ready.notify_all();
        Ok(())
    }

    fn remove_segment_file(meta: &SegmentMeta) -> ThlResult<()> {
        fs::remove_file(&meta.path)?;
        debug!(file = %meta.file_name, "removed segment");
        Ok(())
    }

    fn delete_all(&self, state: &mut LogState) -> ThlResult<usize> {
        let mut removed = 0;
        while let Some(meta) = state.index.pop_front() {
            Self::remove_segment_file(&meta)?;
            removed += 1;
        }
        state.invalidate_readers(|_| true);
        Ok(removed)
    }

    fn delete_tail(&self, state: &mut LogState, low: i64) -> ThlResult<usize> {
        let mut removed = 0;
        let mut first_affected = None;

        while let Some(last) = state.index.last().cloned() {
            if last.base_seqno < low {
                let mut reader = SegmentReader::open_read(&last.path, false)?;
                let (cut, kept) = reader.cut_point(&self.codec, low, last.committed_len)?;
                if cut > HEADER_SIZE {
                    if cut < last.committed_len {
                        let mut writer =
                            SegmentWriter::open_write(&last.path, self.config.buffer_size)?;
                        writer.truncate(cut)?;
                        first_affected = Some(last.index);
                    }
                    if let Some(meta) = state.index.last_mut() {
                        meta.committed_len = cut;
                        meta.last_seqno = kept;
                        meta.sealed = false;
                    }
                    break;
                }
            }

            Self::remove_segment_file(&last)?;
            state.index.pop_back();
            first_affected = Some(last.index);
            removed += 1;
        }

        if let Some(from) = first_affected {
            state.invalidate_readers(|segment| segment >= from);
        }
        Ok(removed)
    }

    fn delete_head(&self, state: &mut LogState, high: i64) -> ThlResult<usize> {
        let mut removed = 0;
        let mut last_removed = None;

        while let Some(first) = state.index.first().cloned() {
            if first.last_seqno > high {
                break;
            }
            Self::remove_segment_file(&first)?;
            state.index.pop_front();
            last_removed = Some(first.index);
            removed += 1;
        }

        if let Some(upto) = last_removed {
            state.invalidate_readers(|segment| segment <= upto);
        }
        Ok(removed)
    }

    pub(crate) fn purge_expired(&self) -> ThlResult<usize> {
        let retention = self.config.retention;
        if retention.is_zero() {
            return Ok(0);
        }
        if !self.writable {
            return Err(ThlError::read_only("retention needs the write lock"));
        }

        let cutoff = SystemTime::now().checked_sub(retention);
        let _files = self.files.write();
        let mut state = self.state.lock();
        let mut deleted = 0;
        let mut blocked = None;

        // The last two segments always stay.
        while state.index.len() > 2 {
            let Some(oldest) = state.index.first().cloned() else {
                break;
            };
            if let Some(active) = state.active_seqno {
                if oldest.last_seqno >= active {
                    break;
                }
            }
            let modified = fs::metadata(&oldest.path)?.modified()?;
            if cutoff.map_or(true, |cutoff| modified > cutoff) {
                break;
            }
            if state
                .connections
                .values()
                .any(|slot| !slot.released && slot.segment == Some(oldest.index))
            {
                blocked = Some(oldest.file_name);
                break;
            }

            Self::remove_segment_file(&oldest)?;
            state.index.pop_front();
            deleted += 1;
        }

        if deleted > 0 {
            sync_directory(&self.config.log_dir)?;
            state.refresh_bounds();
            state.generation += 1;
            info!(deleted, min_seqno = state.min_seqno, "retention removed old segments");
        }
        drop(state);

        match blocked {
            Some(file) if deleted == 0 => Err(ThlError::busy(format!(
                "segment {file} is being read"
            ))),
            _ => Ok(deleted),
        }
    }

    fn validate(&self) -> ThlResult<ValidationReport> {
        let _files = self.files.read();
        let (segments, min_seqno, max_seqno) = {
            let state = self.state.lock();
            (state.index.snapshot(), state.min_seqno, state.max_seqno)
        };

        let mut events = 0;
        let mut previous: Option<(u64, Option<u64>, Option<LogPosition>)> = None;

        for meta in &segments {
            let mut reader = SegmentReader::open_read(&meta.path, true)?;
            if reader.header().base_seqno != meta.base_seqno {
                return Err(ThlError::consistency(format!(
                    "segment {} header base seqno {} does not match index {}",
                    meta.file_name,
                    reader.header().base_seqno,
                    meta.base_seqno
                )));
            }

            let scan = reader.scan(&self.codec, meta.committed_len, true)?;
            if scan.first_seqno != NO_SEQNO && scan.first_seqno < meta.base_seqno {
                return Err(ThlError::consistency(format!(
                    "segment {} starts at seqno {} below its base seqno {}",
                    meta.file_name, scan.first_seqno, meta.base_seqno
                )));
            }

            if let Some((prev_index, rotate_next, prev_last)) = previous {
                if rotate_next != Some(meta.index) {
                    return Err(ThlError::consistency(format!(
                        "segment {prev_index} does not rotate to {}",
                        meta.file_name
                    )));
                }
                if let Some(prev_last) = prev_last {
                    if scan.first_seqno != NO_SEQNO && scan.first_seqno <= prev_last.seqno {
                        return Err(ThlError::consistency(format!(
                            "segment {} starts at seqno {} after {prev_last}",
                            meta.file_name, scan.first_seqno
                        )));
                    }
                }
            }

            events += scan.events;
            let last = scan.last_position.or(previous.and_then(|(_, _, last)| last));
            previous = Some((meta.index, scan.rotate_next, last));
        }

        if let Some((index, Some(next), _)) = previous {
            return Err(ThlError::consistency(format!(
                "last segment {index} rotates to missing segment {next}"
            )));
        }

        Ok(ValidationReport {
            segments: segments.len(),
            events,
            min_seqno,
            max_seqno,
        })
    }
}
