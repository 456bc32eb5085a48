//! Connections: the per-client handle for reading and writing a log.
//!
//! A connection is used by one thread at a time. Reads are positioned with
//! one of the `seek` calls and then advance with [`LogConnection::next`],
//! which follows ROTATE records across segments and only ever returns
//! committed data.

use crate::disk_log::Shared;
use crate::error::{ThlError, ThlResult};
use crate::event::{EventHeader, LogEvent, LogPosition, NO_SEQNO};
use crate::record::RecordType;
use crate::segment::{ReadOutcome, SegmentReader, HEADER_SIZE};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// First delay between file polls of a read-only instance.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest delay between file polls of a read-only instance.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Predicate deciding whether an event is returned by a read.
///
/// Any `Fn(&EventHeader) -> bool` closure works as a filter.
pub trait ReadFilter: Send {
    /// Returns true if the event should be returned.
    fn accept(&self, header: &EventHeader) -> bool;
}

impl<F> ReadFilter for F
where
    F: Fn(&EventHeader) -> bool + Send,
{
    fn accept(&self, header: &EventHeader) -> bool {
        self(header)
    }
}

/// Where the next read starts, before the segment has been opened.
#[derive(Debug, Clone)]
enum Start {
    First,
    Seqno(LogPosition),
    Segment(u64),
}

#[derive(Debug)]
struct Cursor {
    reader: SegmentReader,
    offset: u64,
    follow_rotate: bool,
    finished: bool,
}

impl Cursor {
    fn open(shared: &Shared, path: &std::path::Path, follow_rotate: bool) -> ThlResult<Self> {
        Ok(Self {
            reader: SegmentReader::open_read(path, shared.config.checksums)?,
            offset: HEADER_SIZE,
            follow_rotate,
            finished: false,
        })
    }
}

/// A handle that can release a connection from another thread.
///
/// Releasing wakes a blocked [`LogConnection::next`] on that connection,
/// which then fails with [`ThlError::Interrupted`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    id: u64,
}

impl ConnectionHandle {
    /// Releases the connection.
    pub fn release(&self) {
        debug!(connection = self.id, "connection released from handle");
        self.shared.release_connection(self.id);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}

/// A read or write session on a [`DiskLog`](crate::DiskLog).
pub struct LogConnection {
    shared: Arc<Shared>,
    id: u64,
    read_only: bool,
    released: bool,
    timeout: Duration,
    filter: Option<Box<dyn ReadFilter>>,
    start: Option<Start>,
    cursor: Option<Cursor>,
    /// Position the first returned event must cover after a seqno seek.
    expected: Option<LogPosition>,
    read_count: u64,
    write_count: u64,
}

impl LogConnection {
    pub(crate) fn new(shared: Arc<Shared>, id: u64, read_only: bool) -> Self {
        let timeout = shared.config.timeout;
        Self {
            shared,
            id,
            read_only,
            released: false,
            timeout,
            filter: None,
            start: None,
            cursor: None,
            expected: None,
            read_count: 0,
            write_count: 0,
        }
    }

    /// Returns true if this connection cannot write.
    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.read_only
    }

    /// Returns true once the connection has been released, from any thread.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
            || self
                .shared
                .state
                .lock()
                .connections
                .get(&self.id)
                .map_or(true, |slot| slot.released)
    }

    /// Returns the blocking-read timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the blocking-read timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Installs a filter applied to every event header before it is returned.
    pub fn set_read_filter(&mut self, filter: impl ReadFilter + 'static) {
        self.filter = Some(Box::new(filter));
    }

    /// Removes the read filter.
    pub fn clear_read_filter(&mut self) {
        self.filter = None;
    }

    /// Returns the number of event records read, including filtered ones.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// Returns the number of events stored.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// Returns a handle that can release this connection from another thread.
    #[must_use]
    pub fn interrupt_handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::clone(&self.shared),
            id: self.id,
        }
    }

    fn ensure_open(&self) -> ThlResult<()> {
        if self.released {
            return Err(ThlError::Released);
        }
        Ok(())
    }

    fn ensure_writer(&self) -> ThlResult<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(ThlError::read_only("connection was opened read-only"));
        }
        Ok(())
    }

    /// Appends an event, committing it if `commit` is set.
    ///
    /// Without `commit` the event becomes visible at the next explicit or
    /// implicit commit.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::ReadOnly`] on a read-only connection,
    /// [`ThlError::Timeout`] if the writer lock cannot be taken in time,
    /// [`ThlError::InvalidOperation`] if the event does not follow the last
    /// stored one, and I/O errors from the segment.
    pub fn store(&mut self, event: &LogEvent, commit: bool) -> ThlResult<()> {
        self.ensure_writer()?;
        self.shared.store(self.id, event, commit)?;
        self.write_count += 1;
        Ok(())
    }

    /// Makes every stored event durable and visible.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::ReadOnly`] on a read-only connection and I/O errors
    /// from the sync.
    pub fn commit(&mut self) -> ThlResult<()> {
        self.ensure_writer()?;
        self.shared.commit(self.id)
    }

    /// Deletes events from the start or end of the log.
    ///
    /// `None` for `low` means the start of the log and `None` for `high`
    /// means the end. The range must touch at least one end.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::ReadOnly`] on a read-only connection and
    /// [`ThlError::InvalidOperation`] for a range strictly inside the log.
    pub fn delete(&mut self, low: Option<i64>, high: Option<i64>) -> ThlResult<()> {
        self.ensure_writer()?;
        self.shared.delete(self.id, low, high)
    }

    fn reset_position(&mut self) {
        self.cursor = None;
        self.start = None;
        self.expected = None;
        if let Some(slot) = self.shared.state.lock().connections.get_mut(&self.id) {
            slot.segment = None;
            slot.invalidated = false;
        }
    }

    /// Positions the connection at `seqno`/`fragno`.
    ///
    /// Returns `Ok(false)` if the seqno has been purged or lies beyond the
    /// next seqno to be written. On an empty log any seqno is accepted and
    /// the next read waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Released`] if the connection has been released.
    pub fn seek(&mut self, seqno: i64, fragno: i16) -> ThlResult<bool> {
        self.ensure_open()?;
        self.reset_position();
        self.shared.refresh()?;

        let (min, max) = {
            let state = self.shared.state.lock();
            (state.min_seqno, state.max_seqno)
        };
        if max != NO_SEQNO && (seqno < min || seqno > max + 1) {
            debug!(connection = self.id, seqno, min, max, "seek outside log");
            return Ok(false);
        }

        let target = LogPosition::new(seqno, fragno);
        self.start = Some(Start::Seqno(target));
        self.expected = Some(target);
        Ok(true)
    }

    /// Positions the connection at the first fragment of `seqno`.
    ///
    /// # Errors
    ///
    /// Same as [`seek`](Self::seek).
    pub fn seek_seqno(&mut self, seqno: i64) -> ThlResult<bool> {
        self.seek(seqno, 0)
    }

    /// Positions the connection at the oldest record in the log.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Released`] if the connection has been released.
    pub fn seek_first(&mut self) -> ThlResult<bool> {
        self.ensure_open()?;
        self.reset_position();
        self.shared.refresh()?;
        self.start = Some(Start::First);
        Ok(true)
    }

    /// Positions the connection at the start of one segment file.
    ///
    /// Reads then stop at the end of that segment instead of following its
    /// ROTATE record. Returns `Ok(false)` if no such segment exists.
    ///
    /// # Errors
    ///
    /// Returns [`ThlError::Released`] if the connection has been released.
    pub fn seek_segment(&mut self, file_name: &str) -> ThlResult<bool> {
        self.ensure_open()?;
        self.reset_position();
        self.shared.refresh()?;

        let index = self
            .shared
            .state
            .lock()
            .index
            .by_name(file_name)
            .map(|meta| meta.index);
        match index {
            Some(index) => {
                self.start = Some(Start::Segment(index));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reads the next committed event.
    ///
    /// Without `blocking`, returns `Ok(None)` when no committed event is
    /// available. With `blocking`, waits up to the connection timeout for
    /// one. After [`seek_segment`](Self::seek_segment), `Ok(None)` also marks
    /// the end of that segment.
    ///
    /// # Errors
    ///
    /// - [`ThlError::InvalidOperation`] if the connection was never positioned
    /// - [`ThlError::Timeout`] if a blocking read waited too long
    /// - [`ThlError::Interrupted`] if the connection was released while waiting
    /// - [`ThlError::Position`] if the log no longer holds the sought position
    /// - corruption errors from the segment
    pub fn next(&mut self, blocking: bool) -> ThlResult<Option<LogEvent>> {
        self.ensure_open()?;
        if self.start.is_none() && self.cursor.is_none() {
            return Err(ThlError::invalid_operation(
                "connection must be positioned with seek before reading",
            ));
        }

        let deadline = Instant::now().checked_add(self.timeout);
        let shared = Arc::clone(&self.shared);
        let mut poll = MIN_POLL_INTERVAL;
        let mut refreshed = false;

        loop {
            let files = shared.files.read();
            let (limit, generation) = self.locate(&shared)?;

            let outcome = match (self.cursor.as_mut(), limit) {
                (Some(cursor), _) if cursor.finished => return Ok(None),
                (Some(cursor), Some(limit)) => cursor.reader.read_record(cursor.offset, limit)?,
                _ => ReadOutcome::Pending,
            };

            let (record, next_offset) = match outcome {
                ReadOutcome::Record {
                    record,
                    next_offset,
                } => (record, next_offset),
                ReadOutcome::Pending => {
                    drop(files);
                    if !refreshed && !shared.writable {
                        refreshed = true;
                        if shared.refresh()? {
                            continue;
                        }
                    }
                    if !blocking {
                        return Ok(None);
                    }
                    self.wait_for_change(&shared, generation, deadline, &mut poll)?;
                    continue;
                }
            };

            let Some(cursor) = self.cursor.as_mut() else {
                continue;
            };
            cursor.offset = next_offset;

            if record.record_type == RecordType::Rotate {
                if !cursor.follow_rotate {
                    cursor.finished = true;
                    return Ok(None);
                }
                let next = shared.codec.decode_rotate(&record)?;
                self.follow_rotate(&shared, next)?;
                continue;
            }

            let header = shared.codec.decode_header(&record)?;
            if let Some(target) = self.expected {
                let event = shared.codec.decode_event(&record)?;
                if event.end_position() < target {
                    continue;
                }
                self.expected = None;
                if !event.covers(target) {
                    return Err(ThlError::position(format!(
                        "sought {target} but the log continues at {}",
                        event.start_position()
                    )));
                }
                self.read_count += 1;
                if self.accepts(&header) {
                    return Ok(Some(event));
                }
                continue;
            }

            self.read_count += 1;
            if self.accepts(&header) {
                return Ok(Some(shared.codec.decode_event(&record)?));
            }
        }
    }

    fn accepts(&self, header: &EventHeader) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter.accept(header))
    }

    /// Checks the connection against shared state and opens the cursor if it
    /// is still pending. Returns the readable limit of the cursor's segment
    /// and the state generation observed.
    fn locate(&mut self, shared: &Shared) -> ThlResult<(Option<u64>, u64)> {
        let mut state = shared.state.lock();
        let generation = state.generation;
        let Some(slot) = state.connections.get(&self.id) else {
            return Err(ThlError::Released);
        };
        if slot.released {
            return Err(ThlError::interrupted("connection was released"));
        }
        if slot.invalidated {
            self.cursor = None;
            self.start = None;
            return Err(ThlError::position(
                "log was truncated under the connection's read position",
            ));
        }

        if self.cursor.is_none() {
            let found = match &self.start {
                Some(Start::First) => state.index.first(),
                Some(Start::Seqno(target)) => match state.index.segment_for(target.seqno) {
                    Some(meta) => Some(meta),
                    None if state.index.is_empty() => None,
                    None => {
                        return Err(ThlError::position(format!(
                            "seqno {} precedes the log",
                            target.seqno
                        )));
                    }
                },
                Some(Start::Segment(index)) => match state.index.by_index(*index) {
                    Some(meta) => Some(meta),
                    None => {
                        return Err(ThlError::position(format!(
                            "segment {index} no longer exists"
                        )));
                    }
                },
                None => None,
            };

            let Some(meta) = found else {
                return Ok((None, generation));
            };
            let follow = !matches!(self.start, Some(Start::Segment(_)));
            let (index, path) = (meta.index, meta.path.clone());
            self.cursor = Some(Cursor::open(shared, &path, follow)?);
            self.start = None;
            if let Some(slot) = state.connections.get_mut(&self.id) {
                slot.segment = Some(index);
            }
        }

        let limit = match &self.cursor {
            Some(cursor) => {
                let index = cursor.reader.index();
                let meta = state.index.by_index(index).ok_or_else(|| {
                    ThlError::position(format!("segment {index} no longer exists"))
                })?;
                Some(meta.committed_len)
            }
            None => None,
        };
        Ok((limit, generation))
    }

    fn follow_rotate(&mut self, shared: &Shared, next: u64) -> ThlResult<()> {
        let mut state = shared.state.lock();
        let meta = state.index.by_index(next).ok_or_else(|| {
            ThlError::consistency(format!("rotate points at missing segment {next}"))
        })?;
        let path = meta.path.clone();
        self.cursor = Some(Cursor::open(shared, &path, true)?);
        if let Some(slot) = state.connections.get_mut(&self.id) {
            slot.segment = Some(next);
        }
        debug!(connection = self.id, segment = next, "reader followed rotate");
        Ok(())
    }

    /// Parks until the log changes, the deadline passes or the connection
    /// is released.
    ///
    /// A read-only instance is not woken by the writing process, so it
    /// polls the files instead, backing off up to [`MAX_POLL_INTERVAL`].
    fn wait_for_change(
        &self,
        shared: &Shared,
        generation: u64,
        deadline: Option<Instant>,
        poll: &mut Duration,
    ) -> ThlResult<()> {
        loop {
            {
                let mut state = shared.state.lock();
                if state
                    .connections
                    .get(&self.id)
                    .map_or(true, |slot| slot.released)
                {
                    return Err(ThlError::interrupted("connection was released while waiting"));
                }
                if state.generation != generation {
                    return Ok(());
                }

                let wake = if shared.writable {
                    deadline
                } else {
                    let next_poll = Instant::now() + *poll;
                    Some(deadline.map_or(next_poll, |deadline| deadline.min(next_poll)))
                };
                match wake {
                    Some(wake) => {
                        let timed_out = shared.data_ready.wait_until(&mut state, wake).timed_out();
                        if state.generation != generation {
                            return Ok(());
                        }
                        if timed_out && deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                            return Err(ThlError::timeout(format!(
                                "no event within {:?}",
                                self.timeout
                            )));
                        }
                    }
                    None => {
                        shared.data_ready.wait(&mut state);
                        continue;
                    }
                }
            }

            if !shared.writable {
                *poll = (*poll * 2).min(MAX_POLL_INTERVAL);
                if shared.refresh()? {
                    return Ok(());
                }
            }
        }
    }

    /// Commits pending writes and releases the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the final commit fails. The connection is released
    /// regardless.
    pub fn release(&mut self) -> ThlResult<()> {
        if self.released {
            return Ok(());
        }
        let result = if self.read_only {
            Ok(())
        } else {
            match self.shared.commit(self.id) {
                Err(ThlError::Released) => Ok(()),
                other => other,
            }
        };
        self.released = true;
        self.cursor = None;
        self.shared.release_connection(self.id);
        debug!(connection = self.id, "connection released");
        result
    }
}

impl fmt::Debug for LogConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogConnection")
            .field("id", &self.id)
            .field("read_only", &self.read_only)
            .field("released", &self.released)
            .field("read_count", &self.read_count)
            .field("write_count", &self.write_count)
            .finish_non_exhaustive()
    }
}

impl Drop for LogConnection {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(connection = self.id, error = %e, "failed to release connection");
        }
        self.shared.unregister(self.id);
    }
}
