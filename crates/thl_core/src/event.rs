//! Replication events as stored in the log.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel seqno reported by an empty log.
pub const NO_SEQNO: i64 = -1;

/// Logical content of an event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplEvent {
    /// An opaque change payload produced by an extractor.
    Change(Vec<u8>),
    /// Stand-in for a run of transactions filtered out upstream.
    ///
    /// The range starts at the enclosing header's seqno and ends at
    /// `to_seqno`/`to_fragno` inclusive.
    FilteredRange {
        /// Last filtered seqno.
        to_seqno: i64,
        /// Last filtered fragment of `to_seqno`.
        to_fragno: i16,
    },
}

/// Header fields of an event record, readable without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Transaction sequence number.
    pub seqno: i64,
    /// Fragment number within the transaction.
    pub fragno: i16,
    /// True for the final fragment of the transaction.
    pub last_frag: bool,
    /// Identifier of the source server.
    pub source_id: String,
    /// Epoch number assigned by the extractor.
    pub epoch_number: i64,
    /// Source commit timestamp in milliseconds since the Unix epoch.
    pub source_tstamp: i64,
    /// Shard the transaction belongs to.
    pub shard_id: String,
    /// Native event identifier (for example a binlog position).
    pub event_id: String,
}

/// A replication event: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Header fields.
    pub header: EventHeader,
    /// Event payload.
    pub event: ReplEvent,
}

impl LogEvent {
    /// Creates an event with empty identifiers.
    #[must_use]
    pub fn new(seqno: i64, fragno: i16, last_frag: bool, event: ReplEvent) -> Self {
        Self {
            header: EventHeader {
                seqno,
                fragno,
                last_frag,
                source_id: String::new(),
                epoch_number: 0,
                source_tstamp: 0,
                shard_id: String::new(),
                event_id: String::new(),
            },
            event,
        }
    }

    /// Creates a single-fragment change event.
    #[must_use]
    pub fn change(seqno: i64, data: impl Into<Vec<u8>>) -> Self {
        Self::new(seqno, 0, true, ReplEvent::Change(data.into()))
    }

    /// Creates a placeholder for the filtered range `from_seqno..=to_seqno`.
    #[must_use]
    pub fn filtered(from_seqno: i64, to_seqno: i64, to_fragno: i16) -> Self {
        Self::new(
            from_seqno,
            0,
            true,
            ReplEvent::FilteredRange {
                to_seqno,
                to_fragno,
            },
        )
    }

    /// Sets the source id.
    #[must_use]
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.header.source_id = source_id.into();
        self
    }

    /// Sets the epoch number.
    #[must_use]
    pub fn with_epoch(mut self, epoch_number: i64) -> Self {
        self.header.epoch_number = epoch_number;
        self
    }

    /// Sets the source timestamp.
    #[must_use]
    pub fn with_source_tstamp(mut self, tstamp: i64) -> Self {
        self.header.source_tstamp = tstamp;
        self
    }

    /// Sets the shard id.
    #[must_use]
    pub fn with_shard_id(mut self, shard_id: impl Into<String>) -> Self {
        self.header.shard_id = shard_id.into();
        self
    }

    /// Sets the event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.header.event_id = event_id.into();
        self
    }

    /// Returns the event seqno.
    #[must_use]
    pub fn seqno(&self) -> i64 {
        self.header.seqno
    }

    /// Returns the fragment number.
    #[must_use]
    pub fn fragno(&self) -> i16 {
        self.header.fragno
    }

    /// Returns true if this is the last fragment of its transaction.
    #[must_use]
    pub fn last_frag(&self) -> bool {
        self.header.last_frag
    }

    /// Returns true for a filtered-range placeholder.
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        matches!(self.event, ReplEvent::FilteredRange { .. })
    }

    /// Returns the highest seqno this record stands for.
    #[must_use]
    pub fn last_seqno(&self) -> i64 {
        match self.event {
            ReplEvent::FilteredRange { to_seqno, .. } => to_seqno,
            ReplEvent::Change(_) => self.header.seqno,
        }
    }

    /// Returns the position of the first fragment this record stands for.
    #[must_use]
    pub fn start_position(&self) -> LogPosition {
        LogPosition::new(self.header.seqno, self.header.fragno)
    }

    /// Returns the position of the last fragment this record stands for.
    #[must_use]
    pub fn end_position(&self) -> LogPosition {
        match self.event {
            ReplEvent::FilteredRange {
                to_seqno,
                to_fragno,
            } => LogPosition::new(to_seqno, to_fragno),
            ReplEvent::Change(_) => self.start_position(),
        }
    }

    /// Returns true if this record occupies `position`.
    #[must_use]
    pub fn covers(&self, position: LogPosition) -> bool {
        self.start_position() <= position && position <= self.end_position()
    }
}

/// A (seqno, fragno) pair, ordered seqno first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    /// Sequence number.
    pub seqno: i64,
    /// Fragment number.
    pub fragno: i16,
}

impl LogPosition {
    /// Creates a position.
    #[must_use]
    pub const fn new(seqno: i64, fragno: i16) -> Self {
        Self { seqno, fragno }
    }

    /// The last possible position of a transaction.
    #[must_use]
    pub const fn end_of(seqno: i64) -> Self {
        Self {
            seqno,
            fragno: i16::MAX,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.seqno, self.fragno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_defaults() {
        let event = LogEvent::change(5, b"row".to_vec()).with_event_id("5");
        assert_eq!(event.seqno(), 5);
        assert_eq!(event.fragno(), 0);
        assert!(event.last_frag());
        assert!(!event.is_filtered());
        assert_eq!(event.last_seqno(), 5);
        assert_eq!(event.header.event_id, "5");
    }

    #[test]
    fn filtered_range_spans_positions() {
        let event = LogEvent::filtered(10, 20, 2);
        assert!(event.is_filtered());
        assert_eq!(event.last_seqno(), 20);
        assert!(event.covers(LogPosition::new(10, 0)));
        assert!(event.covers(LogPosition::new(15, 7)));
        assert!(event.covers(LogPosition::new(20, 2)));
        assert!(!event.covers(LogPosition::new(20, 3)));
        assert!(!event.covers(LogPosition::new(9, 0)));
    }

    #[test]
    fn positions_order_by_seqno_then_fragno() {
        assert!(LogPosition::new(1, 5) < LogPosition::new(2, 0));
        assert!(LogPosition::new(2, 0) < LogPosition::new(2, 1));
        assert!(LogPosition::new(2, 1) < LogPosition::end_of(2));
        assert_eq!(LogPosition::new(3, 1).to_string(), "3/1");
    }
}
