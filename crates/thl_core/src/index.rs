//! In-memory index of the segments forming a log.

use crate::event::NO_SEQNO;
use serde::Serialize;
use std::path::PathBuf;

/// Metadata for one segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentMeta {
    /// Segment index (from the file name).
    pub index: u64,
    /// File name.
    pub file_name: String,
    /// Full path.
    pub path: PathBuf,
    /// First seqno the segment holds.
    pub base_seqno: i64,
    /// Highest committed seqno completed in this segment, or [`NO_SEQNO`].
    pub last_seqno: i64,
    /// Bytes readers may consume.
    pub committed_len: u64,
    /// True once a ROTATE record has been committed.
    pub sealed: bool,
    /// Whether records carry checksums.
    pub checksums: bool,
}

impl SegmentMeta {
    /// Returns true if the segment holds a committed transaction.
    #[must_use]
    pub fn has_committed_data(&self) -> bool {
        self.last_seqno != NO_SEQNO
    }
}

/// Ordered collection of [`SegmentMeta`], oldest first.
#[derive(Debug, Default, Clone)]
pub struct SegmentIndex {
    segments: Vec<SegmentMeta>,
}

impl SegmentIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment. Segments must be pushed in index order.
    pub fn push(&mut self, meta: SegmentMeta) {
        debug_assert!(self.segments.last().map_or(true, |last| last.index < meta.index));
        self.segments.push(meta);
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if there are no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterates segments oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SegmentMeta> {
        self.segments.iter()
    }

    /// Returns the oldest segment.
    #[must_use]
    pub fn first(&self) -> Option<&SegmentMeta> {
        self.segments.first()
    }

    /// Returns the newest segment.
    #[must_use]
    pub fn last(&self) -> Option<&SegmentMeta> {
        self.segments.last()
    }

    /// Returns the newest segment mutably.
    pub fn last_mut(&mut self) -> Option<&mut SegmentMeta> {
        self.segments.last_mut()
    }

    /// Returns the segment at position `pos` (0 is oldest).
    #[must_use]
    pub fn get(&self, pos: usize) -> Option<&SegmentMeta> {
        self.segments.get(pos)
    }

    /// Finds a segment by its index.
    #[must_use]
    pub fn by_index(&self, index: u64) -> Option<&SegmentMeta> {
        self.segments.iter().find(|s| s.index == index)
    }

    /// Finds a segment by its index, mutably.
    pub fn by_index_mut(&mut self, index: u64) -> Option<&mut SegmentMeta> {
        self.segments.iter_mut().find(|s| s.index == index)
    }

    /// Finds a segment by file name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&SegmentMeta> {
        self.segments.iter().find(|s| s.file_name == name)
    }

    /// Returns the segment that holds `seqno`, if any.
    ///
    /// This is the newest segment whose base seqno is not above `seqno`.
    #[must_use]
    pub fn segment_for(&self, seqno: i64) -> Option<&SegmentMeta> {
        self.segments.iter().rev().find(|s| s.base_seqno <= seqno)
    }

    /// Returns the lowest committed seqno, or [`NO_SEQNO`].
    #[must_use]
    pub fn min_seqno(&self) -> i64 {
        self.segments
            .iter()
            .find(|s| s.has_committed_data())
            .map_or(NO_SEQNO, |s| s.base_seqno)
    }

    /// Returns the highest committed seqno, or [`NO_SEQNO`].
    #[must_use]
    pub fn max_seqno(&self) -> i64 {
        self.segments
            .iter()
            .rev()
            .find(|s| s.has_committed_data())
            .map_or(NO_SEQNO, |s| s.last_seqno)
    }

    /// Removes and returns the oldest segment.
    pub fn pop_front(&mut self) -> Option<SegmentMeta> {
        if self.segments.is_empty() {
            None
        } else {
            Some(self.segments.remove(0))
        }
    }

    /// Removes and returns the newest segment.
    pub fn pop_back(&mut self) -> Option<SegmentMeta> {
        self.segments.pop()
    }

    /// Returns the file names, oldest first.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.file_name.clone()).collect()
    }

    /// Returns a copy of all metadata.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SegmentMeta> {
        self.segments.clone()
    }
}
