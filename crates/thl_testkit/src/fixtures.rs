//! Test fixtures and log helpers.
//!
//! Provides convenience functions for setting up logs in temporary
//! directories and filling them with events.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use thl_core::{DiskLog, LogConfig, LogConnection, LogEvent, ReplEvent};

/// A log in a temporary directory that is removed on drop.
pub struct TestLog {
    /// The log instance.
    pub log: DiskLog,
    temp_dir: TempDir,
}

impl TestLog {
    /// Creates a log with [`test_config`] defaults.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a log after letting `configure` adjust the test defaults.
    pub fn with_config(configure: impl FnOnce(LogConfig) -> LogConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(test_config(temp_dir.path()));
        let log = DiskLog::prepare(config).expect("Failed to prepare log");
        Self { log, temp_dir }
    }

    /// Returns the log directory.
    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the path of a segment file by name.
    pub fn segment_path(&self, name: &str) -> PathBuf {
        self.dir().join(name)
    }

    /// Releases the log and prepares it again from disk with the same
    /// configuration.
    pub fn reopen(self) -> Self {
        let config = self.log.config().clone();
        self.reopen_with(config)
    }

    /// Releases the log and prepares it again with `config`.
    pub fn reopen_with(self, config: LogConfig) -> Self {
        let Self { log, temp_dir } = self;
        log.release().expect("Failed to release log");
        drop(log);
        let log = DiskLog::prepare(config).expect("Failed to reopen log");
        Self { log, temp_dir }
    }

    /// Opens a second, read-only instance on the same directory.
    pub fn open_reader_instance(&self) -> DiskLog {
        let config = self.log.config().clone().read_only(true);
        DiskLog::prepare(config).expect("Failed to open read-only instance")
    }

    /// Opens the write connection.
    pub fn writer(&self) -> LogConnection {
        self.log.connect(false).expect("Failed to open writer")
    }

    /// Opens a read connection.
    pub fn reader(&self) -> LogConnection {
        self.log.connect(true).expect("Failed to open reader")
    }
}

impl Default for TestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestLog {
    type Target = DiskLog;

    fn deref(&self) -> &Self::Target {
        &self.log
    }
}

/// Configuration used by test logs: explicit commits only, short timeouts.
pub fn test_config(dir: &Path) -> LogConfig {
    LogConfig::new(dir)
        .flush_interval(Duration::ZERO)
        .timeout(Duration::from_secs(5))
        .write_lock_timeout(Duration::from_secs(5))
        .buffer_size(4096)
}

/// Builds the single-fragment event used across tests for `seqno`.
///
/// The event id is the seqno in decimal, so readers can cross-check it.
pub fn sample_event(seqno: i64) -> LogEvent {
    LogEvent::change(seqno, format!("change-{seqno}").into_bytes())
        .with_source_id("test-source")
        .with_epoch(1)
        .with_source_tstamp(1_700_000_000_000 + seqno)
        .with_event_id(seqno.to_string())
}

/// Builds the fragments of transaction `seqno`.
pub fn fragmented_event(seqno: i64, fragments: i16) -> Vec<LogEvent> {
    (0..fragments)
        .map(|fragno| {
            LogEvent::new(
                seqno,
                fragno,
                fragno + 1 == fragments,
                ReplEvent::Change(vec![fragno as u8; 16]),
            )
            .with_event_id(format!("{seqno}:{fragno}"))
        })
        .collect()
}

/// Stores [`sample_event`] for every seqno in `seqnos`, committing each.
pub fn store_events(conn: &mut LogConnection, seqnos: Range<i64>) {
    for seqno in seqnos {
        conn.store(&sample_event(seqno), true)
            .unwrap_or_else(|e| panic!("Failed to store event {seqno}: {e}"));
    }
}

/// Reads every currently committed event without blocking.
pub fn drain(conn: &mut LogConnection) -> Vec<LogEvent> {
    let mut events = Vec::new();
    while let Some(event) = conn.next(false).expect("Failed to read event") {
        events.push(event);
    }
    events
}

/// Returns the seqnos of `events`.
pub fn seqnos(events: &[LogEvent]) -> Vec<i64> {
    events.iter().map(LogEvent::seqno).collect()
}

/// Runs `f` against a fresh test log.
pub fn with_temp_log<F, R>(f: F) -> R
where
    F: FnOnce(&TestLog) -> R,
{
    let log = TestLog::new();
    f(&log)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A log holding `count` committed events starting at seqno 0.
    pub fn populated_log(count: i64) -> TestLog {
        let log = TestLog::new();
        let mut writer = log.writer();
        store_events(&mut writer, 0..count);
        writer.release().expect("Failed to release writer");
        log
    }

    /// A log with small segments holding `count` events, so it spans many
    /// files.
    pub fn multi_segment_log(count: i64, segment_size: u64) -> TestLog {
        let log = TestLog::with_config(|config| config.segment_size(segment_size));
        let mut writer = log.writer();
        store_events(&mut writer, 0..count);
        writer.release().expect("Failed to release writer");
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populated_log_has_expected_bounds() {
        let log = scenarios::populated_log(10);
        assert_eq!(log.min_seqno(), 0);
        assert_eq!(log.max_seqno(), 9);
        assert_eq!(log.file_count(), 1);
    }

    #[test]
    fn reopen_keeps_data() {
        let log = scenarios::populated_log(3).reopen();
        let mut reader = log.reader();
        assert!(reader.seek_first().unwrap());
        assert_eq!(seqnos(&drain(&mut reader)), vec![0, 1, 2]);
    }

    #[test]
    fn fragments_end_with_last_flag() {
        let frags = fragmented_event(4, 3);
        assert_eq!(frags.len(), 3);
        assert!(!frags[0].last_frag());
        assert!(frags[2].last_frag());
        assert_eq!(frags[1].fragno(), 1);
    }
}
