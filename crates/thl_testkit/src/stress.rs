//! Stress runs for the THL disk log.
//!
//! One writer appends while several readers tail the log with blocking
//! reads. Every reader must see every seqno exactly once and in order.

use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use thl_core::DiskLog;

use crate::fixtures::sample_event;

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of events the writer stores.
    pub events: i64,
    /// Number of concurrent readers.
    pub readers: usize,
    /// Commit after this many stores.
    pub commit_every: i64,
    /// Blocking read timeout for readers.
    pub read_timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            events: 2_000,
            readers: 4,
            commit_every: 10,
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressResult {
    /// Events stored by the writer.
    pub written: i64,
    /// Events read by each reader.
    pub read_per_reader: Vec<i64>,
    /// Readers that saw a gap, a duplicate or an error.
    pub failures: Vec<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u128,
}

impl StressResult {
    /// Returns true if every reader saw every event in order.
    pub fn passed(&self) -> bool {
        self.failures.is_empty() && self.read_per_reader.iter().all(|&n| n == self.written)
    }

    /// Renders the result as JSON for test logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Runs one writer and `config.readers` tailing readers against `log`.
///
/// The log must be writable and empty.
pub fn run_tailing_readers(log: &DiskLog, config: &StressConfig) -> StressResult {
    let start = Instant::now();
    let mut failures = Vec::new();
    let mut read_per_reader = Vec::new();

    thread::scope(|scope| {
        let readers: Vec<_> = (0..config.readers)
            .map(|id| {
                let mut conn = log.connect(true).expect("Failed to open reader");
                conn.set_timeout(config.read_timeout);
                let events = config.events;
                scope.spawn(move || -> Result<i64, String> {
                    if !conn.seek_seqno(0).map_err(|e| e.to_string())? {
                        return Err(format!("reader {id}: seek to 0 refused"));
                    }
                    for expected in 0..events {
                        let event = conn
                            .next(true)
                            .map_err(|e| format!("reader {id} at {expected}: {e}"))?
                            .ok_or_else(|| format!("reader {id}: no event at {expected}"))?;
                        if event.seqno() != expected {
                            return Err(format!(
                                "reader {id}: expected {expected}, got {}",
                                event.seqno()
                            ));
                        }
                    }
                    Ok(events)
                })
            })
            .collect();

        let mut writer = log.connect(false).expect("Failed to open writer");
        for seqno in 0..config.events {
            let commit = (seqno + 1) % config.commit_every == 0 || seqno + 1 == config.events;
            if let Err(e) = writer.store(&sample_event(seqno), commit) {
                failures.push(format!("writer at {seqno}: {e}"));
                break;
            }
        }
        drop(writer);

        for handle in readers {
            match handle.join() {
                Ok(Ok(count)) => read_per_reader.push(count),
                Ok(Err(message)) => {
                    read_per_reader.push(0);
                    failures.push(message);
                }
                Err(_) => failures.push("reader panicked".to_string()),
            }
        }
    });

    StressResult {
        written: config.events,
        read_per_reader,
        failures,
        duration_ms: start.elapsed().as_millis(),
    }
}
