//! Property-based test generators using proptest.
//!
//! Provides strategies for generating events and event streams that keep
//! the ordering rules the log enforces.

use proptest::prelude::*;
use thl_core::{LogEvent, ReplEvent};

/// Strategy for short identifier strings (source, shard and event ids).
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9_.:-]{0,24}").expect("Invalid regex")
}

/// Strategy for opaque change payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for a single-fragment change event at `seqno`.
pub fn change_event_strategy(seqno: i64) -> impl Strategy<Value = LogEvent> {
    (
        payload_strategy(),
        identifier_strategy(),
        identifier_strategy(),
        identifier_strategy(),
        any::<i64>(),
        0i64..4_000_000_000_000,
    )
        .prop_map(move |(data, source_id, shard_id, event_id, epoch, tstamp)| {
            LogEvent::change(seqno, data)
                .with_source_id(source_id)
                .with_shard_id(shard_id)
                .with_event_id(event_id)
                .with_epoch(epoch)
                .with_source_tstamp(tstamp)
        })
}

/// One step of a generated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStep {
    /// A transaction with this many fragments.
    Transaction(i16),
    /// A filtered range covering this many seqnos.
    Filtered(i64),
    /// A gap of this many unused seqnos.
    Gap(i64),
}

/// Strategy for one [`StreamStep`].
pub fn stream_step_strategy() -> impl Strategy<Value = StreamStep> {
    prop_oneof![
        6 => (1i16..4).prop_map(StreamStep::Transaction),
        1 => (1i64..10).prop_map(StreamStep::Filtered),
        1 => (1i64..5).prop_map(StreamStep::Gap),
    ]
}

/// Strategy for a well-ordered stream of events starting at seqno 0.
///
/// Seqnos strictly increase between transactions and fragments count up
/// within one, so every stream is accepted by a writer.
pub fn event_stream_strategy(max_steps: usize) -> impl Strategy<Value = Vec<LogEvent>> {
    prop::collection::vec(stream_step_strategy(), 1..max_steps).prop_map(build_stream)
}

/// Expands steps into events.
pub fn build_stream(steps: Vec<StreamStep>) -> Vec<LogEvent> {
    let mut events = Vec::new();
    let mut seqno = 0i64;
    for step in steps {
        match step {
            StreamStep::Transaction(fragments) => {
                for fragno in 0..fragments {
                    events.push(
                        LogEvent::new(
                            seqno,
                            fragno,
                            fragno + 1 == fragments,
                            ReplEvent::Change(format!("{seqno}/{fragno}").into_bytes()),
                        )
                        .with_event_id(seqno.to_string()),
                    );
                }
                seqno += 1;
            }
            StreamStep::Filtered(count) => {
                events.push(LogEvent::filtered(seqno, seqno + count - 1, 0));
                seqno += count;
            }
            StreamStep::Gap(count) => seqno += count,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn streams_are_strictly_ordered(events in event_stream_strategy(32)) {
            for pair in events.windows(2) {
                prop_assert!(pair[0].end_position() < pair[1].start_position());
            }
        }
    }

    #[test]
    fn build_stream_expands_steps() {
        let events = build_stream(vec![
            StreamStep::Transaction(2),
            StreamStep::Gap(3),
            StreamStep::Filtered(4),
            StreamStep::Transaction(1),
        ]);
        let positions: Vec<_> = events.iter().map(|e| (e.seqno(), e.fragno())).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (4, 0), (8, 0)]);
        assert_eq!(events[2].last_seqno(), 7);
    }
}
