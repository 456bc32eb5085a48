//! End-to-end tests for the disk log through its public API.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use thl_core::{DiskLog, LogConfig, LogEvent, ReplEvent, ThlError};

fn config(dir: &Path) -> LogConfig {
    LogConfig::new(dir)
        .flush_interval(Duration::ZERO)
        .timeout(Duration::from_secs(5))
}

fn event(seqno: i64) -> LogEvent {
    LogEvent::change(seqno, vec![b'x'; 20]).with_event_id(seqno.to_string())
}

#[test]
fn many_events_rotate_and_read_back_read_only() {
    let temp = tempdir().unwrap();
    {
        let log = DiskLog::prepare(config(temp.path()).segment_size(3000)).unwrap();
        let mut writer = log.connect(false).unwrap();
        for seqno in 0..200 {
            writer.store(&event(seqno), true).unwrap();
        }
        writer.release().unwrap();
        assert!(log.file_count() > 1);
        assert_eq!(log.max_seqno(), 199);
    }

    let log = DiskLog::prepare(config(temp.path()).read_only(true)).unwrap();
    let mut reader = log.connect(true).unwrap();
    assert!(reader.seek_seqno(150).unwrap());
    let found = reader.next(true).unwrap().unwrap();
    assert_eq!(found.seqno(), 150);
    assert_eq!(found.header.event_id, "150");
}

#[test]
fn blocked_seek_on_empty_log_times_out_then_sees_write() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path())).unwrap();

    let mut reader = log.connect(true).unwrap();
    reader.set_timeout(Duration::from_secs(1));
    assert!(reader.seek_seqno(10).unwrap());

    let started = Instant::now();
    let err = reader.next(true).unwrap_err();
    assert!(matches!(err, ThlError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(900));

    let mut writer = log.connect(false).unwrap();
    writer.store(&event(10), true).unwrap();
    assert_eq!(reader.next(true).unwrap().unwrap().seqno(), 10);
}

#[test]
fn tail_deletes_shrink_log_one_seqno_at_a_time() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path()).segment_size(3000)).unwrap();
    let mut writer = log.connect(false).unwrap();
    for seqno in 0..200 {
        writer.store(&event(seqno), true).unwrap();
    }
    assert!(log.file_count() > 1);

    let mut reader = log.connect(true).unwrap();
    for seqno in (0..200).rev() {
        writer.delete(Some(seqno), None).unwrap();
        assert_eq!(log.max_seqno(), seqno - 1);
        if seqno > 0 {
            assert!(reader.seek_seqno(seqno - 1).unwrap());
            assert_eq!(reader.next(false).unwrap().unwrap().seqno(), seqno - 1);
            assert!(reader.next(false).unwrap().is_none());
        }
    }
    assert_eq!(log.file_count(), 0);
    assert_eq!(log.min_seqno(), -1);

    writer.store(&event(500), true).unwrap();
    assert_eq!(log.min_seqno(), 500);
    assert_eq!(log.max_seqno(), 500);
}

#[test]
fn head_deletes_drop_whole_segments() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path()).segment_size(3000)).unwrap();
    let mut writer = log.connect(false).unwrap();
    for seqno in 0..200 {
        writer.store(&event(seqno), true).unwrap();
    }
    let files = log.file_count();

    let first_last = log.segments()[0].last_seqno;
    writer.delete(None, Some(first_last)).unwrap();
    assert_eq!(log.file_count(), files - 1);
    assert_eq!(log.min_seqno(), first_last + 1);
    assert_eq!(log.max_seqno(), 199);

    for high in first_last + 1..200 {
        writer.delete(None, Some(high)).unwrap();
    }
    assert_eq!(log.file_count(), 0);
}

#[test]
fn delete_inside_log_is_refused() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path())).unwrap();
    let mut writer = log.connect(false).unwrap();
    for seqno in 0..10 {
        writer.store(&event(seqno), true).unwrap();
    }
    let err = writer.delete(Some(3), Some(6)).unwrap_err();
    assert!(matches!(err, ThlError::InvalidOperation { .. }));
    assert_eq!((log.min_seqno(), log.max_seqno()), (0, 9));
}

#[test]
fn fragments_of_one_transaction_stay_in_one_segment() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path()).segment_size(200)).unwrap();
    let mut writer = log.connect(false).unwrap();
    writer.store(&event(0), true).unwrap();

    let files = log.file_count();
    for fragno in 0..20i16 {
        let frag = LogEvent::new(1, fragno, fragno == 19, ReplEvent::Change(vec![7; 40]));
        writer.store(&frag, true).unwrap();
        assert_eq!(log.file_count(), files);
    }
    assert_eq!(log.max_seqno(), 1);

    writer.store(&event(2), true).unwrap();
    assert_eq!(log.file_count(), files + 1);
    assert_eq!(log.segments().last().unwrap().base_seqno, 2);
}

#[test]
fn max_seqno_waits_for_last_fragment() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path())).unwrap();
    let mut writer = log.connect(false).unwrap();
    writer.store(&event(0), true).unwrap();

    writer
        .store(&LogEvent::new(1, 0, false, ReplEvent::Change(vec![1])), true)
        .unwrap();
    assert_eq!(log.max_seqno(), 0);
    writer
        .store(&LogEvent::new(1, 1, true, ReplEvent::Change(vec![2])), true)
        .unwrap();
    assert_eq!(log.max_seqno(), 1);
}

#[test]
fn uncommitted_store_stays_invisible_until_commit() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path())).unwrap();
    let mut writer = log.connect(false).unwrap();
    writer.store(&event(0), true).unwrap();
    writer.store(&event(1), false).unwrap();

    let mut reader = log.connect(true).unwrap();
    reader.set_timeout(Duration::from_millis(300));
    assert!(reader.seek_seqno(1).unwrap());
    assert!(reader.next(true).unwrap_err().is_timeout());

    let waiter = thread::spawn(move || {
        reader.set_timeout(Duration::from_secs(5));
        reader.next(true).map(|e| e.map(|e| e.seqno()))
    });
    thread::sleep(Duration::from_millis(50));
    writer.commit().unwrap();
    assert_eq!(waiter.join().unwrap().unwrap(), Some(1));
}

#[test]
fn uncommitted_stores_never_reach_the_files() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path()).buffer_size(64)).unwrap();
    let mut writer = log.connect(false).unwrap();
    writer.store(&event(0), true).unwrap();
    let segment = temp.path().join(&log.log_file_names()[0]);
    let committed_len = std::fs::metadata(&segment).unwrap().len();

    // Far more than one buffer's worth.
    for seqno in 1..10 {
        writer.store(&event(seqno), false).unwrap();
    }
    assert_eq!(log.max_seqno(), 0);
    assert_eq!(std::fs::metadata(&segment).unwrap().len(), committed_len);

    let other = DiskLog::prepare(config(temp.path()).read_only(true)).unwrap();
    assert_eq!(other.max_seqno(), 0);
    let mut reader = other.connect(true).unwrap();
    assert!(!reader.seek_seqno(5).unwrap());
    assert!(reader.seek_seqno(1).unwrap());
    assert!(reader.next(false).unwrap().is_none());

    writer.commit().unwrap();
    assert_eq!(reader.next(false).unwrap().unwrap().seqno(), 1);
    assert_eq!(other.max_seqno(), 9);
}

#[test]
fn crash_before_commit_loses_only_uncommitted_stores() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path()).buffer_size(64)).unwrap();
    let mut writer = log.connect(false).unwrap();
    for seqno in 0..3 {
        writer.store(&event(seqno), true).unwrap();
    }
    for seqno in 3..20 {
        writer.store(&event(seqno), false).unwrap();
    }
    // Vanish without commit or release. The leaked handles keep the lock.
    std::mem::forget(writer);
    std::mem::forget(log);

    let reopened = DiskLog::prepare(config(temp.path())).unwrap();
    assert!(!reopened.is_writable());
    assert_eq!(reopened.max_seqno(), 2);

    let mut reader = reopened.connect(true).unwrap();
    assert!(reader.seek_first().unwrap());
    let mut seen = Vec::new();
    while let Some(event) = reader.next(false).unwrap() {
        seen.push(event.seqno());
    }
    assert_eq!(seen, vec![0, 1, 2]);
}

#[test]
fn read_only_instance_follows_writer() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path()).segment_size(400)).unwrap();
    let mut writer = log.connect(false).unwrap();
    for seqno in 0..3 {
        writer.store(&event(seqno), true).unwrap();
    }

    let follower = DiskLog::prepare(config(temp.path()).read_only(true)).unwrap();
    assert_eq!(follower.max_seqno(), 2);
    let mut reader = follower.connect(true).unwrap();
    assert!(reader.seek_seqno(3).unwrap());

    thread::scope(|scope| {
        let tail = scope.spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < 37 {
                seen.push(reader.next(true).unwrap().unwrap().seqno());
            }
            seen
        });
        for seqno in 3..40 {
            writer.store(&event(seqno), true).unwrap();
            if seqno % 10 == 0 {
                thread::sleep(Duration::from_millis(20));
            }
        }
        assert_eq!(tail.join().unwrap(), (3..40).collect::<Vec<_>>());
    });

    assert!(log.file_count() > 1);
    assert_eq!(follower.max_seqno(), 39);
    assert_eq!(follower.log_file_names(), log.log_file_names());

    // Head deletes by the writer show up on the next refresh.
    let high = log.segments()[0].last_seqno;
    writer.delete(None, Some(high)).unwrap();
    assert!(follower.refresh().unwrap());
    assert_eq!(follower.log_file_names(), log.log_file_names());
    assert_eq!(follower.min_seqno(), log.min_seqno());
    assert!(!follower.refresh().unwrap());
}

#[test]
fn implicit_flush_makes_store_visible() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path()).flush_interval(Duration::from_millis(100)))
        .unwrap();
    let mut writer = log.connect(false).unwrap();
    writer.store(&event(0), false).unwrap();

    let mut reader = log.connect(true).unwrap();
    reader.set_timeout(Duration::from_secs(5));
    assert!(reader.seek_seqno(0).unwrap());
    assert_eq!(reader.next(true).unwrap().unwrap().seqno(), 0);
}

#[test]
fn second_writer_waits_for_release() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path())).unwrap();
    let mut first = log.connect(false).unwrap();
    assert!(matches!(
        log.connect(false),
        Err(ThlError::WriterAlreadyHeld)
    ));
    first.release().unwrap();
    let mut second = log.connect(false).unwrap();
    second.store(&event(0), true).unwrap();
}

#[test]
fn released_handle_interrupts_blocked_reader() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path())).unwrap();
    let mut reader = log.connect(true).unwrap();
    reader.set_timeout(Duration::from_secs(30));
    assert!(reader.seek_seqno(0).unwrap());
    let handle = reader.interrupt_handle();

    let waiter = thread::spawn(move || reader.next(true));
    thread::sleep(Duration::from_millis(100));
    handle.release();

    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, ThlError::Interrupted { .. }));
}

#[test]
fn filtered_range_advances_max_and_covers_seeks() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path())).unwrap();
    let mut writer = log.connect(false).unwrap();
    writer.store(&event(0), true).unwrap();
    writer.store(&LogEvent::filtered(1, 9, 0), true).unwrap();
    writer.store(&event(10), true).unwrap();
    assert_eq!(log.max_seqno(), 10);

    let mut reader = log.connect(true).unwrap();
    for target in 1..=9 {
        assert!(reader.seek_seqno(target).unwrap());
        let placeholder = reader.next(false).unwrap().unwrap();
        assert!(placeholder.is_filtered());
        assert_eq!(placeholder.seqno(), 1);
        assert_eq!(placeholder.last_seqno(), 9);
    }
    assert_eq!(reader.next(false).unwrap().unwrap().seqno(), 10);

    // Anything inside the range is now behind the writer.
    assert!(writer.store(&event(5), true).is_err());
}

#[test]
fn tail_delete_invalidates_positioned_reader() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path())).unwrap();
    let mut writer = log.connect(false).unwrap();
    for seqno in 0..10 {
        writer.store(&event(seqno), true).unwrap();
    }

    let mut reader = log.connect(true).unwrap();
    assert!(reader.seek_seqno(2).unwrap());
    assert_eq!(reader.next(false).unwrap().unwrap().seqno(), 2);

    writer.delete(Some(5), None).unwrap();
    assert!(matches!(reader.next(false), Err(ThlError::Position { .. })));

    assert!(reader.seek_seqno(3).unwrap());
    assert_eq!(reader.next(false).unwrap().unwrap().seqno(), 3);
}

#[test]
fn seek_segment_stops_at_rotate() {
    let temp = tempdir().unwrap();
    let log = DiskLog::prepare(config(temp.path()).segment_size(300)).unwrap();
    let mut writer = log.connect(false).unwrap();
    for seqno in 0..30 {
        writer.store(&event(seqno), true).unwrap();
    }
    let segments = log.segments();
    assert!(segments.len() > 2);

    let mut reader = log.connect(true).unwrap();
    assert!(reader.seek_segment(&segments[1].file_name).unwrap());
    let mut seen = Vec::new();
    while let Some(e) = reader.next(false).unwrap() {
        seen.push(e.seqno());
    }
    let expected: Vec<i64> = (segments[1].base_seqno..=segments[1].last_seqno).collect();
    assert_eq!(seen, expected);
    assert!(!reader.seek_segment("thl.data.0000009999").unwrap());
}

#[test]
fn corrupted_record_fails_read_and_validate() {
    let temp = tempdir().unwrap();
    {
        let log = DiskLog::prepare(config(temp.path())).unwrap();
        let mut writer = log.connect(false).unwrap();
        for seqno in 0..3 {
            writer.store(&event(seqno), true).unwrap();
        }
    }
    let path = temp.path().join("thl.data.0000000001");
    let mut bytes = std::fs::read(&path).unwrap();
    let pos = bytes.len() - 5;
    bytes[pos] ^= 0x01;
    std::fs::write(&path, bytes).unwrap();

    let log = DiskLog::prepare(config(temp.path())).unwrap();
    assert!(matches!(
        log.validate(),
        Err(ThlError::ChecksumMismatch { .. })
    ));

    let mut reader = log.connect(true).unwrap();
    assert!(reader.seek_seqno(2).unwrap());
    assert!(matches!(
        reader.next(false),
        Err(ThlError::ChecksumMismatch { .. })
    ));
}

#[test]
fn json_serializer_logs_read_back() {
    let temp = tempdir().unwrap();
    let cfg = config(temp.path()).serializer(thl_core::SerializerKind::Json);
    {
        let log = DiskLog::prepare(cfg.clone()).unwrap();
        let mut writer = log.connect(false).unwrap();
        writer.store(&event(0), true).unwrap();
        writer.store(&LogEvent::filtered(1, 4, 2), true).unwrap();
    }
    let log = DiskLog::prepare(cfg).unwrap();
    let mut reader = log.connect(true).unwrap();
    assert!(reader.seek_first().unwrap());
    assert_eq!(reader.next(false).unwrap().unwrap(), event(0));
    assert_eq!(
        reader.next(false).unwrap().unwrap().event,
        ReplEvent::FilteredRange {
            to_seqno: 4,
            to_fragno: 2
        }
    );
}
