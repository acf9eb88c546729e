// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_core::{LogEntry, LogLevel};
use std::io::Write as _;
use tempfile::tempdir;

fn test_event(msg: &str) -> StoreEvent {
    StoreEvent::LogAppended { entry: LogEntry::new(LogLevel::Info, "test", msg) }
}

fn event_message(event: &StoreEvent) -> &str {
    match event {
        StoreEvent::LogAppended { entry } => &entry.message,
        other => panic!("expected log event, got {}", other.name()),
    }
}

#[test]
fn read_missing_file_is_empty() {
    let dir = tempdir().unwrap();
    let wal = Wal::new(dir.path().join("events.wal"));
    let mut cursor = WalCursor::default();
    assert!(wal.read_from(&mut cursor).unwrap().is_empty());
    assert_eq!(cursor, WalCursor::default());
}

#[test]
fn append_assigns_sequential_seqs() {
    let dir = tempdir().unwrap();
    let wal = Wal::new(dir.path().join("events.wal"));
    let mut cursor = WalCursor::default();

    assert_eq!(wal.append(&mut cursor, &test_event("one")).unwrap(), 1);
    assert_eq!(wal.append(&mut cursor, &test_event("two")).unwrap(), 2);
    assert_eq!(cursor.seq, 2);
}

#[test]
fn reader_sees_appended_entries_in_order() {
    let dir = tempdir().unwrap();
    let wal = Wal::new(dir.path().join("events.wal"));
    let mut writer = WalCursor::default();
    wal.append(&mut writer, &test_event("one")).unwrap();
    wal.append(&mut writer, &test_event("two")).unwrap();

    let mut reader = WalCursor::default();
    let entries = wal.read_from(&mut reader).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 1);
    assert_eq!(event_message(&entries[0].event), "one");
    assert_eq!(entries[1].seq, 2);
    assert_eq!(event_message(&entries[1].event), "two");
    assert_eq!(reader, writer);

    // Tail read: nothing new.
    assert!(wal.read_from(&mut reader).unwrap().is_empty());

    wal.append(&mut writer, &test_event("three")).unwrap();
    let tail = wal.read_from(&mut reader).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].seq, 3);
}

#[test]
fn torn_tail_is_invisible_and_repaired_by_next_append() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");
    let wal = Wal::new(&path);
    let mut writer = WalCursor::default();
    wal.append(&mut writer, &test_event("good")).unwrap();

    // Simulate a writer that died mid-append.
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"seq\":2,\"event\":{\"op\":\"log_app").unwrap();
    }

    let mut reader = WalCursor::default();
    let entries = wal.read_from(&mut reader).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, 1);

    // The locked writer truncates the torn bytes and reuses seq 2.
    assert_eq!(wal.append(&mut writer, &test_event("repaired")).unwrap(), 2);
    let tail = wal.read_from(&mut reader).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(event_message(&tail[0].event), "repaired");
}

#[test]
fn corruption_before_the_tail_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events.wal");
    let wal = Wal::new(&path);
    let mut writer = WalCursor::default();
    wal.append(&mut writer, &test_event("good")).unwrap();

    // A malformed line followed by a complete line is not a torn tail.
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"garbage that is not json\n").unwrap();
    file.write_all(b"{\"seq\":2,\"event\":{\"op\":\"log_appended\",\"entry\":{\"timestamp\":\"2026-01-01T00:00:00Z\",\"level\":\"info\",\"source\":\"t\",\"message\":\"m\"}}}\n")
        .unwrap();
    drop(file);

    let mut reader = WalCursor::default();
    assert!(matches!(wal.read_from(&mut reader), Err(WalError::Corrupt { .. })));
}

#[test]
fn truncate_through_drops_covered_entries_but_keeps_seq() {
    let dir = tempdir().unwrap();
    let wal = Wal::new(dir.path().join("events.wal"));
    let mut writer = WalCursor::default();
    for n in 1..=3 {
        wal.append(&mut writer, &test_event(&format!("e{}", n))).unwrap();
    }

    wal.truncate_through(&mut writer, 3).unwrap();
    assert_eq!(writer.seq, 3);
    let mut fresh = WalCursor::default();
    assert!(wal.read_from(&mut fresh).unwrap().is_empty());

    // Sequence numbering continues from the snapshot point.
    assert_eq!(wal.append(&mut writer, &test_event("four")).unwrap(), 4);

    // A reader whose cursor predates the compaction skips what it has seen.
    let mut reader = WalCursor { seq: 3, offset: 10_000, generation: 0 };
    let entries = wal.read_from(&mut reader).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, 4);
}

#[test]
fn reader_with_stale_offset_survives_compaction() {
    let dir = tempdir().unwrap();
    let wal = Wal::new(dir.path().join("events.wal"));
    let mut writer = WalCursor::default();
    for n in 1..=3 {
        wal.append(&mut writer, &test_event(&format!("e{}", n))).unwrap();
    }

    // Reader catches up fully, then the writer compacts and appends more.
    let mut reader = WalCursor::default();
    assert_eq!(wal.read_from(&mut reader).unwrap().len(), 3);

    wal.truncate_through(&mut writer, 3).unwrap();
    wal.append(&mut writer, &test_event("four")).unwrap();

    // The reader's byte offset is meaningless in the new generation; the
    // header forces a rescan and the seq watermark dedups the rest.
    let entries = wal.read_from(&mut reader).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, 4);
    assert_eq!(event_message(&entries[0].event), "four");
}

#[test]
fn truncate_keeps_entries_beyond_the_snapshot() {
    let dir = tempdir().unwrap();
    let wal = Wal::new(dir.path().join("events.wal"));
    let mut writer = WalCursor::default();
    for n in 1..=4 {
        wal.append(&mut writer, &test_event(&format!("e{}", n))).unwrap();
    }

    wal.truncate_through(&mut writer, 2).unwrap();

    let mut reader = WalCursor::default();
    let entries = wal.read_from(&mut reader).unwrap();
    let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, [3, 4]);
}
