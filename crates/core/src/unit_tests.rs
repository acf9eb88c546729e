// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn payload(pairs: &[(&str, &str)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect()
}

fn fresh_unit() -> WorkUnit {
    WorkUnit::new(
        JobId::from_string("job-test"),
        "file",
        0,
        payload(&[("file_path", "/tmp/a.txt")]),
        3,
        1_000,
    )
}

#[test]
fn lifecycle_happy_path() {
    let mut unit = fresh_unit();
    assert_eq!(unit.status, UnitStatus::Pending);
    assert!(unit.invariants_hold());

    unit.assign(WorkerId::new(), "prompt".into(), 2_000);
    assert_eq!(unit.status, UnitStatus::Assigned);
    assert!(unit.worker_id.is_some());
    assert!(unit.invariants_hold());

    unit.begin(3_000);
    assert_eq!(unit.status, UnitStatus::Processing);
    unit.process_id = Some(999);
    assert!(unit.invariants_hold());

    unit.complete(8_000);
    assert_eq!(unit.status, UnitStatus::Completed);
    assert_eq!(unit.completed_at, Some(8_000));
    assert!(unit.worker_id.is_none());
    assert!(unit.process_id.is_none());
    assert!((unit.execution_time_seconds - 5.0).abs() < f64::EPSILON);
    assert!(unit.invariants_hold());
}

#[test]
fn fail_records_error_and_releases_worker() {
    let mut unit = fresh_unit();
    unit.assign(WorkerId::new(), "p".into(), 2_000);
    unit.begin(3_000);
    unit.fail("agent exploded", 4_000);

    assert_eq!(unit.status, UnitStatus::Failed);
    assert_eq!(unit.error.as_deref(), Some("agent exploded"));
    assert!(unit.worker_id.is_none());
    assert!(unit.invariants_hold());
}

#[test]
fn reset_for_retry_increments_count_and_clears_timestamps() {
    let mut unit = fresh_unit();
    unit.assign(WorkerId::new(), "p".into(), 2_000);
    unit.begin(3_000);
    unit.fail("transient", 4_000);

    unit.reset_for_retry();
    assert_eq!(unit.status, UnitStatus::Pending);
    assert_eq!(unit.retry_count, 1);
    assert!(unit.started_at.is_none());
    assert!(unit.completed_at.is_none());
    // The last failure stays visible until the next attempt overwrites it.
    assert_eq!(unit.error.as_deref(), Some("transient"));
}

#[test]
fn reset_stuck_preserves_retry_count() {
    let mut unit = fresh_unit();
    unit.retry_count = 2;
    unit.assign(WorkerId::new(), "p".into(), 2_000);
    unit.begin(3_000);

    unit.reset_stuck();
    assert_eq!(unit.status, UnitStatus::Pending);
    assert_eq!(unit.retry_count, 2);
    assert!(unit.worker_id.is_none());
    assert!(unit.process_id.is_none());
}

#[test]
fn restart_clears_error_but_keeps_retry_count() {
    let mut unit = fresh_unit();
    unit.retry_count = 4; // exhausted
    unit.fail("permanent", 4_000);

    unit.restart();
    assert_eq!(unit.status, UnitStatus::Pending);
    assert!(unit.error.is_none());
    assert_eq!(unit.retry_count, 4);
}

#[parameterized(
    fresh = { 0, 3, true },
    mid = { 2, 3, true },
    exhausted = { 3, 3, false },
    zero_budget = { 0, 0, false },
)]
fn can_retry(retry_count: u32, max_retries: u32, expected: bool) {
    let unit = WorkUnit::builder().retry_count(retry_count).max_retries(max_retries).build();
    assert_eq!(unit.can_retry(), expected);
}

#[test]
fn retry_count_beyond_budget_violates_invariants() {
    let unit = WorkUnit::builder().retry_count(5).max_retries(3).build();
    assert!(!unit.invariants_hold());
}

#[test]
fn held_status_without_worker_violates_invariants() {
    let unit = WorkUnit::builder().status(UnitStatus::Assigned).build();
    assert!(!unit.invariants_hold());
}

#[test]
fn process_id_outside_processing_violates_invariants() {
    let unit = WorkUnit::builder().status(UnitStatus::Pending).process_id(42u32).build();
    assert!(!unit.invariants_hold());
}

#[test]
fn label_prefers_configured_field_then_conventions() {
    let unit = WorkUnit::builder()
        .payload(payload(&[("ticket", "BUG-7"), ("file_path", "/a")]))
        .build();
    assert_eq!(unit.label(Some("ticket")), "BUG-7");
    assert_eq!(unit.label(None), "/a");

    let bare = WorkUnit::builder().build();
    assert_eq!(bare.label(None), bare.id.to_string());
}

#[test]
fn payload_key_order_survives_round_trip() {
    let unit = WorkUnit::builder()
        .payload(payload(&[("zeta", "1"), ("alpha", "2"), ("mid", "3")]))
        .build();
    let json = serde_json::to_string(&unit).unwrap();
    let back: WorkUnit = serde_json::from_str(&json).unwrap();
    let keys: Vec<&str> = back.payload.keys().map(String::as_str).collect();
    assert_eq!(keys, ["zeta", "alpha", "mid"]);
    assert_eq!(unit, back);
}

#[test]
fn post_processing_tag_is_recognized() {
    let unit = WorkUnit::builder().unit_type(POST_PROCESSING_UNIT_TYPE).build();
    assert!(unit.is_post_processing());
    assert!(!fresh_unit().is_post_processing());
}
