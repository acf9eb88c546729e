// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_core::test_support::sample_conversation;
use drover_core::{WorkUnit, WorkerRecord};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Store {
    Store::open(dir).unwrap()
}

fn seeded_job(store: &mut Store) -> Job {
    let job = Job::builder().build();
    assert!(store.create_job(job.clone()).unwrap());
    job
}

fn seeded_unit(store: &mut Store, job: &Job, sequence: u64) -> WorkUnit {
    let unit = WorkUnit::builder().job_id(job.id).sequence(sequence).build();
    assert!(store.create_work_unit(unit.clone()).unwrap());
    unit
}

#[test]
fn create_and_get_job() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);

    let fetched = store.get_job(job.id.as_str()).unwrap().unwrap();
    assert_eq!(fetched, job);

    // Prefix lookup works like git object names.
    let prefix = &job.id.as_str()[..10];
    assert_eq!(store.get_job(prefix).unwrap().unwrap().id, job.id);
}

#[test]
fn duplicate_create_returns_false() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    assert!(!store.create_job(job).unwrap());
}

#[test]
fn invariant_violating_update_is_rejected_and_not_persisted() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let mut job = seeded_job(&mut store);

    job.total_units = 1;
    job.completed_units = 5;
    assert!(!store.update_job(job.clone()).unwrap());

    let fetched = store.get_job(job.id.as_str()).unwrap().unwrap();
    assert_eq!(fetched.completed_units, 0);
}

#[test]
fn unit_requires_existing_job() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let orphan = WorkUnit::builder().job_id(JobId::from_string("job-ghost")).build();
    assert!(!store.create_work_unit(orphan).unwrap());
}

#[test]
fn second_handle_sees_committed_writes() {
    let dir = tempdir().unwrap();
    let mut writer = open(dir.path());
    let mut reader = open(dir.path());

    let job = seeded_job(&mut writer);
    assert_eq!(reader.get_job(job.id.as_str()).unwrap().unwrap().id, job.id);

    let mut updated = job.clone();
    updated.status = JobStatus::Running;
    updated.started_at = Some(2_000_000);
    assert!(writer.update_job(updated).unwrap());
    assert_eq!(
        reader.get_job(job.id.as_str()).unwrap().unwrap().status,
        JobStatus::Running
    );
}

#[test]
fn pending_units_come_back_in_dispatch_order() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);

    // Same created_at; sequence breaks the tie.
    let u2 = seeded_unit(&mut store, &job, 2);
    let u0 = seeded_unit(&mut store, &job, 0);
    let u1 = seeded_unit(&mut store, &job, 1);

    let pending = store.get_pending_units(job.id, 10).unwrap();
    let ids: Vec<_> = pending.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![u0.id, u1.id, u2.id]);

    let limited = store.get_pending_units(job.id, 2).unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn count_units_by_status_groups_correctly() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    let mut done = seeded_unit(&mut store, &job, 0);
    seeded_unit(&mut store, &job, 1);

    done.complete(2_000_000);
    assert!(store.update_work_unit(done).unwrap());

    let counts = store.count_units_by_status(job.id).unwrap();
    assert_eq!(counts.get(&UnitStatus::Completed), Some(&1));
    assert_eq!(counts.get(&UnitStatus::Pending), Some(&1));
}

#[test]
fn streamed_conversation_preserves_order() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    let unit = seeded_unit(&mut store, &job, 0);

    for event in sample_conversation("sess-9", false, 0.02) {
        assert!(store.append_unit_event(unit.id, event).unwrap());
    }

    let stored = store.get_work_unit(unit.id.as_str()).unwrap().unwrap();
    assert_eq!(stored.conversation.len(), 3);
    assert!(stored.conversation[0].is_init());
    assert!(stored.conversation[2].is_result());
}

#[test]
fn cleanup_and_reset_recover_from_a_dead_supervisor() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    let mut unit = seeded_unit(&mut store, &job, 0);

    // Worker row pointing at a PID that cannot exist.
    let dead_pid = i32::MAX as u32 - 7;
    let worker = WorkerRecord::new(job.id, unit.id, dead_pid, 1_000_000);
    assert!(store.upsert_worker(worker.clone()).unwrap());

    unit.assign(worker.id, "prompt".into(), 1_000_100);
    unit.begin(1_000_200);
    unit.retry_count = 1;
    assert!(store.update_work_unit(unit.clone()).unwrap());

    assert_eq!(store.cleanup_stale_workers(job.id).unwrap(), 1);
    assert_eq!(store.reset_stuck_units(job.id).unwrap(), 1);

    let recovered = store.get_work_unit(unit.id.as_str()).unwrap().unwrap();
    assert_eq!(recovered.status, UnitStatus::Pending);
    assert!(recovered.worker_id.is_none());
    assert!(recovered.process_id.is_none());
    // Recovery is not a failure: the retry budget is untouched.
    assert_eq!(recovered.retry_count, 1);

    let workers = store.workers_for_job(job.id).unwrap();
    assert!(workers.iter().all(|w| !w.is_live()));
}

#[test]
fn reset_leaves_live_workers_units_alone() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    let mut unit = seeded_unit(&mut store, &job, 0);

    // Worker owned by this very process: alive by definition.
    let worker = WorkerRecord::new(job.id, unit.id, std::process::id(), 1_000_000);
    assert!(store.upsert_worker(worker.clone()).unwrap());
    unit.assign(worker.id, "prompt".into(), 1_000_100);
    assert!(store.update_work_unit(unit.clone()).unwrap());

    assert_eq!(store.cleanup_stale_workers(job.id).unwrap(), 0);
    assert_eq!(store.reset_stuck_units(job.id).unwrap(), 0);
    let kept = store.get_work_unit(unit.id.as_str()).unwrap().unwrap();
    assert_eq!(kept.status, UnitStatus::Assigned);
}

#[test]
fn recompute_counters_excludes_post_processing() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    let mut done = seeded_unit(&mut store, &job, 0);
    let mut failed = seeded_unit(&mut store, &job, 1);

    done.complete(2_000_000);
    failed.fail("nope", 2_000_000);
    assert!(store.update_work_unit(done).unwrap());
    assert!(store.update_work_unit(failed).unwrap());

    let pp = WorkUnit::builder()
        .job_id(job.id)
        .unit_type(drover_core::POST_PROCESSING_UNIT_TYPE)
        .sequence(2u64)
        .build();
    assert!(store.create_work_unit(pp).unwrap());

    let counters = store.recompute_counters(job.id).unwrap();
    assert_eq!(counters.total_units, 2);
    assert_eq!(counters.completed_units, 1);
    assert_eq!(counters.failed_units, 1);
}

#[test]
fn checkpoint_then_reopen_preserves_state() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    let unit = seeded_unit(&mut store, &job, 0);
    store.checkpoint().unwrap();

    // WAL is compacted down to its header; the snapshot carries the state.
    let wal = Wal::new(dir.path().join("events.wal"));
    let mut scratch = WalCursor::default();
    assert!(wal.read_from(&mut scratch).unwrap().is_empty());
    assert!(dir.path().join("snapshot.zst").exists());

    let mut reopened = open(dir.path());
    assert!(reopened.get_job(job.id.as_str()).unwrap().is_some());
    assert!(reopened.get_work_unit(unit.id.as_str()).unwrap().is_some());

    // Writes after the checkpoint keep flowing.
    let job2 = seeded_job(&mut reopened);
    assert!(store.get_job(job2.id.as_str()).unwrap().is_some());
}

#[test]
fn query_logs_filters_by_job_and_level() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    let other = seeded_job(&mut store);

    store
        .append_log(LogEntry::new(LogLevel::Info, "pool", "dispatched").job_id(job.id))
        .unwrap();
    store
        .append_log(LogEntry::new(LogLevel::Error, "runner", "timeout").job_id(job.id))
        .unwrap();
    store
        .append_log(LogEntry::new(LogLevel::Info, "pool", "elsewhere").job_id(other.id))
        .unwrap();

    let all = store.query_logs(Some(job.id), LogFilter::default()).unwrap();
    assert_eq!(all.len(), 2);

    let errors = store
        .query_logs(Some(job.id), LogFilter { min_level: Some(LogLevel::Error), ..Default::default() })
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "timeout");

    let capped = store
        .query_logs(None, LogFilter { limit: 2, ..Default::default() })
        .unwrap();
    assert_eq!(capped.len(), 2);
    assert_eq!(capped[1].message, "elsewhere");
}

#[test]
fn stats_aggregates_across_jobs() {
    let dir = tempdir().unwrap();
    let mut store = open(dir.path());
    let job = seeded_job(&mut store);
    let mut unit = seeded_unit(&mut store, &job, 0);
    unit.cost_usd = 0.25;
    unit.complete(2_000_000);
    assert!(store.update_work_unit(unit).unwrap());

    let stats = store.stats().unwrap();
    assert_eq!(stats.jobs_total, 1);
    assert_eq!(stats.units_total, 1);
    assert_eq!(stats.jobs_by_status.get("created"), Some(&1));
    assert_eq!(stats.units_by_status.get("completed"), Some(&1));
    assert!((stats.total_cost_usd - 0.25).abs() < f64::EPSILON);
}
