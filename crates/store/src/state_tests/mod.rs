// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_core::test_support::sample_conversation;
use drover_core::{Job, JobStatus, UnitStatus, WorkUnit, WorkerRecord};

fn job() -> Job {
    Job::builder().build()
}

fn unit_for(job: &Job) -> WorkUnit {
    WorkUnit::builder().job_id(job.id).build()
}

#[test]
fn job_created_inserts_once() {
    let mut state = MaterializedState::default();
    let mut job = job();
    let original_name = job.name.clone();

    state.apply_event(&StoreEvent::JobCreated { job: job.clone() });

    // A duplicate create never overwrites the original record.
    job.name = "imposter".into();
    state.apply_event(&StoreEvent::JobCreated { job: job.clone() });

    assert_eq!(state.jobs.len(), 1);
    assert_eq!(state.get_job(job.id.as_str()).unwrap().name, original_name);
}

#[test]
fn job_updated_is_last_writer_wins() {
    let mut state = MaterializedState::default();
    let mut job = job();
    state.apply_event(&StoreEvent::JobCreated { job: job.clone() });

    job.status = JobStatus::Running;
    state.apply_event(&StoreEvent::JobUpdated { job: job.clone() });
    job.status = JobStatus::Completed;
    state.apply_event(&StoreEvent::JobUpdated { job: job.clone() });

    assert_eq!(state.get_job(job.id.as_str()).unwrap().status, JobStatus::Completed);
}

#[test]
fn unit_events_append_in_order() {
    let mut state = MaterializedState::default();
    let job = job();
    let unit = unit_for(&job);
    state.apply_event(&StoreEvent::UnitCreated { unit: unit.clone() });

    for event in sample_conversation("sess-1", false, 0.01) {
        state.apply_event(&StoreEvent::UnitEventAppended { unit_id: unit.id, event });
    }

    let stored = state.get_unit(unit.id.as_str()).unwrap();
    assert_eq!(stored.conversation.len(), 3);
    assert!(stored.conversation[0].is_init());
    assert!(stored.conversation[2].is_result());
}

#[test]
fn unit_update_never_shrinks_a_streamed_conversation() {
    let mut state = MaterializedState::default();
    let job = job();
    let mut unit = unit_for(&job);
    state.apply_event(&StoreEvent::UnitCreated { unit: unit.clone() });

    for event in sample_conversation("sess-1", false, 0.01) {
        state.apply_event(&StoreEvent::UnitEventAppended { unit_id: unit.id, event });
    }

    // A status-only update built before the stream finished.
    unit.status = UnitStatus::Completed;
    unit.completed_at = Some(2_000);
    state.apply_event(&StoreEvent::UnitUpdated { unit: unit.clone() });

    let stored = state.get_unit(unit.id.as_str()).unwrap();
    assert_eq!(stored.status, UnitStatus::Completed);
    assert_eq!(stored.conversation.len(), 3);
}

#[test]
fn append_to_unknown_unit_is_ignored() {
    let mut state = MaterializedState::default();
    let events = sample_conversation("sess-1", false, 0.0);
    state.apply_event(&StoreEvent::UnitEventAppended {
        unit_id: drover_core::UnitId::from_string("unt-ghost"),
        event: events[0].clone(),
    });
    assert!(state.units.is_empty());
}

#[test]
fn worker_upsert_overwrites() {
    let mut state = MaterializedState::default();
    let job = job();
    let unit = unit_for(&job);
    let mut worker = WorkerRecord::new(job.id, unit.id, 1, 1_000);

    state.apply_event(&StoreEvent::WorkerUpserted { worker: worker.clone() });
    worker.terminate(2_000);
    state.apply_event(&StoreEvent::WorkerUpserted { worker: worker.clone() });

    assert_eq!(state.workers.len(), 1);
    assert!(!state.workers[worker.id.as_str()].is_live());
}

#[test]
fn prefix_lookup_resolves_units() {
    let mut state = MaterializedState::default();
    let job = job();
    let unit = unit_for(&job);
    state.apply_event(&StoreEvent::UnitCreated { unit: unit.clone() });

    let prefix = &unit.id.as_str()[..10];
    assert_eq!(state.get_unit(prefix).unwrap().id, unit.id);
}

#[test]
fn state_round_trips_through_json() {
    let mut state = MaterializedState::default();
    let job = job();
    let unit = unit_for(&job);
    state.apply_event(&StoreEvent::JobCreated { job: job.clone() });
    state.apply_event(&StoreEvent::UnitCreated { unit });
    state.apply_event(&StoreEvent::LogAppended {
        entry: drover_core::LogEntry::new(drover_core::LogLevel::Info, "test", "hello"),
    });

    let json = serde_json::to_string(&state).unwrap();
    let back: MaterializedState = serde_json::from_str(&json).unwrap();
    assert_eq!(back.jobs.len(), 1);
    assert_eq!(back.units.len(), 1);
    assert_eq!(back.logs.len(), 1);
}
