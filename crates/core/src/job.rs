// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job record and status state machine.

use crate::clock::Clock;
use crate::unit::UnitId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a batch job.
    ///
    /// Assigned at creation and used to reference the job in the store,
    /// the HTTP API, logs, and the supervisor command line.
    pub struct JobId("job-");
}

/// Metadata key holding the PID of the detached supervisor process.
pub const META_EXECUTOR_PID: &str = "executor_pid";

/// Metadata key naming the payload field used as a unit's display label.
pub const META_UNIT_LABEL_FIELD: &str = "unit_label_field";

/// Metadata key recording the error message of a crashed supervisor.
pub const META_SUPERVISOR_ERROR: &str = "supervisor_error";

/// Job lifecycle status.
///
/// `Ready` sits between an approved test phase and the supervisor picking
/// the job up; a crash in that window leaves the job visibly resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Testing,
    Ready,
    Running,
    PostProcessing,
    Completed,
    Failed,
    Paused,
}

impl JobStatus {
    /// True when a supervisor may transition this job to `Running`.
    pub fn may_start(&self) -> bool {
        matches!(self, JobStatus::Created | JobStatus::Ready | JobStatus::Paused)
    }

    /// True when the job will never run again without operator action.
    pub fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

crate::simple_display! {
    JobStatus {
        Created => "created",
        Testing => "testing",
        Ready => "ready",
        Running => "running",
        PostProcessing => "post_processing",
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
    }
}

/// A batch job: one user task fanned out over many work units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    /// Original task description as the user phrased it.
    pub user_intent: String,
    /// Per-unit prompt template with `{placeholder}` slots filled from payloads.
    pub worker_prompt_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_processing_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_processing_output_directory: Option<PathBuf>,
    /// Tag describing what each unit's payload represents ("file", "url", ...).
    pub unit_type: String,
    pub max_workers: u32,
    pub max_retries: u32,
    /// Count of persisted non-post-processing units.
    #[serde(default)]
    pub total_units: u64,
    #[serde(default)]
    pub completed_units: u64,
    #[serde(default)]
    pub failed_units: u64,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_unit_id: Option<UnitId>,
    #[serde(default)]
    pub test_passed: bool,
    /// Unblocks post-processing despite terminal unit failures. Never
    /// changes unit state.
    #[serde(default)]
    pub bypass_failures: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Job {
    /// Create a job in `Created` with empty counters.
    pub fn new(
        name: impl Into<String>,
        user_intent: impl Into<String>,
        worker_prompt_template: impl Into<String>,
        unit_type: impl Into<String>,
        max_workers: u32,
        max_retries: u32,
        clock: &impl Clock,
    ) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            user_intent: user_intent.into(),
            worker_prompt_template: worker_prompt_template.into(),
            post_processing_prompt: None,
            post_processing_output_directory: None,
            unit_type: unit_type.into(),
            max_workers: max_workers.max(1),
            max_retries,
            total_units: 0,
            completed_units: 0,
            failed_units: 0,
            created_at: clock.epoch_ms(),
            started_at: None,
            completed_at: None,
            status: JobStatus::Created,
            test_unit_id: None,
            test_passed: false,
            bypass_failures: false,
            metadata: HashMap::new(),
        }
    }

    crate::setters! {
        option {
            post_processing_prompt: String,
            post_processing_output_directory: PathBuf,
        }
    }

    /// PID of the supervisor recorded in metadata, if any.
    pub fn executor_pid(&self) -> Option<u32> {
        self.metadata
            .get(META_EXECUTOR_PID)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn set_executor_pid(&mut self, pid: u32) {
        self.metadata.insert(META_EXECUTOR_PID.to_string(), serde_json::json!(pid));
    }

    pub fn clear_executor_pid(&mut self) {
        self.metadata.remove(META_EXECUTOR_PID);
    }

    /// Payload field used as the display label for this job's units.
    pub fn unit_label_field(&self) -> Option<&str> {
        self.metadata.get(META_UNIT_LABEL_FIELD).and_then(|v| v.as_str())
    }

    /// Mark the job running, stamping `started_at` on first entry only.
    pub fn mark_running(&mut self, epoch_ms: u64) {
        self.status = JobStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(epoch_ms);
        }
    }

    /// Settle the job in a final status and stamp `completed_at`.
    pub fn settle(&mut self, status: JobStatus, epoch_ms: u64) {
        self.status = status;
        self.completed_at = Some(epoch_ms);
    }

    /// `completed_units` capped at `total_units` for display, tolerating
    /// legacy rows that counted the post-processing unit in the total.
    pub fn display_completed_units(&self) -> u64 {
        self.completed_units.min(self.total_units)
    }

    /// Check the record-level invariants that every persisted job must hold.
    pub fn invariants_hold(&self) -> bool {
        if self.completed_units + self.failed_units > self.total_units {
            return false;
        }
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            if started > completed {
                return false;
            }
        }
        self.max_workers > 0
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            name: String = "test-job",
            user_intent: String = "do the thing to every item",
            worker_prompt_template: String = "process {file_path}",
            unit_type: String = "file",
        }
        set {
            max_workers: u32 = 2,
            max_retries: u32 = 3,
            total_units: u64 = 0,
            completed_units: u64 = 0,
            failed_units: u64 = 0,
            created_at: u64 = 1_000_000,
            status: JobStatus = JobStatus::Created,
            test_passed: bool = false,
            bypass_failures: bool = false,
            metadata: HashMap<String, serde_json::Value> = HashMap::new(),
        }
        option {
            post_processing_prompt: String = None,
            post_processing_output_directory: PathBuf = None,
            started_at: u64 = None,
            completed_at: u64 = None,
            test_unit_id: UnitId = None,
        }
        computed {
            id: JobId = JobId::new(),
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
