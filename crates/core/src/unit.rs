// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work unit record and status state machine.

use crate::agent_event::AgentEvent;
use crate::job::JobId;
use crate::worker::WorkerId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a work unit.
    pub struct UnitId("unt-");
}

/// Reserved unit type for the synthetic post-batch synthesis unit.
pub const POST_PROCESSING_UNIT_TYPE: &str = "post_processing";

/// Ordered payload/result mapping. Key order is the enumeration order and
/// is preserved through serialization.
pub type Payload = IndexMap<String, serde_json::Value>;

/// Work unit lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Assigned,
    Processing,
    Completed,
    Failed,
}

impl UnitStatus {
    /// True when a worker currently holds this unit.
    pub fn is_held(&self) -> bool {
        matches!(self, UnitStatus::Assigned | UnitStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Completed | UnitStatus::Failed)
    }
}

crate::simple_display! {
    UnitStatus {
        Pending => "pending",
        Assigned => "assigned",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

/// One item of a batch: payload in, agent conversation and result out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: UnitId,
    pub job_id: JobId,
    pub unit_type: String,
    /// Position in the enumeration; ties on `created_at` dispatch in
    /// `sequence` order.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub payload: Payload,
    pub status: UnitStatus,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(default)]
    pub result: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub execution_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub rendered_prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation: Vec<AgentEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cost_usd: f64,
    /// OS PID of the agent subprocess; set only while `Processing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
}

impl WorkUnit {
    pub fn new(
        job_id: JobId,
        unit_type: impl Into<String>,
        sequence: u64,
        payload: Payload,
        max_retries: u32,
        epoch_ms: u64,
    ) -> Self {
        Self {
            id: UnitId::new(),
            job_id,
            unit_type: unit_type.into(),
            sequence,
            payload,
            status: UnitStatus::Pending,
            created_at: epoch_ms,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            worker_id: None,
            result: Payload::new(),
            error: None,
            retry_count: 0,
            max_retries,
            execution_time_seconds: 0.0,
            output_files: Vec::new(),
            rendered_prompt: String::new(),
            conversation: Vec::new(),
            session_id: None,
            cost_usd: 0.0,
            process_id: None,
        }
    }

    pub fn is_post_processing(&self) -> bool {
        self.unit_type == POST_PROCESSING_UNIT_TYPE
    }

    /// `pending → assigned`: a pool slot took the unit.
    pub fn assign(&mut self, worker_id: WorkerId, rendered_prompt: String, epoch_ms: u64) {
        self.status = UnitStatus::Assigned;
        self.worker_id = Some(worker_id);
        self.rendered_prompt = rendered_prompt;
        self.assigned_at = Some(epoch_ms);
    }

    /// `assigned → processing`: the agent subprocess is live.
    pub fn begin(&mut self, epoch_ms: u64) {
        self.status = UnitStatus::Processing;
        self.started_at = Some(epoch_ms);
    }

    /// Terminal success. Execution time falls back to the started/completed
    /// delta when the runner did not report one.
    pub fn complete(&mut self, epoch_ms: u64) {
        self.status = UnitStatus::Completed;
        self.completed_at = Some(epoch_ms);
        self.worker_id = None;
        self.process_id = None;
        if self.execution_time_seconds == 0.0 {
            if let Some(started) = self.started_at {
                self.execution_time_seconds = epoch_ms.saturating_sub(started) as f64 / 1000.0;
            }
        }
    }

    /// Failure (possibly retried later by the failure callback).
    pub fn fail(&mut self, error: impl Into<String>, epoch_ms: u64) {
        self.status = UnitStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(epoch_ms);
        self.worker_id = None;
        self.process_id = None;
        if self.execution_time_seconds == 0.0 {
            if let Some(started) = self.started_at {
                self.execution_time_seconds = epoch_ms.saturating_sub(started) as f64 / 1000.0;
            }
        }
    }

    /// `failed → pending` on retry; increments `retry_count`, keeps the
    /// last error visible until the next attempt overwrites it.
    pub fn reset_for_retry(&mut self) {
        self.status = UnitStatus::Pending;
        self.retry_count += 1;
        self.worker_id = None;
        self.process_id = None;
        self.assigned_at = None;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Recovery reset for units orphaned by a dead worker; `retry_count`
    /// unchanged.
    pub fn reset_stuck(&mut self) {
        self.status = UnitStatus::Pending;
        self.worker_id = None;
        self.process_id = None;
        self.assigned_at = None;
        self.started_at = None;
    }

    /// Explicit operator restart of a failed unit: back to pending with
    /// worker, process, and error cleared. `retry_count` is preserved.
    pub fn restart(&mut self) {
        self.status = UnitStatus::Pending;
        self.worker_id = None;
        self.process_id = None;
        self.error = None;
        self.assigned_at = None;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Whether the failure callback may send this unit around again.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn latest_event(&self) -> Option<&AgentEvent> {
        self.conversation.last()
    }

    /// Human label for dashboards: the job's configured label field, then
    /// conventional payload keys, then the unit id.
    pub fn label(&self, label_field: Option<&str>) -> String {
        let keys = label_field
            .into_iter()
            .chain(["file_path", "url", "name", "id"]);
        for key in keys {
            if let Some(v) = self.payload.get(key) {
                return crate::template::value_to_string(v);
            }
        }
        self.id.to_string()
    }

    /// Check the record-level invariants that every persisted unit must hold.
    pub fn invariants_hold(&self) -> bool {
        if self.retry_count > self.max_retries + 1 {
            return false;
        }
        if self.status.is_terminal() && self.completed_at.is_none() {
            return false;
        }
        if self.worker_id.is_some() != self.status.is_held() {
            return false;
        }
        if self.process_id.is_some() && self.status != UnitStatus::Processing {
            return false;
        }
        true
    }
}

crate::builder! {
    pub struct WorkUnitBuilder => WorkUnit {
        into {
            unit_type: String = "file",
        }
        set {
            job_id: JobId = JobId::from_string("job-test"),
            sequence: u64 = 0,
            payload: Payload = Payload::new(),
            status: UnitStatus = UnitStatus::Pending,
            created_at: u64 = 1_000_000,
            result: Payload = Payload::new(),
            retry_count: u32 = 0,
            max_retries: u32 = 3,
            execution_time_seconds: f64 = 0.0,
            output_files: Vec<String> = Vec::new(),
            rendered_prompt: String = String::new(),
            conversation: Vec<AgentEvent> = Vec::new(),
            cost_usd: f64 = 0.0,
        }
        option {
            assigned_at: u64 = None,
            started_at: u64 = None,
            completed_at: u64 = None,
            worker_id: WorkerId = None,
            error: String = None,
            session_id: String = None,
            process_id: u32 = None,
        }
        computed {
            id: UnitId = UnitId::new(),
        }
    }
}

#[cfg(test)]
#[path = "unit_tests.rs"]
mod tests;
