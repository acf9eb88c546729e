// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker record: one pool slot's bookkeeping row.

use crate::job::JobId;
use crate::unit::UnitId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a worker slot.
    pub struct WorkerId("wkr-");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Failed,
    Terminated,
}

crate::simple_display! {
    WorkerStatus {
        Idle => "idle",
        Busy => "busy",
        Failed => "failed",
        Terminated => "terminated",
    }
}

/// Bookkeeping row for one dispatched unit's worker slot.
///
/// `process_id` is the supervisor's own PID; store recovery uses it to
/// detect workers whose supervisor died.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_unit_id: Option<UnitId>,
    pub process_id: u32,
    pub status: WorkerStatus,
    pub started_at: u64,
    pub last_heartbeat: u64,
    #[serde(default)]
    pub units_completed: u64,
    #[serde(default)]
    pub units_failed: u64,
    #[serde(default)]
    pub total_execution_time: f64,
}

impl WorkerRecord {
    pub fn new(job_id: JobId, unit_id: UnitId, process_id: u32, epoch_ms: u64) -> Self {
        Self {
            id: WorkerId::new(),
            job_id,
            current_unit_id: Some(unit_id),
            process_id,
            status: WorkerStatus::Busy,
            started_at: epoch_ms,
            last_heartbeat: epoch_ms,
            units_completed: 0,
            units_failed: 0,
            total_execution_time: 0.0,
        }
    }

    /// Release the slot after its unit finished.
    pub fn release(&mut self, succeeded: bool, execution_time_seconds: f64, epoch_ms: u64) {
        self.status = WorkerStatus::Idle;
        self.current_unit_id = None;
        self.last_heartbeat = epoch_ms;
        self.total_execution_time += execution_time_seconds;
        if succeeded {
            self.units_completed += 1;
        } else {
            self.units_failed += 1;
        }
    }

    pub fn terminate(&mut self, epoch_ms: u64) {
        self.status = WorkerStatus::Terminated;
        self.current_unit_id = None;
        self.last_heartbeat = epoch_ms;
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, WorkerStatus::Idle | WorkerStatus::Busy)
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
