// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store mutation events.
//!
//! Record-level upserts carry the whole record, so replay order alone
//! determines the survivor (last writer wins). The one fine-grained event,
//! [`StoreEvent::UnitEventAppended`], exists because live conversations
//! stream one agent event at a time; persisting the whole unit per agent
//! event would make the WAL quadratic in the conversation length.

use drover_core::{AgentEvent, Job, LogEntry, UnitId, WorkUnit, WorkerRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreEvent {
    JobCreated { job: Job },
    JobUpdated { job: Job },
    UnitCreated { unit: WorkUnit },
    UnitUpdated { unit: WorkUnit },
    UnitEventAppended { unit_id: UnitId, event: AgentEvent },
    WorkerUpserted { worker: WorkerRecord },
    LogAppended { entry: LogEntry },
}

impl StoreEvent {
    /// Short operation name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::JobCreated { .. } => "job_created",
            StoreEvent::JobUpdated { .. } => "job_updated",
            StoreEvent::UnitCreated { .. } => "unit_created",
            StoreEvent::UnitUpdated { .. } => "unit_updated",
            StoreEvent::UnitEventAppended { .. } => "unit_event_appended",
            StoreEvent::WorkerUpserted { .. } => "worker_upserted",
            StoreEvent::LogAppended { .. } => "log_appended",
        }
    }
}
