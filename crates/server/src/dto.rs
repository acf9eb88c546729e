// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response shapes for the HTTP API.
//!
//! Summaries are trimmed for lists; detail endpoints return the full
//! records (the unit detail includes the whole conversation).

use drover_core::{AgentEvent, Job, WorkUnit, WorkerRecord};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub unit_type: String,
    pub total_units: u64,
    pub completed_units: u64,
    pub failed_units: u64,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    pub test_passed: bool,
    pub bypass_failures: bool,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            name: job.name.clone(),
            status: job.status.to_string(),
            unit_type: job.unit_type.clone(),
            total_units: job.total_units,
            // Capped for display: legacy rows counted the synthesis unit.
            completed_units: job.display_completed_units(),
            failed_units: job.failed_units,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            test_passed: job.test_passed,
            bypass_failures: job.bypass_failures,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub workers: Vec<WorkerRecord>,
    pub recent_units: Vec<UnitSummary>,
    pub unit_stats: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub id: String,
    pub unit_type: String,
    pub sequence: u64,
    pub status: String,
    pub label: String,
    pub retry_count: u32,
    pub cost_usd: f64,
    pub execution_time_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

impl UnitSummary {
    pub fn from_unit(unit: &WorkUnit, label_field: Option<&str>) -> Self {
        Self {
            id: unit.id.to_string(),
            unit_type: unit.unit_type.clone(),
            sequence: unit.sequence,
            status: unit.status.to_string(),
            label: unit.label(label_field),
            retry_count: unit.retry_count,
            cost_usd: unit.cost_usd,
            execution_time_seconds: unit.execution_time_seconds,
            error: unit.error.clone(),
            session_id: unit.session_id.clone(),
            started_at: unit.started_at,
            completed_at: unit.completed_at,
        }
    }
}

/// Snapshot of one active unit for the live view.
#[derive(Debug, Serialize)]
pub struct LiveUnit {
    #[serde(flatten)]
    pub unit: UnitSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_event: Option<AgentEvent>,
    pub latest_activity: String,
}

impl LiveUnit {
    pub fn from_unit(unit: &WorkUnit, label_field: Option<&str>) -> Self {
        Self {
            unit: UnitSummary::from_unit(unit, label_field),
            latest_event: unit.latest_event().cloned(),
            latest_activity: unit
                .latest_event()
                .map(|e| e.summary())
                .unwrap_or_else(|| "waiting for agent".to_string()),
        }
    }
}
