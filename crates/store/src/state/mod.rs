// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

mod helpers;
mod jobs;
mod units;
mod workers;

use crate::event::StoreEvent;
use drover_core::{Job, LogEntry, WorkUnit, WorkerRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Materialized state built from WAL replay.
///
/// Each WAL entry is applied exactly once per process: the store's refresh
/// is sequence-gated, so handlers may use plain assignment and appends
/// without idempotency guards.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub jobs: HashMap<String, Job>,
    #[serde(default)]
    pub units: HashMap<String, WorkUnit>,
    #[serde(default)]
    pub workers: HashMap<String, WorkerRecord>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl MaterializedState {
    /// Get a job by ID or unique prefix (like git commit hashes)
    pub fn get_job(&self, id: &str) -> Option<&Job> {
        helpers::find_by_prefix(&self.jobs, id)
    }

    /// Get a work unit by ID or unique prefix
    pub fn get_unit(&self, id: &str) -> Option<&WorkUnit> {
        helpers::find_by_prefix(&self.units, id)
    }

    /// Apply an event to derive state changes.
    pub fn apply_event(&mut self, event: &StoreEvent) {
        match event {
            StoreEvent::JobCreated { .. } | StoreEvent::JobUpdated { .. } => {
                jobs::apply(self, event)
            }

            StoreEvent::UnitCreated { .. }
            | StoreEvent::UnitUpdated { .. }
            | StoreEvent::UnitEventAppended { .. } => units::apply(self, event),

            StoreEvent::WorkerUpserted { .. } => workers::apply(self, event),

            StoreEvent::LogAppended { entry } => self.logs.push(entry.clone()),
        }
    }
}

#[cfg(test)]
#[path = "../state_tests/mod.rs"]
mod tests;
