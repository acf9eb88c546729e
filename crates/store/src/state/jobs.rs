// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job event handlers.

use super::MaterializedState;
use crate::event::StoreEvent;

pub(crate) fn apply(state: &mut MaterializedState, event: &StoreEvent) {
    match event {
        StoreEvent::JobCreated { job } => {
            // Creation never overwrites: a duplicate create is validated
            // away at commit time, and on replay the first write wins.
            state.jobs.entry(job.id.to_string()).or_insert_with(|| job.clone());
        }

        StoreEvent::JobUpdated { job } => {
            // Whole-record upsert: replay order decides the survivor.
            state.jobs.insert(job.id.to_string(), job.clone());
        }

        _ => {}
    }
}
