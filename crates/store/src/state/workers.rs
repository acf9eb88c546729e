// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker event handlers.

use super::MaterializedState;
use crate::event::StoreEvent;

pub(crate) fn apply(state: &mut MaterializedState, event: &StoreEvent) {
    if let StoreEvent::WorkerUpserted { worker } = event {
        state.workers.insert(worker.id.to_string(), worker.clone());
    }
}
