// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work unit event handlers.

use super::MaterializedState;
use crate::event::StoreEvent;

pub(crate) fn apply(state: &mut MaterializedState, event: &StoreEvent) {
    match event {
        StoreEvent::UnitCreated { unit } => {
            state.units.entry(unit.id.to_string()).or_insert_with(|| unit.clone());
        }

        StoreEvent::UnitUpdated { unit } => {
            // A full-record update may race a streamed conversation event
            // from the same task; keep whichever conversation is longer so
            // the append-only sequence never shrinks.
            let mut unit = unit.clone();
            if let Some(existing) = state.units.get(unit.id.as_str()) {
                if existing.conversation.len() > unit.conversation.len() {
                    unit.conversation = existing.conversation.clone();
                }
            }
            state.units.insert(unit.id.to_string(), unit);
        }

        StoreEvent::UnitEventAppended { unit_id, event } => {
            if let Some(unit) = state.units.get_mut(unit_id.as_str()) {
                unit.conversation.push(event.clone());
            }
        }

        _ => {}
    }
}
