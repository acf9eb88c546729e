// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for drover tests (gated behind `test-support`).

use crate::agent_event::AgentEvent;
use crate::unit::Payload;

/// Build an ordered payload from string pairs.
pub fn payload_of(pairs: &[(&str, &str)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect()
}

/// A minimal plausible conversation: init, one assistant turn, terminal result.
pub fn sample_conversation(session_id: &str, is_error: bool, cost_usd: f64) -> Vec<AgentEvent> {
    vec![
        AgentEvent(serde_json::json!({
            "type": "system",
            "subtype": "init",
            "session_id": session_id,
            "tools": ["Bash", "Edit"],
            "model": "claude-sonnet",
        })),
        AgentEvent(serde_json::json!({
            "type": "assistant",
            "message": { "content": [{ "type": "text", "text": "Working on it." }] },
        })),
        AgentEvent(serde_json::json!({
            "type": "result",
            "subtype": if is_error { "error_during_execution" } else { "success" },
            "is_error": is_error,
            "result": if is_error { "failed" } else { "done" },
            "total_cost_usd": cost_usd,
            "num_turns": 2,
            "duration_ms": 50,
            "duration_api_ms": 40,
            "session_id": session_id,
        })),
    ]
}
