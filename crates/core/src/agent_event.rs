// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent subprocess event records.
//!
//! The agent child emits one JSON event per stdout line. Events are stored
//! verbatim, in emission order, on the unit's conversation; typed accessors
//! read the fields the engine cares about. Unknown event shapes are
//! preserved rather than dropped so a protocol addition never loses data.
//! Tool-use / tool-result correlation (by `tool_use_id`) happens at render
//! time in the UI, never at storage time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event from the agent subprocess stream, stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentEvent(pub Value);

impl AgentEvent {
    /// Parse one stdout line. Blank lines yield `None`; non-JSON lines are
    /// preserved as `raw` events so the conversation never loses output.
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(v) if v.is_object() => Some(Self(v)),
            _ => Some(Self(serde_json::json!({ "type": "raw", "text": trimmed }))),
        }
    }

    /// Event discriminator (`system`, `assistant`, `user`, `result`, ...).
    pub fn kind(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("unknown")
    }

    pub fn subtype(&self) -> Option<&str> {
        self.0.get("subtype").and_then(Value::as_str)
    }

    /// The `system/init` event announces the session.
    pub fn is_init(&self) -> bool {
        self.kind() == "system" && self.subtype() == Some("init")
    }

    pub fn is_result(&self) -> bool {
        self.kind() == "result"
    }

    pub fn session_id(&self) -> Option<&str> {
        self.0.get("session_id").and_then(Value::as_str)
    }

    pub fn model(&self) -> Option<&str> {
        self.0.get("model").and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.0.get("is_error").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Final result text of a terminal event.
    pub fn result_text(&self) -> Option<&str> {
        self.0.get("result").and_then(Value::as_str)
    }

    pub fn total_cost_usd(&self) -> Option<f64> {
        self.0.get("total_cost_usd").and_then(Value::as_f64)
    }

    pub fn num_turns(&self) -> Option<u64> {
        self.0.get("num_turns").and_then(Value::as_u64)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.0.get("duration_ms").and_then(Value::as_u64)
    }

    /// Content blocks of an assistant/user message event.
    fn content_blocks(&self) -> Option<&Vec<Value>> {
        self.0
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
    }

    /// One-line description for live views: first text block, tool name,
    /// or the result text, whichever the event carries.
    pub fn summary(&self) -> String {
        if let Some(blocks) = self.content_blocks() {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            return first_line(text);
                        }
                    }
                    Some("tool_use") => {
                        let name =
                            block.get("name").and_then(Value::as_str).unwrap_or("tool");
                        return format!("using {}", name);
                    }
                    Some("tool_result") => return "tool result".to_string(),
                    _ => {}
                }
            }
        }
        if self.is_result() {
            return self
                .result_text()
                .map(first_line)
                .unwrap_or_else(|| format!("result ({})", self.subtype().unwrap_or("done")));
        }
        if self.is_init() {
            return format!("session started ({})", self.model().unwrap_or("unknown model"));
        }
        self.kind().to_string()
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    // Truncate on a char boundary; byte slicing would split multibyte text.
    match line.char_indices().nth(120) {
        Some((idx, _)) => line[..idx].to_string(),
        None => line.to_string(),
    }
}

#[cfg(test)]
#[path = "agent_event_tests.rs"]
mod tests;
