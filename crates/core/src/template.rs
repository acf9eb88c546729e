// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt template rendering.
//!
//! Rendering is a total function: a `{key}` with no matching payload field
//! becomes an inline marker instead of an error, so the rendered prompt is
//! always reproducible and the agent can still run (and ask for the
//! missing data itself).

use crate::unit::Payload;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Regex pattern for {field_name} or {field.sub-name} placeholders.
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z0-9_-]+)*)\}")
        .expect("constant regex pattern is valid")
});

/// Render a payload value the way a prompt should read it: bare text for
/// strings, compact JSON for everything else.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute every `{key}` present in the payload; missing keys render an
/// inline marker. Text outside placeholders passes through untouched.
pub fn render_prompt(template: &str, payload: &Payload) -> String {
    PLACEHOLDER_PATTERN
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match payload.get(key) {
                Some(value) => value_to_string(value),
                None => format!("[missing payload field: {}]", key),
            }
        })
        .to_string()
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
