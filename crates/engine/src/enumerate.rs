// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data-source adapters: turn an enumerator config into ordered payloads.
//!
//! Adapters are external collaborators by contract; the trait is the seam.
//! The bundled implementations cover the common sources and the
//! user-supplied-command case, which is privileged (not sandboxed) and
//! therefore sits behind a mandatory approval gate: the command only runs
//! when the config carries `approved: true` together with the SHA-256 of
//! the exact approved text.

use async_trait::async_trait;
use drover_core::Payload;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("unknown enumerator type: {0}")]
    UnknownType(String),
    #[error("invalid enumerator config: {0}")]
    InvalidConfig(String),
    #[error("enumeration failed: {0}")]
    Failed(String),
    /// User-supplied code that has not been approved (or whose hash does
    /// not match the approved text). Nothing may be persisted or executed.
    #[error("enumeration code pending approval")]
    PendingApproval { code: String, sha256: String },
}

#[async_trait]
pub trait Enumerator: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Tag stamped on the units this adapter produces.
    fn unit_type(&self) -> &'static str {
        "record"
    }

    /// Produce the ordered payload list for one batch.
    async fn enumerate(&self, config: &Value) -> Result<Vec<Payload>, EnumerateError>;
}

/// Adapter lookup by `enumerator_type`.
pub struct EnumeratorRegistry {
    adapters: HashMap<&'static str, Arc<dyn Enumerator>>,
}

impl EnumeratorRegistry {
    /// Registry with the bundled adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self { adapters: HashMap::new() };
        registry.register(Arc::new(FileGlobEnumerator));
        registry.register(Arc::new(JsonArrayEnumerator));
        registry.register(Arc::new(DelimitedTextEnumerator));
        registry.register(Arc::new(CommandEnumerator));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn Enumerator>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn Enumerator>, EnumerateError> {
        self.adapters
            .get(kind)
            .cloned()
            .ok_or_else(|| EnumerateError::UnknownType(kind.to_string()))
    }
}

fn required_str<'a>(config: &'a Value, key: &str) -> Result<&'a str, EnumerateError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EnumerateError::InvalidConfig(format!("missing string field {:?}", key)))
}

fn object_to_payload(value: &Value) -> Payload {
    match value.as_object() {
        Some(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        None => [("value".to_string(), value.clone())].into_iter().collect(),
    }
}

/// `{"pattern": "src/**/*.rs"}` → one payload per matching file.
pub struct FileGlobEnumerator;

#[async_trait]
impl Enumerator for FileGlobEnumerator {
    fn kind(&self) -> &'static str {
        "file_glob"
    }

    fn unit_type(&self) -> &'static str {
        "file"
    }

    async fn enumerate(&self, config: &Value) -> Result<Vec<Payload>, EnumerateError> {
        let pattern = required_str(config, "pattern")?;
        let paths = glob::glob(pattern)
            .map_err(|e| EnumerateError::InvalidConfig(format!("bad glob pattern: {}", e)))?;

        let mut payloads = Vec::new();
        for entry in paths {
            let path: PathBuf = entry.map_err(|e| EnumerateError::Failed(e.to_string()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            payloads.push(
                [
                    ("file_path".to_string(), Value::String(path.display().to_string())),
                    ("file_name".to_string(), Value::String(file_name)),
                ]
                .into_iter()
                .collect(),
            );
        }
        Ok(payloads)
    }
}

/// `{"items": [...]}` inline, or `{"path": "items.json"}` for a document on
/// disk whose top level is an array.
pub struct JsonArrayEnumerator;

#[async_trait]
impl Enumerator for JsonArrayEnumerator {
    fn kind(&self) -> &'static str {
        "json_array"
    }

    async fn enumerate(&self, config: &Value) -> Result<Vec<Payload>, EnumerateError> {
        let items: Vec<Value> = if let Some(items) = config.get("items") {
            items
                .as_array()
                .cloned()
                .ok_or_else(|| EnumerateError::InvalidConfig("items must be an array".into()))?
        } else {
            let path = required_str(config, "path")?;
            let raw = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| EnumerateError::Failed(format!("{}: {}", path, e)))?;
            serde_json::from_str::<Vec<Value>>(&raw)
                .map_err(|e| EnumerateError::Failed(format!("{}: {}", path, e)))?
        };
        Ok(items.iter().map(object_to_payload).collect())
    }
}

/// `{"path": "rows.tsv", "delimiter": "\t"}`; the first line is the header.
pub struct DelimitedTextEnumerator;

#[async_trait]
impl Enumerator for DelimitedTextEnumerator {
    fn kind(&self) -> &'static str {
        "delimited"
    }

    async fn enumerate(&self, config: &Value) -> Result<Vec<Payload>, EnumerateError> {
        let path = required_str(config, "path")?;
        let delimiter = config
            .get("delimiter")
            .and_then(Value::as_str)
            .unwrap_or("\t")
            .to_string();
        if delimiter.is_empty() {
            return Err(EnumerateError::InvalidConfig("delimiter must be non-empty".into()));
        }

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EnumerateError::Failed(format!("{}: {}", path, e)))?;
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        let Some(header) = lines.next() else {
            return Ok(Vec::new());
        };
        let columns: Vec<&str> = header.split(delimiter.as_str()).map(str::trim).collect();

        let mut payloads = Vec::new();
        for line in lines {
            let mut payload = Payload::new();
            for (column, value) in columns.iter().zip(line.split(delimiter.as_str())) {
                payload.insert(column.to_string(), Value::String(value.trim().to_string()));
            }
            payloads.push(payload);
        }
        Ok(payloads)
    }
}

/// User-supplied enumeration command, behind the approval gate.
///
/// Config: `{"command": "...", "approved": true, "command_sha256": "..."}`.
/// The command must print a JSON array of payload objects on stdout.
pub struct CommandEnumerator;

impl CommandEnumerator {
    pub fn sha256_of(command: &str) -> String {
        format!("{:x}", Sha256::digest(command.as_bytes()))
    }
}

#[async_trait]
impl Enumerator for CommandEnumerator {
    fn kind(&self) -> &'static str {
        "command"
    }

    async fn enumerate(&self, config: &Value) -> Result<Vec<Payload>, EnumerateError> {
        let command = required_str(config, "command")?;
        let approved = config.get("approved").and_then(Value::as_bool).unwrap_or(false);
        let pinned_hash = config.get("command_sha256").and_then(Value::as_str).unwrap_or("");
        let actual_hash = Self::sha256_of(command);

        // Never execute without approval of this exact text. A stored
        // approval for different code is a mismatch, not a grant.
        if !approved || pinned_hash != actual_hash {
            return Err(EnumerateError::PendingApproval {
                code: command.to_string(),
                sha256: actual_hash,
            });
        }

        let mut shell = tokio::process::Command::new("bash");
        shell
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = tokio::time::timeout(COMMAND_TIMEOUT, shell.output())
            .await
            .map_err(|_| EnumerateError::Failed("enumeration command timed out".into()))?
            .map_err(|e| EnumerateError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EnumerateError::Failed(format!(
                "command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let items: Vec<Value> = serde_json::from_slice(&output.stdout)
            .map_err(|e| EnumerateError::Failed(format!("command output is not a JSON array: {}", e)))?;
        Ok(items.iter().map(object_to_payload).collect())
    }
}

#[cfg(test)]
#[path = "enumerate_tests.rs"]
mod tests;
