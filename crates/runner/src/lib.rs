// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-runner: one agent subprocess per work unit.
//!
//! The runner is stateless: it launches the agent child for one unit,
//! parses its line-delimited JSON event stream, enforces the timeout with a
//! process-group kill, and returns a structured outcome. Persistence is the
//! caller's job; streamed events go out through a channel as they arrive.

mod claude;
#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use claude::ClaudeRunner;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeRunner;

use async_trait::async_trait;
use drover_core::{AgentEvent, UnitId};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("agent binary not available: {0}")]
    Unavailable(String),
}

/// Everything needed to run one unit of agent work.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub unit_id: UnitId,
    /// Fully rendered prompt (placeholders already substituted).
    pub prompt: String,
    pub timeout: Duration,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub working_dir: Option<PathBuf>,
    /// Extra directories the agent may touch; presence implies the
    /// permissions-bypass flag so the detached child never prompts.
    pub add_dirs: Vec<PathBuf>,
}

impl RunRequest {
    pub fn new(unit_id: UnitId, prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            unit_id,
            prompt: prompt.into(),
            timeout,
            model: None,
            max_turns: None,
            working_dir: None,
            add_dirs: Vec::new(),
        }
    }
}

/// Progress reports streamed out of a run as they happen.
#[derive(Debug, Clone)]
pub enum RunnerSignal {
    /// The agent child spawned with this OS PID.
    Started { pid: u32 },
    /// One event from the child's stdout, in emission order.
    Event(AgentEvent),
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The unit timeout elapsed; the child's process group was killed.
    Timeout,
    /// The child exited without ever producing a terminal result event.
    NoResult,
    /// The agent binary could not be located.
    Unavailable,
    /// The child could not be spawned or its pipes set up.
    Spawn(String),
    /// The agent itself reported an error result.
    Agent(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::NoResult => f.write_str("no_result"),
            FailureReason::Unavailable => f.write_str("unavailable"),
            FailureReason::Spawn(detail) => write!(f, "spawn failed: {}", detail),
            FailureReason::Agent(detail) => write!(f, "agent error: {}", detail),
        }
    }
}

/// Structured result of one unit run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    /// Final result text from the terminal event (empty on failure).
    pub output: String,
    pub failure: Option<FailureReason>,
    pub cost_usd: f64,
    pub execution_time_seconds: f64,
    pub session_id: Option<String>,
    pub num_turns: u64,
    /// Every event in emission order, including on failure.
    pub conversation: Vec<AgentEvent>,
}

impl RunOutcome {
    pub fn failure_text(&self) -> String {
        self.failure
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown failure".to_string())
    }
}

/// The seam between the pool and the agent subprocess.
#[async_trait]
pub trait UnitRunner: Send + Sync + 'static {
    /// Run one unit to completion (or failure). Never panics; every
    /// failure mode is a `RunOutcome` with `success = false`.
    async fn run(&self, request: RunRequest, signals: mpsc::Sender<RunnerSignal>) -> RunOutcome;

    /// Probe the agent binary; used as job creation's early fatal.
    /// Returns a human-readable version string.
    async fn check_available(&self) -> Result<String, RunnerError>;
}
