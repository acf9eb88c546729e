// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Production runner: spawn the agent CLI and parse its event stream.

use crate::{FailureReason, RunOutcome, RunRequest, RunnerError, RunnerSignal, UnitRunner};
use async_trait::async_trait;
use drover_core::AgentEvent;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Spawns one agent subprocess per run.
///
/// The child is always detached from any controlling terminal: NULL stdin
/// and its own process group. The supervisor that owns us is itself
/// detached, so an inherited stdin would leave the agent blocked on a
/// terminal probe forever.
pub struct ClaudeRunner {
    binary: PathBuf,
}

impl ClaudeRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn build_command(&self, request: &RunRequest) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");
        if let Some(model) = &request.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(max_turns) = request.max_turns {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }
        for dir in &request.add_dirs {
            cmd.arg("--add-dir").arg(dir);
        }
        if !request.add_dirs.is_empty() {
            // The detached child must never stop to ask for confirmation.
            cmd.arg("--dangerously-skip-permissions");
        }
        if let Some(cwd) = &request.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl UnitRunner for ClaudeRunner {
    async fn run(&self, request: RunRequest, signals: mpsc::Sender<RunnerSignal>) -> RunOutcome {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + request.timeout;

        let mut child = match self.build_command(&request).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return finish(FailureReason::Unavailable, Vec::new(), None, started);
            }
            Err(e) => {
                return finish(FailureReason::Spawn(e.to_string()), Vec::new(), None, started);
            }
        };
        let pid = child.id();
        if let Some(pid) = pid {
            let _ = signals.send(RunnerSignal::Started { pid }).await;
        }

        let Some(stdout) = child.stdout.take() else {
            kill_group(pid);
            return finish(
                FailureReason::Spawn("stdout pipe unavailable".to_string()),
                Vec::new(),
                None,
                started,
            );
        };
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let mut reader = BufReader::new(stderr);
                let _ = reader.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut conversation: Vec<AgentEvent> = Vec::new();
        let mut session_id: Option<String> = None;
        let mut terminal: Option<AgentEvent> = None;

        loop {
            match tokio::time::timeout_at(deadline, lines.next_line()).await {
                Err(_) => {
                    tracing::warn!(unit = %request.unit_id, "unit timed out, killing agent process group");
                    kill_group(pid);
                    let _ = child.start_kill();
                    return finish(FailureReason::Timeout, conversation, session_id, started);
                }
                Ok(Ok(None)) => break,
                Ok(Ok(Some(line))) => {
                    let Some(event) = AgentEvent::parse_line(&line) else {
                        continue;
                    };
                    if session_id.is_none() {
                        if let Some(sid) = event.session_id() {
                            session_id = Some(sid.to_string());
                        }
                    }
                    if event.is_result() {
                        terminal = Some(event.clone());
                    }
                    conversation.push(event.clone());
                    let _ = signals.send(RunnerSignal::Event(event)).await;
                }
                Ok(Err(e)) => {
                    kill_group(pid);
                    let _ = child.start_kill();
                    return finish(
                        FailureReason::Spawn(format!("stdout read error: {}", e)),
                        conversation,
                        session_id,
                        started,
                    );
                }
            }
        }

        // EOF on stdout; reap the child within the remaining budget.
        let exit = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                kill_group(pid);
                let _ = child.start_kill();
                return finish(FailureReason::Timeout, conversation, session_id, started);
            }
        };

        let stderr_text = match stderr_task {
            Some(task) => tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .ok()
                .and_then(|joined| joined.ok())
                .unwrap_or_default(),
            None => String::new(),
        };

        // The terminal result event is authoritative; the exit code is
        // advisory diagnostics only.
        match terminal {
            Some(event) => {
                let elapsed = event
                    .duration_ms()
                    .map(|ms| ms as f64 / 1000.0)
                    .unwrap_or_else(|| started.elapsed().as_secs_f64());
                let outcome = RunOutcome {
                    success: !event.is_error(),
                    output: event.result_text().unwrap_or_default().to_string(),
                    failure: event.is_error().then(|| {
                        FailureReason::Agent(
                            event
                                .result_text()
                                .unwrap_or("agent reported an error result")
                                .to_string(),
                        )
                    }),
                    cost_usd: event.total_cost_usd().unwrap_or(0.0),
                    execution_time_seconds: elapsed,
                    session_id: event.session_id().map(str::to_string).or(session_id),
                    num_turns: event.num_turns().unwrap_or(0),
                    conversation,
                };
                if !outcome.success {
                    tracing::warn!(unit = %request.unit_id, stderr = %truncated(&stderr_text), "agent reported error result");
                }
                outcome
            }
            None => {
                tracing::warn!(
                    unit = %request.unit_id,
                    exit = ?exit,
                    stderr = %truncated(&stderr_text),
                    "agent exited without a terminal result event"
                );
                finish(FailureReason::NoResult, conversation, session_id, started)
            }
        }
    }

    async fn check_available(&self) -> Result<String, RunnerError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let output = match tokio::time::timeout(Duration::from_secs(10), command.output()).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                return Err(RunnerError::Unavailable(format!(
                    "{} --version exited with {}",
                    self.binary.display(),
                    output.status
                )))
            }
            Ok(Err(e)) => {
                return Err(RunnerError::Unavailable(format!(
                    "{}: {}",
                    self.binary.display(),
                    e
                )))
            }
            Err(_) => {
                return Err(RunnerError::Unavailable(format!(
                    "{} --version timed out",
                    self.binary.display()
                )))
            }
        };
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn finish(
    reason: FailureReason,
    conversation: Vec<AgentEvent>,
    session_id: Option<String>,
    started: Instant,
) -> RunOutcome {
    RunOutcome {
        success: false,
        output: String::new(),
        failure: Some(reason),
        cost_usd: 0.0,
        execution_time_seconds: started.elapsed().as_secs_f64(),
        session_id,
        num_turns: 0,
        conversation,
    }
}

/// SIGKILL the child's whole process group (`process_group(0)` makes the
/// child its own group leader, so its PID is the group ID).
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let Ok(raw) = i32::try_from(pid) else { return };
    let _ = killpg(Pid::from_raw(raw), Signal::SIGKILL);
}

fn truncated(s: &str) -> String {
    let trimmed = s.trim();
    // Char-boundary-safe cap; stderr is not guaranteed ASCII.
    match trimmed.char_indices().nth(400) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
