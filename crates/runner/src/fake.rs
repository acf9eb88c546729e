// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable in-process runner for tests.
//!
//! Rules match on a substring of the rendered prompt, so tests can target
//! individual units without knowing their generated ids. Unmatched runs
//! succeed with a small synthetic conversation.

use crate::{FailureReason, RunOutcome, RunRequest, RunnerError, RunnerSignal, UnitRunner};
use async_trait::async_trait;
use drover_core::test_support::sample_conversation;
use drover_core::AgentEvent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
enum Script {
    /// Fail the first `n` matching runs, then succeed.
    FailTimes(Arc<Mutex<u32>>),
    /// Fail every matching run.
    AlwaysFail,
}

#[derive(Clone)]
pub struct FakeRunner {
    rules: Arc<Mutex<Vec<(String, Script)>>>,
    delay: Duration,
    cost_per_unit: f64,
    runs: Arc<AtomicU64>,
    session_counter: Arc<AtomicU64>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::from_millis(10),
            cost_per_unit: 0.01,
            runs: Arc::new(AtomicU64::new(0)),
            session_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_per_unit = cost_usd;
        self
    }

    /// Fail the first `times` runs whose prompt contains `needle`.
    pub fn fail_times(&self, needle: impl Into<String>, times: u32) {
        self.rules
            .lock()
            .push((needle.into(), Script::FailTimes(Arc::new(Mutex::new(times)))));
    }

    /// Fail every run whose prompt contains `needle`.
    pub fn always_fail(&self, needle: impl Into<String>) {
        self.rules.lock().push((needle.into(), Script::AlwaysFail));
    }

    /// Total number of runs dispatched through this fake.
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    fn should_fail(&self, prompt: &str) -> bool {
        let rules = self.rules.lock();
        for (needle, script) in rules.iter() {
            if !prompt.contains(needle.as_str()) {
                continue;
            }
            match script {
                Script::AlwaysFail => return true,
                Script::FailTimes(remaining) => {
                    let mut remaining = remaining.lock();
                    if *remaining > 0 {
                        *remaining -= 1;
                        return true;
                    }
                    return false;
                }
            }
        }
        false
    }
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnitRunner for FakeRunner {
    async fn run(&self, request: RunRequest, signals: mpsc::Sender<RunnerSignal>) -> RunOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let fail = self.should_fail(&request.prompt);
        let session_id = format!(
            "fake-sess-{}",
            self.session_counter.fetch_add(1, Ordering::SeqCst)
        );

        let _ = signals
            .send(RunnerSignal::Started { pid: std::process::id() })
            .await;
        tokio::time::sleep(self.delay).await;

        let conversation: Vec<AgentEvent> =
            sample_conversation(&session_id, fail, self.cost_per_unit);
        for event in &conversation {
            let _ = signals.send(RunnerSignal::Event(event.clone())).await;
        }

        if fail {
            RunOutcome {
                success: false,
                output: String::new(),
                failure: Some(FailureReason::Agent("scripted failure".to_string())),
                cost_usd: self.cost_per_unit,
                execution_time_seconds: self.delay.as_secs_f64(),
                session_id: Some(session_id),
                num_turns: 2,
                conversation,
            }
        } else {
            RunOutcome {
                success: true,
                output: "done".to_string(),
                failure: None,
                cost_usd: self.cost_per_unit,
                execution_time_seconds: self.delay.as_secs_f64(),
                session_id: Some(session_id),
                num_turns: 2,
                conversation,
            }
        }
    }

    async fn check_available(&self) -> Result<String, RunnerError> {
        Ok("fake-agent 0.0.0".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::UnitId;

    fn request(prompt: &str) -> RunRequest {
        RunRequest::new(UnitId::new(), prompt, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn default_runs_succeed_with_a_conversation() {
        let fake = FakeRunner::new();
        let (tx, _rx) = mpsc::channel(16);
        let outcome = fake.run(request("anything"), tx).await;
        assert!(outcome.success);
        assert_eq!(outcome.conversation.len(), 3);
        assert!(outcome.session_id.is_some());
    }

    #[tokio::test]
    async fn fail_times_recovers_after_budget() {
        let fake = FakeRunner::new();
        fake.fail_times("/b.txt", 2);
        let (tx, _rx) = mpsc::channel(64);

        let first = fake.run(request("process /b.txt"), tx.clone()).await;
        let second = fake.run(request("process /b.txt"), tx.clone()).await;
        let third = fake.run(request("process /b.txt"), tx.clone()).await;
        let unrelated = fake.run(request("process /a.txt"), tx).await;

        assert!(!first.success);
        assert!(!second.success);
        assert!(third.success);
        assert!(unrelated.success);
        assert_eq!(fake.run_count(), 4);
    }

    #[tokio::test]
    async fn always_fail_never_recovers() {
        let fake = FakeRunner::new();
        fake.always_fail("doomed");
        let (tx, _rx) = mpsc::channel(64);
        for _ in 0..3 {
            let outcome = fake.run(request("a doomed unit"), tx.clone()).await;
            assert!(!outcome.success);
            assert_eq!(
                outcome.failure,
                Some(FailureReason::Agent("scripted failure".to_string()))
            );
        }
    }
}
