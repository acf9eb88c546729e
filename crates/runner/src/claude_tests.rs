// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_core::UnitId;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

const INIT_LINE: &str = r#"{"type":"system","subtype":"init","session_id":"sess-test","tools":[],"model":"claude-sonnet"}"#;
const OK_RESULT: &str = r#"{"type":"result","subtype":"success","is_error":false,"result":"done","total_cost_usd":0.02,"num_turns":3,"duration_ms":1500,"duration_api_ms":1200,"session_id":"sess-test"}"#;
const ERR_RESULT: &str = r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"it broke","total_cost_usd":0.01,"num_turns":1,"duration_ms":100,"duration_api_ms":80}"#;

/// Write a fake agent executable that ignores its arguments and runs `body`.
fn fake_agent(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("fake-agent");
    std::fs::write(&path, format!("#!/bin/bash\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn request(timeout_ms: u64) -> RunRequest {
    RunRequest::new(UnitId::new(), "do the thing", Duration::from_millis(timeout_ms))
}

async fn run_collecting(
    runner: &ClaudeRunner,
    req: RunRequest,
) -> (RunOutcome, Vec<RunnerSignal>) {
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = runner.run(req, tx).await;
    let mut signals = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        signals.push(signal);
    }
    (outcome, signals)
}

#[tokio::test]
async fn happy_path_parses_stream_and_reports_signals() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(
        dir.path(),
        &format!(
            "echo '{}'\necho '{{\"type\":\"assistant\",\"message\":{{\"content\":[{{\"type\":\"text\",\"text\":\"working\"}}]}}}}'\necho '{}'",
            INIT_LINE, OK_RESULT
        ),
    );
    let runner = ClaudeRunner::new(agent);

    let (outcome, signals) = run_collecting(&runner, request(5_000)).await;

    assert!(outcome.success, "failure: {:?}", outcome.failure);
    assert_eq!(outcome.output, "done");
    assert_eq!(outcome.session_id.as_deref(), Some("sess-test"));
    assert_eq!(outcome.num_turns, 3);
    assert!((outcome.cost_usd - 0.02).abs() < f64::EPSILON);
    assert!((outcome.execution_time_seconds - 1.5).abs() < f64::EPSILON);
    assert_eq!(outcome.conversation.len(), 3);
    assert!(outcome.conversation[0].is_init());
    assert!(outcome.conversation[2].is_result());

    assert!(matches!(signals.first(), Some(RunnerSignal::Started { .. })));
    let event_count = signals
        .iter()
        .filter(|s| matches!(s, RunnerSignal::Event(_)))
        .count();
    assert_eq!(event_count, 3);
}

#[tokio::test]
async fn null_stdin_means_a_reading_child_sees_eof_not_a_terminal() {
    let dir = TempDir::new().unwrap();
    // `read` would block forever on an inherited terminal; with NULL stdin
    // it returns immediately on EOF and the run completes.
    let agent = fake_agent(
        dir.path(),
        &format!("read -r _ignored\necho '{}'\necho '{}'", INIT_LINE, OK_RESULT),
    );
    let runner = ClaudeRunner::new(agent);

    let started = std::time::Instant::now();
    let (outcome, _) = run_collecting(&runner, request(10_000)).await;

    assert!(outcome.success);
    assert!(started.elapsed() < Duration::from_secs(5), "child blocked on stdin");
}

#[tokio::test]
async fn exit_without_result_event_is_no_result() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(dir.path(), &format!("echo '{}'\nexit 0", INIT_LINE));
    let runner = ClaudeRunner::new(agent);

    let (outcome, _) = run_collecting(&runner, request(5_000)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureReason::NoResult));
    assert_eq!(outcome.failure_text(), "no_result");
    // The partial conversation is still preserved.
    assert_eq!(outcome.conversation.len(), 1);
    assert_eq!(outcome.session_id.as_deref(), Some("sess-test"));
}

#[tokio::test]
async fn missing_binary_is_unavailable() {
    let runner = ClaudeRunner::new("/nonexistent/definitely-not-claude");
    let (outcome, _) = run_collecting(&runner, request(1_000)).await;
    assert_eq!(outcome.failure, Some(FailureReason::Unavailable));
    assert_eq!(outcome.failure_text(), "unavailable");
}

#[tokio::test]
async fn timeout_kills_the_child_group() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(dir.path(), &format!("echo '{}'\nsleep 60", INIT_LINE));
    let runner = ClaudeRunner::new(agent);

    let started = std::time::Instant::now();
    let (outcome, _) = run_collecting(&runner, request(300)).await;

    assert_eq!(outcome.failure, Some(FailureReason::Timeout));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.conversation.len(), 1);
}

#[tokio::test]
async fn error_result_fails_with_agent_reason() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(dir.path(), &format!("echo '{}'\necho '{}'", INIT_LINE, ERR_RESULT));
    let runner = ClaudeRunner::new(agent);

    let (outcome, _) = run_collecting(&runner, request(5_000)).await;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureReason::Agent("it broke".to_string())));
    assert!((outcome.cost_usd - 0.01).abs() < f64::EPSILON);
}

#[tokio::test]
async fn unparseable_lines_are_preserved_as_raw_events() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(
        dir.path(),
        &format!("echo 'warming up...'\necho '{}'\necho '{}'", INIT_LINE, OK_RESULT),
    );
    let runner = ClaudeRunner::new(agent);

    let (outcome, _) = run_collecting(&runner, request(5_000)).await;

    assert!(outcome.success);
    assert_eq!(outcome.conversation.len(), 3);
    assert_eq!(outcome.conversation[0].kind(), "raw");
}

#[tokio::test]
async fn check_available_reports_version() {
    let dir = TempDir::new().unwrap();
    let agent = fake_agent(dir.path(), "if [ \"$1\" = \"--version\" ]; then echo '9.9.9'; exit 0; fi");
    let runner = ClaudeRunner::new(agent);
    assert_eq!(runner.check_available().await.unwrap(), "9.9.9");

    let missing = ClaudeRunner::new("/nonexistent/definitely-not-claude");
    assert!(missing.check_available().await.is_err());
}

#[test]
fn command_carries_the_full_agent_contract() {
    let runner = ClaudeRunner::new("claude");
    let mut req = request(1_000);
    req.model = Some("claude-opus".into());
    req.max_turns = Some(12);
    req.add_dirs = vec!["/data".into()];
    req.working_dir = Some("/tmp".into());

    let cmd = runner.build_command(&req);
    let args: Vec<String> = cmd
        .as_std()
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    assert_eq!(args[0], "-p");
    assert_eq!(args[1], "do the thing");
    assert!(args.windows(2).any(|w| w == ["--output-format", "stream-json"]));
    assert!(args.contains(&"--verbose".to_string()));
    assert!(args.windows(2).any(|w| w == ["--model", "claude-opus"]));
    assert!(args.windows(2).any(|w| w == ["--max-turns", "12"]));
    assert!(args.windows(2).any(|w| w == ["--add-dir", "/data"]));
    // Add-dirs imply the bypass flag so the detached child never prompts.
    assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
    assert_eq!(
        cmd.as_std().get_current_dir(),
        Some(std::path::Path::new("/tmp"))
    );
}

#[test]
fn bypass_flag_absent_without_add_dirs() {
    let runner = ClaudeRunner::new("claude");
    let cmd = runner.build_command(&request(1_000));
    let args: Vec<String> = cmd
        .as_std()
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    assert!(!args.contains(&"--dangerously-skip-permissions".to_string()));
}
