// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! drover supervisor daemon (droverd)
//!
//! One detached process per running job. Spawned by the orchestrator, not
//! invoked by hand. Owns the job from entry to final status: recovery,
//! dispatch, post-processing, settle, checkpoint.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use drover_core::JobId;
use drover_engine::{run_supervisor_guarded, shared_store, EngineEnv, StopFlag, SupervisorError};
use drover_runner::ClaudeRunner;
use drover_store::Store;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

struct Args {
    job_id: JobId,
    db: Option<PathBuf>,
}

fn print_usage() {
    println!("droverd {}", env!("CARGO_PKG_VERSION"));
    println!("drover batch supervisor - one detached process per running job");
    println!();
    println!("USAGE:");
    println!("    droverd --job <job-id> [--db <store-dir>]");
    println!();
    println!("The supervisor is spawned by the drover orchestrator and should");
    println!("not normally be invoked directly.");
    println!();
    println!("OPTIONS:");
    println!("    --job <job-id>    Job to supervise (required)");
    println!("    --db <dir>        Store directory (defaults to STORAGE_PATH)");
    println!("    -h, --help        Print help information");
    println!("    -V, --version     Print version information");
}

fn parse_args() -> Result<Args, String> {
    let mut job_id: Option<JobId> = None;
    let mut db: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("droverd {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" | "help" => {
                print_usage();
                std::process::exit(0);
            }
            "--job" => {
                let value = args.next().ok_or("--job requires a value")?;
                job_id = Some(JobId::from_string(value));
            }
            "--db" => {
                let value = args.next().ok_or("--db requires a value")?;
                db = Some(PathBuf::from(value));
            }
            other => return Err(format!("unexpected argument '{}'", other)),
        }
    }

    Ok(Args { job_id: job_id.ok_or("--job is required")?, db })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {}", message);
            eprintln!("Usage: droverd --job <job-id> [--db <store-dir>]");
            return ExitCode::from(1);
        }
    };

    let env = match EngineEnv::load() {
        Ok(env) => match args.db {
            Some(db) => env.with_storage_path(db),
            None => env,
        },
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };

    let log_path = env
        .storage_path
        .join("logs")
        .join(format!("{}.log", args.job_id));
    rotate_log_if_needed(&log_path);
    write_startup_marker(&log_path);
    let _log_guard = match setup_logging(&log_path) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to set up logging: {}", e);
            return ExitCode::from(1);
        }
    };

    info!(
        job = %args.job_id,
        pid = std::process::id(),
        store = %env.storage_path.display(),
        "supervisor starting"
    );

    let store = match Store::open(&env.storage_path) {
        Ok(store) => shared_store(store),
        Err(e) => {
            error!(error = %e, "failed to open store");
            return if e.is_corruption() { ExitCode::from(2) } else { ExitCode::from(1) };
        }
    };

    // Signal handling: first terminate/interrupt trips the stop flag for a
    // graceful drain; a second trip escalates inside the supervisor to a
    // group-kill of live children. No store writes happen here.
    let stop = StopFlag::new();
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return ExitCode::from(1);
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            return ExitCode::from(1);
        }
    };
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
                stop.trip();
            }
        });
    }

    let runner = Arc::new(ClaudeRunner::new(&env.agent_binary));
    match run_supervisor_guarded(store, runner, args.job_id, &env, stop).await {
        Ok(status) => {
            info!(%status, "supervisor finished");
            ExitCode::SUCCESS
        }
        Err(SupervisorError::Store(e)) if e.is_corruption() => {
            error!(error = %e, "store corrupt, giving up");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "supervisor failed");
            ExitCode::from(1)
        }
    }
}

/// Append a marker before tracing takes over the file, so the orchestrator
/// can find where this startup attempt begins when reporting spawn errors.
fn write_startup_marker(log_path: &Path) {
    use std::io::Write as _;

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(log_path)
    else {
        return;
    };
    let _ = writeln!(file, "--- droverd: starting (pid: {}) ---\n", std::process::id());
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Shift `<job>.log` → `.log.1` → `.log.2` → `.log.3`, dropping the
/// oldest. Best-effort: a failed rotation never blocks startup.
fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let base = log_path.display().to_string();
    for n in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{base}.{n}"), format!("{base}.{}", n + 1));
    }
    let _ = std::fs::rename(log_path, format!("{base}.1"));
}

fn setup_logging(
    log_path: &Path,
) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let parent = log_path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let file_name = log_path
        .file_name()
        .ok_or_else(|| std::io::Error::other("log path has no file name"))?;

    let file_appender = tracing_appender::rolling::never(parent, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}
