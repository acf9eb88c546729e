// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detached supervisor spawn.
//!
//! No daemonization tricks: the child gets a new process group, NULL
//! stdin, and its stdio redirected to the job's log file. The parent
//! records the PID in job metadata and returns; the child's lifetime is
//! independent from then on.

use crate::env::EngineEnv;
use drover_core::JobId;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawn `droverd --job <id> --db <dir>` detached; returns the child PID.
pub fn spawn_supervisor(job_id: &JobId, env: &EngineEnv) -> Result<u32, SpawnError> {
    let binary = find_supervisor_binary();

    let log_dir = env.storage_path.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{}.log", job_id)))?;
    let log_err = log.try_clone()?;

    let mut command = std::process::Command::new(&binary);
    command
        .arg("--job")
        .arg(job_id.as_str())
        .arg("--db")
        .arg(&env.storage_path)
        .env("STORAGE_PATH", &env.storage_path)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0);

    let mut child = command.spawn()?;
    let pid = child.id();
    tracing::info!(job = %job_id, pid, binary = %binary.display(), "spawned detached supervisor");

    // Reap the child when it eventually exits so a long-lived parent
    // never accumulates zombies. The thread parks in wait().
    std::thread::spawn(move || {
        let _ = child.wait();
    });

    Ok(pid)
}

/// `DROVERD_BINARY` override, then a sibling of the current executable,
/// then PATH lookup.
fn find_supervisor_binary() -> PathBuf {
    if let Some(path) = std::env::var_os("DROVERD_BINARY") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let sibling = dir.join("droverd");
            if sibling.exists() {
                return sibling;
            }
        }
    }

    PathBuf::from("droverd")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn binary_override_wins() {
        std::env::set_var("DROVERD_BINARY", "/opt/custom/droverd");
        assert_eq!(find_supervisor_binary(), PathBuf::from("/opt/custom/droverd"));
        std::env::remove_var("DROVERD_BINARY");
    }

    #[test]
    #[serial]
    fn falls_back_to_path_lookup() {
        std::env::remove_var("DROVERD_BINARY");
        let found = find_supervisor_binary();
        // Either a sibling build artifact or the bare PATH name.
        assert!(found.ends_with("droverd"));
    }
}
