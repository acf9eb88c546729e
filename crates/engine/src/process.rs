// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal helpers for supervisors and agent children.

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

pub use drover_store::pid_alive;

/// Graceful terminate (SIGTERM) to a single process.
pub fn terminate(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok()
}

/// SIGKILL an entire process group. Agent children are spawned as their own
/// group leaders, so the group ID is the child PID.
pub fn kill_process_group(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    killpg(Pid::from_raw(raw), Signal::SIGKILL).is_ok()
}
