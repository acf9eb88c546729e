// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-store: durable job/unit/worker state.
//!
//! Event-sourced embedded store: mutations append [`StoreEvent`]s to a
//! write-ahead log; state is materialized by replay on top of periodic
//! zstd-compressed snapshots. One writer at a time across OS processes,
//! enforced by an advisory file lock with a bounded wait; readers replay
//! the WAL tail without locking.

mod event;
mod process;
mod snapshot;
mod state;
mod store;
mod wal;

pub use event::StoreEvent;
pub use process::pid_alive;
pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::MaterializedState;
pub use store::{LogFilter, RecomputedCounters, Store, StoreError, StoreStats};
pub use wal::{Wal, WalCursor, WalEntry, WalError};
