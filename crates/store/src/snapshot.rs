// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for bounded recovery time.
//!
//! Snapshots store the complete materialized state at a point in time,
//! identified by the WAL sequence number. Recovery loads the snapshot and
//! replays WAL entries after that sequence. Written zstd-compressed via a
//! temp file + fsync + atomic rename, with rotating `.bak` backups.

use crate::state::MaterializedState;
use crate::wal::sync_parent_dir;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current snapshot schema version
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// zstd level: fast with a decent ratio for JSON state.
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// A snapshot of the materialized state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version for migrations
    #[serde(rename = "v")]
    pub version: u32,
    /// WAL sequence number at the time of snapshot
    pub seq: u64,
    /// The complete materialized state
    pub state: MaterializedState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(seq: u64, state: MaterializedState) -> Self {
        Self { version: CURRENT_SNAPSHOT_VERSION, seq, state, created_at: Utc::now() }
    }

    /// Load a snapshot, migrating older versions forward. `Ok(None)` when
    /// no snapshot exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let compressed = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw = zstd::stream::decode_all(compressed.as_slice())?;
        let value: serde_json::Value = serde_json::from_slice(&raw)?;

        let version = value.get("v").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        if version > CURRENT_SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionTooNew {
                found: version,
                supported: CURRENT_SNAPSHOT_VERSION,
            });
        }
        // Migrations are additive: older snapshots deserialize through
        // serde defaults, so nothing to rewrite between v1 and current.
        let snapshot: Snapshot = serde_json::from_value(value)?;
        Ok(Some(snapshot))
    }

    /// Durably persist: temp file, fsync, rotate backups, atomic rename,
    /// directory fsync. Only after this returns may the WAL be truncated.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let raw = serde_json::to_vec(self)?;
        let compressed = zstd::stream::encode_all(raw.as_slice(), COMPRESSION_LEVEL)?;

        let tmp = path.with_extension("zst.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }

        if path.exists() {
            let _ = fs::rename(path, rotate_bak_path(path));
        }
        fs::rename(&tmp, path)?;
        sync_parent_dir(path);
        Ok(())
    }
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    // Remove the oldest if at capacity
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    // Shift existing backups up by one
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
