// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log: one JSON entry per line, fsync'd on append.
//!
//! The WAL is shared across OS processes. Writers append under the store's
//! exclusive file lock; readers tail the file lock-free, tracking their
//! position with a [`WalCursor`]. The first line is a header carrying a
//! generation id: compaction rewrites the file under a fresh generation,
//! which tells readers with a stale byte offset to rescan from the top
//! (their applied-sequence watermark dedups what they have already seen).
//! A torn final line (writer crashed mid-append) is invisible to readers
//! and repaired by the next locked append; a malformed line anywhere else
//! is corruption.

use crate::event::StoreEvent;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("WAL corrupt at byte {offset}: {detail}")]
    Corrupt { offset: u64, detail: String },
}

/// One durable store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub event: StoreEvent,
}

#[derive(Serialize)]
struct WalEntryRef<'a> {
    seq: u64,
    event: &'a StoreEvent,
}

/// First line of every WAL file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WalHeader {
    wal: u32,
    generation: u64,
}

const WAL_VERSION: u32 = 1;

/// A reader/writer position in the WAL: highest applied sequence number
/// and the byte offset just past its entry, valid within one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalCursor {
    pub seq: u64,
    pub offset: u64,
    pub generation: u64,
}

/// File-level WAL operations.
pub struct Wal {
    path: PathBuf,
}

impl Wal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read entries beyond the cursor and advance it. A missing file is an
    /// empty WAL. A generation change (compaction since the last read)
    /// restarts the scan from the top; entries at or below the cursor's
    /// sequence watermark are skipped.
    pub fn read_from(&self, cursor: &mut WalCursor) -> Result<Vec<WalEntry>, WalError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        let header_len = reader.read_line(&mut line)? as u64;
        if header_len == 0 {
            return Ok(Vec::new());
        }
        if !line.ends_with('\n') {
            // Torn header from a crashed first append; nothing durable yet.
            return Ok(Vec::new());
        }
        let header: WalHeader = serde_json::from_str(line.trim()).map_err(|e| {
            WalError::Corrupt { offset: 0, detail: format!("bad header: {}", e) }
        })?;

        let mut offset = if header.generation == cursor.generation && cursor.offset >= header_len
        {
            cursor.offset
        } else {
            header_len
        };
        reader.seek(SeekFrom::Start(offset))?;

        let mut entries = Vec::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Torn tail from a crashed writer; stop in front of it.
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                offset += read as u64;
                continue;
            }
            let entry: WalEntry = match serde_json::from_str(trimmed) {
                Ok(e) => e,
                Err(e) => {
                    if offset + read as u64 >= len {
                        // Complete-looking but unparseable final line: treat
                        // as torn tail, the locked writer will repair it.
                        break;
                    }
                    return Err(WalError::Corrupt { offset, detail: e.to_string() });
                }
            };
            offset += read as u64;
            if entry.seq > cursor.seq {
                cursor.seq = entry.seq;
                entries.push(entry);
            }
        }
        cursor.offset = offset;
        cursor.generation = header.generation;
        Ok(entries)
    }

    /// Append one event at `cursor.seq + 1`, creating the header on first
    /// use and repairing a torn tail.
    ///
    /// The caller must hold the store write lock and have refreshed the
    /// cursor to the end of the WAL.
    pub fn append(&self, cursor: &mut WalCursor, event: &StoreEvent) -> Result<u64, WalError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let len = file.metadata()?.len();

        if len == 0 || cursor.offset == 0 {
            // Fresh (or torn-at-birth) file: stamp a new generation header.
            let generation = next_generation();
            file.set_len(0)?;
            let mut header = serde_json::to_string(&WalHeader { wal: WAL_VERSION, generation })?;
            header.push('\n');
            file.write_all(header.as_bytes())?;
            cursor.offset = header.len() as u64;
            cursor.generation = generation;
        } else {
            if len < cursor.offset {
                return Err(WalError::Corrupt {
                    offset: cursor.offset,
                    detail: format!("file shrank to {} bytes behind an active writer", len),
                });
            }
            if len > cursor.offset {
                // Torn tail left by a crashed writer.
                file.set_len(cursor.offset)?;
            }
        }
        file.seek(SeekFrom::Start(cursor.offset))?;

        let seq = cursor.seq + 1;
        let mut line = serde_json::to_string(&WalEntryRef { seq, event })?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.sync_data()?;

        cursor.seq = seq;
        cursor.offset += line.len() as u64;
        Ok(seq)
    }

    /// Drop all entries with `seq ≤ upto_seq` (they are covered by a
    /// durable snapshot). Atomic rewrite under a fresh generation;
    /// absolute sequence numbers are preserved. The caller must hold the
    /// store write lock.
    pub fn truncate_through(&self, cursor: &mut WalCursor, upto_seq: u64) -> Result<(), WalError> {
        let mut scan = WalCursor::default();
        let entries = self.read_from(&mut scan)?;

        let generation = next_generation();
        let tmp = self.path.with_extension("wal.tmp");
        let mut new_len;
        {
            let mut file = File::create(&tmp)?;
            let mut header = serde_json::to_string(&WalHeader { wal: WAL_VERSION, generation })?;
            header.push('\n');
            file.write_all(header.as_bytes())?;
            new_len = header.len() as u64;
            for entry in entries.iter().filter(|e| e.seq > upto_seq) {
                let mut line = serde_json::to_string(entry)?;
                line.push('\n');
                file.write_all(line.as_bytes())?;
                new_len += line.len() as u64;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        sync_parent_dir(&self.path);

        cursor.seq = cursor.seq.max(upto_seq);
        cursor.offset = new_len;
        cursor.generation = generation;
        Ok(())
    }
}

/// Generation ids need only be distinct across rewrites of one file;
/// wall-clock nanos mixed with the PID are plenty.
fn next_generation() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1);
    nanos ^ (u64::from(std::process::id()) << 32)
}

/// Make a rename durable across power loss. Best-effort: some filesystems
/// reject directory fsync.
pub(crate) fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
