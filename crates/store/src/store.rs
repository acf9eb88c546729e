// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The store façade: §-level operations over WAL + snapshot + state.
//!
//! One `Store` per process (or per thread of interest); every handle sees
//! the same on-disk truth. Mutations serialize across processes through an
//! advisory exclusive lock on a sidecar file, acquired per call with a
//! bounded wait. Readers replay the WAL tail beyond their cursor and never
//! block writers.

use crate::event::StoreEvent;
use crate::process::pid_alive;
use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::MaterializedState;
use crate::wal::{Wal, WalCursor, WalError};
use drover_core::{
    Job, JobId, JobStatus, LogEntry, LogLevel, UnitId, UnitStatus, WorkUnit, WorkerRecord,
};
use fs2::FileExt;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a mutation waits for the cross-process write lock.
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("write lock not acquired within {LOCK_WAIT:?}")]
    Busy,
}

impl StoreError {
    /// True for damage that re-opening cannot fix (exit code 2 territory).
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Wal(WalError::Corrupt { .. }))
    }
}

/// Filter for [`Store::query_logs`].
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub unit_id: Option<UnitId>,
    pub min_level: Option<LogLevel>,
    /// Most recent N entries; 0 means no cap.
    pub limit: usize,
}

/// Aggregate counts for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub jobs_total: u64,
    pub jobs_by_status: HashMap<String, u64>,
    pub units_total: u64,
    pub units_by_status: HashMap<String, u64>,
    pub total_cost_usd: f64,
    pub live_workers: u64,
}

/// Counters recomputed from unit rows, for consistency checks against the
/// persisted job counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecomputedCounters {
    pub total_units: u64,
    pub completed_units: u64,
    pub failed_units: u64,
}

pub struct Store {
    dir: PathBuf,
    wal: Wal,
    snapshot_path: PathBuf,
    lock_path: PathBuf,
    cursor: WalCursor,
    state: MaterializedState,
}

impl Store {
    /// Open (creating if absent) the store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let snapshot_path = dir.join("snapshot.zst");
        let (state, seq) = match Snapshot::load(&snapshot_path)? {
            Some(snapshot) => {
                tracing::debug!(
                    seq = snapshot.seq,
                    jobs = snapshot.state.jobs.len(),
                    units = snapshot.state.units.len(),
                    "loaded snapshot"
                );
                (snapshot.state, snapshot.seq)
            }
            None => (MaterializedState::default(), 0),
        };

        let mut store = Self {
            wal: Wal::new(dir.join("events.wal")),
            lock_path: dir.join("store.lock"),
            snapshot_path,
            dir,
            cursor: WalCursor { seq, offset: 0, generation: 0 },
            state,
        };
        store.refresh()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Apply WAL entries written since this handle last looked.
    pub fn refresh(&mut self) -> Result<(), StoreError> {
        for entry in self.wal.read_from(&mut self.cursor)? {
            self.state.apply_event(&entry.event);
        }
        Ok(())
    }

    fn acquire_write_lock(&self) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        let deadline = Instant::now() + LOCK_WAIT;
        loop {
            // Fully qualified: std grew an inherent `try_lock_exclusive`
            // with a different signature.
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(file),
                Err(_) if Instant::now() < deadline => std::thread::sleep(LOCK_RETRY),
                Err(_) => return Err(StoreError::Busy),
            }
        }
    }

    /// Append one event under the write lock. `Ok(false)` means the event
    /// would violate a store invariant and nothing was persisted.
    fn commit(&mut self, event: StoreEvent) -> Result<bool, StoreError> {
        let lock = self.acquire_write_lock()?;
        let result = self.commit_locked(&event);
        let _ = FileExt::unlock(&lock);
        result
    }

    fn commit_locked(&mut self, event: &StoreEvent) -> Result<bool, StoreError> {
        self.refresh()?;
        if !self.validate(event) {
            tracing::warn!(op = event.name(), "mutation rejected by invariant check");
            return Ok(false);
        }
        self.wal.append(&mut self.cursor, event)?;
        self.state.apply_event(event);
        Ok(true)
    }

    fn validate(&self, event: &StoreEvent) -> bool {
        match event {
            StoreEvent::JobCreated { job } => {
                !self.state.jobs.contains_key(job.id.as_str()) && job.invariants_hold()
            }
            StoreEvent::JobUpdated { job } => {
                self.state.jobs.contains_key(job.id.as_str()) && job.invariants_hold()
            }
            StoreEvent::UnitCreated { unit } => {
                !self.state.units.contains_key(unit.id.as_str())
                    && self.state.jobs.contains_key(unit.job_id.as_str())
                    && unit.invariants_hold()
            }
            StoreEvent::UnitUpdated { unit } => {
                self.state.units.contains_key(unit.id.as_str()) && unit.invariants_hold()
            }
            StoreEvent::UnitEventAppended { unit_id, .. } => {
                self.state.units.contains_key(unit_id.as_str())
            }
            StoreEvent::WorkerUpserted { .. } | StoreEvent::LogAppended { .. } => true,
        }
    }

    // --- jobs ---

    pub fn create_job(&mut self, job: Job) -> Result<bool, StoreError> {
        self.commit(StoreEvent::JobCreated { job })
    }

    pub fn update_job(&mut self, job: Job) -> Result<bool, StoreError> {
        self.commit(StoreEvent::JobUpdated { job })
    }

    /// Get a job by ID or unique prefix.
    pub fn get_job(&mut self, id: &str) -> Result<Option<Job>, StoreError> {
        self.refresh()?;
        Ok(self.state.get_job(id).cloned())
    }

    /// List jobs, newest first.
    pub fn list_jobs(
        &mut self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.refresh()?;
        let mut jobs: Vec<Job> = self
            .state
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        Ok(page(jobs, limit, offset))
    }

    // --- units ---

    pub fn create_work_unit(&mut self, unit: WorkUnit) -> Result<bool, StoreError> {
        self.commit(StoreEvent::UnitCreated { unit })
    }

    pub fn update_work_unit(&mut self, unit: WorkUnit) -> Result<bool, StoreError> {
        self.commit(StoreEvent::UnitUpdated { unit })
    }

    /// Append one streamed agent event to a unit's conversation.
    pub fn append_unit_event(
        &mut self,
        unit_id: UnitId,
        event: drover_core::AgentEvent,
    ) -> Result<bool, StoreError> {
        self.commit(StoreEvent::UnitEventAppended { unit_id, event })
    }

    /// Get a unit by ID or unique prefix.
    pub fn get_work_unit(&mut self, id: &str) -> Result<Option<WorkUnit>, StoreError> {
        self.refresh()?;
        Ok(self.state.get_unit(id).cloned())
    }

    /// Up to `limit` pending units of a job in dispatch order.
    pub fn get_pending_units(
        &mut self,
        job_id: JobId,
        limit: usize,
    ) -> Result<Vec<WorkUnit>, StoreError> {
        self.refresh()?;
        let mut units: Vec<WorkUnit> = self
            .state
            .units
            .values()
            .filter(|u| u.job_id == job_id && u.status == UnitStatus::Pending)
            .cloned()
            .collect();
        units.sort_by(dispatch_order);
        units.truncate(limit);
        Ok(units)
    }

    pub fn count_units_by_status(
        &mut self,
        job_id: JobId,
    ) -> Result<HashMap<UnitStatus, u64>, StoreError> {
        self.refresh()?;
        let mut counts = HashMap::new();
        for unit in self.state.units.values().filter(|u| u.job_id == job_id) {
            *counts.entry(unit.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub fn list_units_for_job(
        &mut self,
        job_id: JobId,
        limit: usize,
        offset: usize,
        exclude_post_processing: bool,
    ) -> Result<Vec<WorkUnit>, StoreError> {
        self.refresh()?;
        let mut units: Vec<WorkUnit> = self
            .state
            .units
            .values()
            .filter(|u| u.job_id == job_id)
            .filter(|u| !(exclude_post_processing && u.is_post_processing()))
            .cloned()
            .collect();
        units.sort_by(dispatch_order);
        Ok(page(units, limit, offset))
    }

    /// Derive counters from unit rows (post-processing excluded), for
    /// consistency checks against the persisted job counters.
    pub fn recompute_counters(&mut self, job_id: JobId) -> Result<RecomputedCounters, StoreError> {
        self.refresh()?;
        let mut counters = RecomputedCounters { total_units: 0, completed_units: 0, failed_units: 0 };
        for unit in self
            .state
            .units
            .values()
            .filter(|u| u.job_id == job_id && !u.is_post_processing())
        {
            counters.total_units += 1;
            match unit.status {
                UnitStatus::Completed => counters.completed_units += 1,
                UnitStatus::Failed => counters.failed_units += 1,
                _ => {}
            }
        }
        Ok(counters)
    }

    // --- workers ---

    pub fn upsert_worker(&mut self, worker: WorkerRecord) -> Result<bool, StoreError> {
        self.commit(StoreEvent::WorkerUpserted { worker })
    }

    pub fn workers_for_job(&mut self, job_id: JobId) -> Result<Vec<WorkerRecord>, StoreError> {
        self.refresh()?;
        let mut workers: Vec<WorkerRecord> = self
            .state
            .workers
            .values()
            .filter(|w| w.job_id == job_id)
            .cloned()
            .collect();
        workers.sort_by_key(|w| w.started_at);
        Ok(workers)
    }

    /// Terminate every worker of this job whose recorded supervisor PID is
    /// no longer alive. Returns how many were cleaned up.
    pub fn cleanup_stale_workers(&mut self, job_id: JobId) -> Result<usize, StoreError> {
        self.refresh()?;
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let stale: Vec<WorkerRecord> = self
            .state
            .workers
            .values()
            .filter(|w| w.job_id == job_id && w.is_live() && !pid_alive(w.process_id))
            .cloned()
            .collect();

        let mut cleaned = 0;
        for mut worker in stale {
            tracing::info!(worker = %worker.id, pid = worker.process_id, "terminating stale worker");
            worker.terminate(now);
            if self.upsert_worker(worker)? {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Reset assigned/processing units whose worker is gone back to
    /// pending. `retry_count` is deliberately untouched: recovery is not a
    /// failure. Returns how many units were reset.
    pub fn reset_stuck_units(&mut self, job_id: JobId) -> Result<usize, StoreError> {
        self.refresh()?;
        let stuck: Vec<WorkUnit> = self
            .state
            .units
            .values()
            .filter(|u| u.job_id == job_id && u.status.is_held())
            .filter(|u| {
                u.worker_id
                    .as_ref()
                    .and_then(|wid| self.state.workers.get(wid.as_str()))
                    .is_none_or(|w| !w.is_live())
            })
            .cloned()
            .collect();

        let mut reset = 0;
        for mut unit in stuck {
            tracing::info!(unit = %unit.id, "resetting stuck unit to pending");
            unit.reset_stuck();
            if self.update_work_unit(unit)? {
                reset += 1;
            }
        }
        Ok(reset)
    }

    // --- logs ---

    pub fn append_log(&mut self, entry: LogEntry) -> Result<bool, StoreError> {
        self.commit(StoreEvent::LogAppended { entry })
    }

    pub fn query_logs(
        &mut self,
        job_id: Option<JobId>,
        filter: LogFilter,
    ) -> Result<Vec<LogEntry>, StoreError> {
        self.refresh()?;
        let mut logs: Vec<LogEntry> = self
            .state
            .logs
            .iter()
            .filter(|l| job_id.is_none_or(|id| l.job_id == Some(id)))
            .filter(|l| filter.unit_id.is_none_or(|id| l.unit_id == Some(id)))
            .filter(|l| filter.min_level.is_none_or(|lvl| l.level >= lvl))
            .cloned()
            .collect();
        if filter.limit > 0 && logs.len() > filter.limit {
            logs.drain(..logs.len() - filter.limit);
        }
        Ok(logs)
    }

    // --- maintenance ---

    /// Aggregate counts for the stats endpoint.
    pub fn stats(&mut self) -> Result<StoreStats, StoreError> {
        self.refresh()?;
        let mut jobs_by_status: HashMap<String, u64> = HashMap::new();
        for job in self.state.jobs.values() {
            *jobs_by_status.entry(job.status.to_string()).or_insert(0) += 1;
        }
        let mut units_by_status: HashMap<String, u64> = HashMap::new();
        let mut total_cost_usd = 0.0;
        for unit in self.state.units.values() {
            *units_by_status.entry(unit.status.to_string()).or_insert(0) += 1;
            total_cost_usd += unit.cost_usd;
        }
        Ok(StoreStats {
            jobs_total: self.state.jobs.len() as u64,
            jobs_by_status,
            units_total: self.state.units.len() as u64,
            units_by_status,
            total_cost_usd,
            live_workers: self.state.workers.values().filter(|w| w.is_live()).count() as u64,
        })
    }

    /// Snapshot the current state and drop the WAL entries it covers.
    ///
    /// Ordering is load-bearing: the WAL is truncated only after the
    /// snapshot is durable (written, fsync'd, renamed, directory synced).
    pub fn checkpoint(&mut self) -> Result<(), StoreError> {
        let lock = self.acquire_write_lock()?;
        let result = self.checkpoint_locked();
        let _ = FileExt::unlock(&lock);
        result
    }

    fn checkpoint_locked(&mut self) -> Result<(), StoreError> {
        self.refresh()?;
        if self.cursor.seq == 0 {
            return Ok(());
        }
        let seq = self.cursor.seq;
        Snapshot::new(seq, self.state.clone()).save(&self.snapshot_path)?;
        self.wal.truncate_through(&mut self.cursor, seq)?;
        tracing::debug!(seq, "checkpoint complete");
        Ok(())
    }
}

/// Dispatch order: `created_at` ascending, enumeration position breaking ties.
fn dispatch_order(a: &WorkUnit, b: &WorkUnit) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.sequence.cmp(&b.sequence))
        .then_with(|| a.id.as_str().cmp(b.id.as_str()))
}

fn page<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items
        .into_iter()
        .skip(offset)
        .take(if limit == 0 { usize::MAX } else { limit })
        .collect()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
