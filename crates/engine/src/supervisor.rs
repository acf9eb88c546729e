// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: one detached process owning one job start-to-finish.
//!
//! Entry is re-entrant: fresh starts, resumes, and post-crash recoveries
//! all run the same sequence. Recover stale state, transition to running,
//! drive the dispatch loop, run the optional post-processing unit, settle
//! the final status, checkpoint, exit.

use crate::env::EngineEnv;
use crate::pool::{PoolConfig, UnitCallback, WorkerPool};
use crate::SharedStore;
use drover_core::{
    render_prompt, Clock, Job, JobId, JobStatus, LogEntry, LogLevel, Payload, SystemClock,
    UnitStatus, WorkUnit, META_SUPERVISOR_ERROR, POST_PROCESSING_UNIT_TYPE,
};
use drover_runner::UnitRunner;
use drover_store::{RecomputedCounters, StoreError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Page size of the dispatch loop's pending-unit fetches.
const DISPATCH_PAGE: usize = 32;

/// How long the dispatch loop naps when everything pending is in flight.
const IDLE_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("record vanished mid-run: {0}")]
    RecordVanished(String),
    #[error("job {id} cannot start from status {status}")]
    NotStartable { id: String, status: JobStatus },
}

/// Signal-driven stop request shared between the signal task and the run
/// loop. Handlers only trip the flag; no store writes happen in signal
/// context. A second trip escalates to a group-kill of live children.
#[derive(Clone)]
pub struct StopFlag {
    inner: Arc<StopInner>,
}

struct StopInner {
    trips: AtomicU32,
    notify: Notify,
}

impl StopFlag {
    pub fn new() -> Self {
        Self { inner: Arc::new(StopInner { trips: AtomicU32::new(0), notify: Notify::new() }) }
    }

    pub fn trip(&self) {
        self.inner.trips.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_tripped(&self) -> bool {
        self.trip_count() > 0
    }

    pub fn trip_count(&self) -> u32 {
        self.inner.trips.load(Ordering::SeqCst)
    }

    /// Resolve once the flag has been tripped at least `count` times.
    pub async fn wait_for_trips(&self, count: u32) {
        loop {
            let notified = self.inner.notify.notified();
            if self.trip_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one job to its final status. See the module docs for the sequence.
pub async fn run_supervisor(
    store: SharedStore,
    runner: Arc<dyn UnitRunner>,
    job_id: JobId,
    env: &EngineEnv,
    stop: StopFlag,
) -> Result<JobStatus, SupervisorError> {
    let clock = SystemClock;

    // Recover whatever a dead supervisor left behind before touching the
    // job itself.
    let (stale_workers, stuck_units) = {
        let mut s = store.lock();
        (s.cleanup_stale_workers(job_id)?, s.reset_stuck_units(job_id)?)
    };
    if stale_workers > 0 || stuck_units > 0 {
        tracing::info!(stale_workers, stuck_units, "recovered state from a previous run");
        log_store(
            &store,
            LogLevel::Warn,
            job_id,
            format!(
                "recovered {} stale worker(s), reset {} stuck unit(s)",
                stale_workers, stuck_units
            ),
        );
    }

    let mut job = store
        .lock()
        .get_job(job_id.as_str())?
        .ok_or_else(|| SupervisorError::JobNotFound(job_id.to_string()))?;

    // A failed job resumes only into post-processing, and only with an
    // explicit bypass. Running is accepted for crash recovery: the status
    // is stale when the recorded supervisor died.
    let resume_to_post = job.status == JobStatus::Failed && job.bypass_failures;
    if !job.status.may_start() && job.status != JobStatus::Running && !resume_to_post {
        return Err(SupervisorError::NotStartable {
            id: job.id.to_string(),
            status: job.status,
        });
    }

    job.set_executor_pid(std::process::id());
    if !resume_to_post {
        job.mark_running(clock.epoch_ms());
    }
    // A crash can lose a counter increment between a unit settling and its
    // callback; the unit rows are the truth, so resync on entry.
    let counters = store.lock().recompute_counters(job_id)?;
    if job.completed_units != counters.completed_units
        || job.failed_units != counters.failed_units
    {
        tracing::warn!(
            persisted = job.completed_units,
            recomputed = counters.completed_units,
            "reconciling job counters after recovery"
        );
        job.completed_units = counters.completed_units;
        job.failed_units = counters.failed_units;
    }
    store.lock().update_job(job.clone())?;
    log_store(
        &store,
        LogLevel::Info,
        job_id,
        format!("supervisor started (pid {})", std::process::id()),
    );

    let pool = WorkerPool::new(
        PoolConfig::new(job_id, job.max_workers as usize, env.unit_timeout),
        Arc::clone(&store),
        runner,
        completion_callback(Arc::clone(&store)),
        failure_callback(Arc::clone(&store)),
    );

    // Second terminate during the drain escalates to a group-kill.
    let escalation = {
        let pool = pool.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            stop.wait_for_trips(2).await;
            let killed = pool.kill_children();
            tracing::warn!(killed, "second terminate: killed live agent process groups");
        })
    };

    if !resume_to_post {
        dispatch_loop(&store, &pool, &job, &stop).await?;
        pool.wait_for_completion().await;
    }

    let counters = store.lock().recompute_counters(job_id)?;
    let all_ok =
        counters.failed_units == 0 && counters.completed_units == counters.total_units;
    let unfinished = counters.completed_units + counters.failed_units < counters.total_units;

    let mut job = store
        .lock()
        .get_job(job_id.as_str())?
        .ok_or_else(|| SupervisorError::RecordVanished(job_id.to_string()))?;

    let final_status = if stop.is_tripped() && unfinished {
        JobStatus::Paused
    } else if job.post_processing_prompt.is_some() && (all_ok || job.bypass_failures) {
        if !all_ok {
            log_bypassed_units(&store, job_id)?;
        }
        let pp_ok = run_post_processing(&store, &pool, &mut job, &counters).await?;
        if pp_ok {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    } else if all_ok {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };

    let mut job = store
        .lock()
        .get_job(job_id.as_str())?
        .ok_or_else(|| SupervisorError::RecordVanished(job_id.to_string()))?;
    if final_status == JobStatus::Paused {
        job.status = JobStatus::Paused;
    } else {
        job.settle(final_status, clock.epoch_ms());
    }
    // Unit rows are the truth; the settled record must agree with them
    // even if an operator command raced a callback mid-run.
    let settled = store.lock().recompute_counters(job_id)?;
    job.completed_units = settled.completed_units;
    job.failed_units = settled.failed_units;
    job.clear_executor_pid();
    store.lock().update_job(job.clone())?;
    log_store(&store, LogLevel::Info, job_id, format!("job finished: {}", final_status));

    escalation.abort();
    pool.stop().await;
    if let Err(e) = store.lock().checkpoint() {
        tracing::warn!(error = %e, "checkpoint on exit failed");
    }
    Ok(final_status)
}

/// Like [`run_supervisor`], but any error marks the job failed with the
/// error message in metadata before propagating. The `droverd` entry point
/// uses this so a crash never strands a job in `running`.
pub async fn run_supervisor_guarded(
    store: SharedStore,
    runner: Arc<dyn UnitRunner>,
    job_id: JobId,
    env: &EngineEnv,
    stop: StopFlag,
) -> Result<JobStatus, SupervisorError> {
    match run_supervisor(Arc::clone(&store), runner, job_id, env, stop).await {
        Ok(status) => Ok(status),
        // A pre-flight refusal is not a crash; leave the job untouched.
        Err(e @ SupervisorError::NotStartable { .. }) => Err(e),
        Err(e) => {
            tracing::error!(error = %e, job = %job_id, "supervisor crashed; marking job failed");
            let mut s = store.lock();
            if let Ok(Some(mut job)) = s.get_job(job_id.as_str()) {
                job.metadata.insert(
                    META_SUPERVISOR_ERROR.to_string(),
                    serde_json::json!(e.to_string()),
                );
                job.settle(JobStatus::Failed, SystemClock.epoch_ms());
                job.clear_executor_pid();
                let _ = s.update_job(job);
            }
            Err(e)
        }
    }
}

/// Fetch pending pages and feed the pool until the batch drains, the stop
/// flag trips, or nothing pending remains with no work in flight.
async fn dispatch_loop(
    store: &SharedStore,
    pool: &WorkerPool,
    job: &Job,
    stop: &StopFlag,
) -> Result<(), SupervisorError> {
    'dispatch: while !stop.is_tripped() {
        let page: Vec<WorkUnit> = store
            .lock()
            .get_pending_units(job.id, DISPATCH_PAGE)?
            .into_iter()
            .filter(|u| !u.is_post_processing())
            .collect();

        if page.is_empty() {
            if pool.active_count() == 0 {
                break;
            }
            // In-flight failures may retry back to pending; wake on pool
            // changes, bounded so a missed wake cannot wedge the loop.
            let _ = tokio::time::timeout(IDLE_WAIT, pool.wait_for_change()).await;
            continue;
        }

        for unit in page {
            if stop.is_tripped() {
                break 'dispatch;
            }
            let prompt = render_prompt(&job.worker_prompt_template, &unit.payload);
            if !pool.wait_for_available_slot().await {
                break 'dispatch;
            }
            if !pool.submit(unit, prompt).await? {
                // Lost the slot race; re-fetch a fresh page.
                continue 'dispatch;
            }
        }
    }
    Ok(())
}

fn completion_callback(store: SharedStore) -> UnitCallback {
    Arc::new(move |unit: &WorkUnit| {
        if unit.is_post_processing() {
            return;
        }
        let mut s = store.lock();
        match s.get_job(unit.job_id.as_str()) {
            Ok(Some(mut job)) => {
                job.completed_units += 1;
                if let Err(e) = s.update_job(job) {
                    tracing::error!(error = %e, "failed to bump completed counter");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "failed to load job in completion callback"),
        }
    })
}

/// Retry-or-terminal decision, driven by `retry_count` alone.
fn failure_callback(store: SharedStore) -> UnitCallback {
    Arc::new(move |unit: &WorkUnit| {
        let mut s = store.lock();
        if unit.can_retry() {
            let mut retry = unit.clone();
            retry.reset_for_retry();
            tracing::info!(
                unit = %unit.id,
                attempt = retry.retry_count,
                "unit failed, sending back for retry"
            );
            match s.update_work_unit(retry) {
                Ok(true) => {}
                Ok(false) => tracing::error!(unit = %unit.id, "retry reset rejected by store"),
                Err(e) => tracing::error!(error = %e, unit = %unit.id, "failed to persist retry reset"),
            }
            let entry = LogEntry::new(
                LogLevel::Warn,
                "pool",
                format!("unit {} failed ({}), retrying", unit.id, unit.error.as_deref().unwrap_or("unknown")),
            )
            .job_id(unit.job_id)
            .unit_id(unit.id);
            let _ = s.append_log(entry);
            return;
        }

        if !unit.is_post_processing() {
            match s.get_job(unit.job_id.as_str()) {
                Ok(Some(mut job)) => {
                    job.failed_units += 1;
                    if let Err(e) = s.update_job(job) {
                        tracing::error!(error = %e, "failed to bump failed counter");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "failed to load job in failure callback"),
            }
        }
        let entry = LogEntry::new(
            LogLevel::Error,
            "pool",
            format!(
                "unit {} failed permanently: {}",
                unit.id,
                unit.error.as_deref().unwrap_or("unknown")
            ),
        )
        .job_id(unit.job_id)
        .unit_id(unit.id);
        let _ = s.append_log(entry);
    })
}

/// Run the synthetic post-processing unit with a budget of one slot.
/// Returns whether it ultimately completed.
async fn run_post_processing(
    store: &SharedStore,
    pool: &WorkerPool,
    job: &mut Job,
    counters: &RecomputedCounters,
) -> Result<bool, SupervisorError> {
    let clock = SystemClock;
    job.status = JobStatus::PostProcessing;
    store.lock().update_job(job.clone())?;
    log_store(store, LogLevel::Info, job.id, "entering post-processing".to_string());

    let existing = store
        .lock()
        .list_units_for_job(job.id, 0, 0, false)?
        .into_iter()
        .find(|u| u.is_post_processing());

    let unit = match existing {
        Some(u) if u.status == UnitStatus::Completed => return Ok(true),
        Some(mut u) => {
            if u.status == UnitStatus::Failed {
                u.restart();
                store.lock().update_work_unit(u.clone())?;
            }
            u
        }
        None => {
            let unit = WorkUnit::new(
                job.id,
                POST_PROCESSING_UNIT_TYPE,
                counters.total_units,
                post_processing_payload(job, counters),
                job.max_retries,
                clock.epoch_ms(),
            );
            store.lock().create_work_unit(unit.clone())?;
            unit
        }
    };

    let template = job.post_processing_prompt.clone().unwrap_or_default();
    let prompt = render_prompt(&template, &unit.payload);

    loop {
        let current = store
            .lock()
            .get_work_unit(unit.id.as_str())?
            .ok_or_else(|| SupervisorError::RecordVanished(unit.id.to_string()))?;
        match current.status {
            UnitStatus::Completed => return Ok(true),
            UnitStatus::Failed => return Ok(false),
            UnitStatus::Pending => {
                if !pool.wait_for_available_slot().await {
                    return Ok(false);
                }
                let _ = pool.submit(current, prompt.clone()).await?;
                pool.wait_for_completion().await;
            }
            _ => {
                let _ = tokio::time::timeout(IDLE_WAIT, pool.wait_for_change()).await;
            }
        }
    }
}

/// Payload describing the batch outcome for the synthesis agent.
fn post_processing_payload(job: &Job, counters: &RecomputedCounters) -> Payload {
    let mut payload = Payload::new();
    payload.insert("job_name".to_string(), serde_json::json!(job.name));
    payload.insert("user_intent".to_string(), serde_json::json!(job.user_intent));
    payload.insert("total_units".to_string(), serde_json::json!(counters.total_units));
    payload.insert(
        "completed_units".to_string(),
        serde_json::json!(counters.completed_units),
    );
    payload.insert("failed_units".to_string(), serde_json::json!(counters.failed_units));
    if let Some(dir) = &job.post_processing_output_directory {
        payload.insert(
            "output_directory".to_string(),
            serde_json::json!(dir.display().to_string()),
        );
    }
    payload
}

/// Operator intent over broken data deserves an audit trail: name exactly
/// which failed units post-processing is running over.
fn log_bypassed_units(store: &SharedStore, job_id: JobId) -> Result<(), SupervisorError> {
    let failed: Vec<String> = store
        .lock()
        .list_units_for_job(job_id, 0, 0, true)?
        .into_iter()
        .filter(|u| u.status == UnitStatus::Failed)
        .map(|u| u.id.to_string())
        .collect();
    tracing::warn!(count = failed.len(), units = ?failed, "bypassing failed units");
    log_store(
        store,
        LogLevel::Warn,
        job_id,
        format!("bypassing {} failed unit(s): {}", failed.len(), failed.join(", ")),
    );
    Ok(())
}

fn log_store(store: &SharedStore, level: LogLevel, job_id: JobId, message: String) {
    let entry = LogEntry::new(level, "supervisor", message).job_id(job_id);
    if let Err(e) = store.lock().append_log(entry) {
        tracing::debug!(error = %e, "store log append failed");
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
