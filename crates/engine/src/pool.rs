// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded-concurrency worker pool.
//!
//! One pool per running job. `submit` admits a unit when a slot is free,
//! allocates its worker row, and runs the unit on its own task; streamed
//! runner signals are persisted as they arrive. The capacity mutex guards
//! only the active set and is never held across an await.

use crate::process::kill_process_group;
use crate::SharedStore;
use drover_core::{Clock, JobId, SystemClock, UnitId, WorkUnit, WorkerRecord};
use drover_runner::{FailureReason, RunOutcome, RunRequest, RunnerSignal, UnitRunner};
use drover_store::StoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Invoked with the unit's persisted terminal record. Callbacks may write
/// to the store but must not block beyond that.
pub type UnitCallback = Arc<dyn Fn(&WorkUnit) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub job_id: JobId,
    pub max_workers: usize,
    pub unit_timeout: Duration,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub working_dir: Option<PathBuf>,
    pub add_dirs: Vec<PathBuf>,
}

impl PoolConfig {
    pub fn new(job_id: JobId, max_workers: usize, unit_timeout: Duration) -> Self {
        Self {
            job_id,
            max_workers: max_workers.max(1),
            unit_timeout,
            model: None,
            max_turns: None,
            working_dir: None,
            add_dirs: Vec::new(),
        }
    }
}

struct ActiveRun {
    #[allow(dead_code)] // kept for diagnostics in pool dumps
    worker_id: drover_core::WorkerId,
    process_id: Option<u32>,
}

struct PoolInner {
    config: PoolConfig,
    store: SharedStore,
    runner: Arc<dyn UnitRunner>,
    clock: SystemClock,
    active: Mutex<HashMap<UnitId, ActiveRun>>,
    changed: Notify,
    stopping: AtomicBool,
    on_complete: UnitCallback,
    on_failure: UnitCallback,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        store: SharedStore,
        runner: Arc<dyn UnitRunner>,
        on_complete: UnitCallback,
        on_failure: UnitCallback,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                store,
                runner,
                clock: SystemClock,
                active: Mutex::new(HashMap::new()),
                changed: Notify::new(),
                stopping: AtomicBool::new(false),
                on_complete,
                on_failure,
            }),
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    /// Admit one unit if a slot is free. Persists the worker row and the
    /// `assigned` transition before the task starts.
    pub async fn submit(&self, unit: WorkUnit, rendered_prompt: String) -> Result<bool, StoreError> {
        let inner = &self.inner;
        if self.is_stopping() {
            return Ok(false);
        }

        let now = inner.clock.epoch_ms();
        let worker = WorkerRecord::new(inner.config.job_id, unit.id, std::process::id(), now);

        // Capacity check and reservation are one critical section; the
        // store writes below happen after the lock is released.
        {
            let mut active = inner.active.lock();
            if active.len() >= inner.config.max_workers {
                return Ok(false);
            }
            active.insert(unit.id, ActiveRun { worker_id: worker.id, process_id: None });
        }

        let mut unit = unit;
        unit.assign(worker.id, rendered_prompt, now);
        let persisted = {
            let mut store = inner.store.lock();
            store.upsert_worker(worker.clone())? && store.update_work_unit(unit.clone())?
        };
        if !persisted {
            inner.active.lock().remove(&unit.id);
            inner.changed.notify_waiters();
            tracing::warn!(unit = %unit.id, "submit rolled back: store rejected the assignment");
            return Ok(false);
        }

        let task_inner = Arc::clone(inner);
        tokio::spawn(async move {
            run_unit(task_inner, unit, worker).await;
        });
        Ok(true)
    }

    /// Block until `submit` would succeed, or return false once the pool is
    /// stopping.
    pub async fn wait_for_available_slot(&self) -> bool {
        loop {
            let notified = self.inner.changed.notified();
            if self.is_stopping() {
                return false;
            }
            if self.inner.active.lock().len() < self.inner.config.max_workers {
                return true;
            }
            notified.await;
        }
    }

    /// Block until every in-flight task has finished.
    pub async fn wait_for_completion(&self) {
        loop {
            let notified = self.inner.changed.notified();
            if self.inner.active.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Wake when any task finishes (used by the dispatch loop while
    /// retries may still turn in-flight work back into pending units).
    pub async fn wait_for_change(&self) {
        self.inner.changed.notified().await;
    }

    /// Refuse new submissions without waiting for the drain.
    pub fn request_stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
    }

    /// Refuse new submissions, drain in-flight tasks, and terminate every
    /// worker row this job still holds live.
    pub async fn stop(&self) {
        self.request_stop();
        self.wait_for_completion().await;

        let now = self.inner.clock.epoch_ms();
        let mut store = self.inner.store.lock();
        let workers = match store.workers_for_job(self.inner.config.job_id) {
            Ok(workers) => workers,
            Err(e) => {
                tracing::error!(error = %e, "failed to list workers during pool stop");
                return;
            }
        };
        for mut worker in workers.into_iter().filter(|w| w.is_live()) {
            worker.terminate(now);
            if let Err(e) = store.upsert_worker(worker) {
                tracing::error!(error = %e, "failed to terminate worker record");
            }
        }
    }

    /// SIGKILL the process group of every live agent child. Returns how
    /// many groups were signaled.
    pub fn kill_children(&self) -> usize {
        let pids: Vec<u32> = {
            let active = self.inner.active.lock();
            active.values().filter_map(|run| run.process_id).collect()
        };
        let mut killed = 0;
        for pid in pids {
            if kill_process_group(pid) {
                killed += 1;
            }
        }
        killed
    }
}

/// Drive one unit start-to-finish on its own task.
async fn run_unit(inner: Arc<PoolInner>, unit: WorkUnit, worker: WorkerRecord) {
    let request = RunRequest {
        unit_id: unit.id,
        prompt: unit.rendered_prompt.clone(),
        timeout: inner.config.unit_timeout,
        model: inner.config.model.clone(),
        max_turns: inner.config.max_turns,
        working_dir: inner.config.working_dir.clone(),
        add_dirs: inner.config.add_dirs.clone(),
    };

    let (signal_tx, signal_rx) = mpsc::channel(64);
    let consumer = tokio::spawn(consume_signals(Arc::clone(&inner), unit.id, signal_rx));

    // Run on a child task so a panicking runner is contained and reported
    // as a unit failure rather than wedging the pool.
    let runner = Arc::clone(&inner.runner);
    let run_task = tokio::spawn(async move { runner.run(request, signal_tx).await });
    let outcome = match run_task.await {
        Ok(outcome) => outcome,
        Err(join_error) => RunOutcome {
            success: false,
            output: String::new(),
            failure: Some(FailureReason::Agent(format!("runner crashed: {}", join_error))),
            cost_usd: 0.0,
            execution_time_seconds: 0.0,
            session_id: None,
            num_turns: 0,
            conversation: Vec::new(),
        },
    };
    let _ = consumer.await;

    finish_unit(&inner, unit.id, worker, outcome);
}

/// Persist streamed progress: the PID on spawn, then each agent event in
/// emission order.
async fn consume_signals(
    inner: Arc<PoolInner>,
    unit_id: UnitId,
    mut signals: mpsc::Receiver<RunnerSignal>,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            RunnerSignal::Started { pid } => {
                if let Some(run) = inner.active.lock().get_mut(&unit_id) {
                    run.process_id = Some(pid);
                }
                let mut store = inner.store.lock();
                match store.get_work_unit(unit_id.as_str()) {
                    Ok(Some(mut unit)) => {
                        unit.begin(inner.clock.epoch_ms());
                        unit.process_id = Some(pid);
                        if let Err(e) = store.update_work_unit(unit) {
                            tracing::error!(error = %e, unit = %unit_id, "failed to persist processing transition");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, unit = %unit_id, "failed to load unit for processing transition")
                    }
                }
            }
            RunnerSignal::Event(event) => {
                if let Err(e) = inner.store.lock().append_unit_event(unit_id, event) {
                    tracing::error!(error = %e, unit = %unit_id, "failed to persist agent event");
                }
            }
        }
    }
}

/// Persist the terminal transition, update the worker row, fire callbacks,
/// and release the slot.
fn finish_unit(inner: &Arc<PoolInner>, unit_id: UnitId, mut worker: WorkerRecord, outcome: RunOutcome) {
    let now = inner.clock.epoch_ms();

    let settled_unit: Option<WorkUnit> = {
        let mut store = inner.store.lock();
        match store.get_work_unit(unit_id.as_str()) {
            Ok(Some(mut unit)) => {
                if unit.status.is_terminal() && unit.worker_id.is_none() {
                    // Settled externally (operator kill) while we ran;
                    // leave the record as the operator wrote it.
                    None
                } else {
                    unit.session_id = outcome.session_id.clone().or(unit.session_id.take());
                    unit.cost_usd = outcome.cost_usd;
                    unit.execution_time_seconds = outcome.execution_time_seconds;
                    if outcome.conversation.len() > unit.conversation.len() {
                        unit.conversation = outcome.conversation.clone();
                    }
                    if outcome.success {
                        unit.result
                            .insert("output".to_string(), serde_json::json!(outcome.output));
                        unit.complete(now);
                    } else {
                        unit.fail(outcome.failure_text(), now);
                    }
                    match store.update_work_unit(unit.clone()) {
                        Ok(true) => Some(unit),
                        Ok(false) => {
                            tracing::error!(unit = %unit_id, "terminal transition rejected by store");
                            None
                        }
                        Err(e) => {
                            tracing::error!(error = %e, unit = %unit_id, "failed to persist terminal transition");
                            None
                        }
                    }
                }
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, unit = %unit_id, "failed to load unit at finish");
                None
            }
        }
    };

    {
        let mut store = inner.store.lock();
        worker.release(outcome.success, outcome.execution_time_seconds, now);
        if let Err(e) = store.upsert_worker(worker) {
            tracing::error!(error = %e, "failed to persist worker release");
        }
    }

    // Callbacks fire before the slot is released so the dispatch loop can
    // never observe "no pending, no in-flight" while a retry reset is
    // still in progress.
    if let Some(unit) = settled_unit.as_ref() {
        if outcome.success {
            (inner.on_complete)(unit);
        } else {
            (inner.on_failure)(unit);
        }
    }

    inner.active.lock().remove(&unit_id);
    inner.changed.notify_waiters();
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
