// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The front-facing API: create jobs, run the test phase, spawn and
//! resume supervisors, and execute operator unit commands.

use crate::enumerate::{EnumerateError, EnumeratorRegistry};
use crate::env::EngineEnv;
use crate::process::{kill_process_group, pid_alive, terminate};
use crate::spawn::spawn_supervisor;
use crate::synth::PromptSynthesizer;
use crate::SharedStore;
use drover_core::{
    render_prompt, Clock, Job, JobId, JobStatus, Payload, SystemClock, UnitStatus, WorkUnit,
    WorkerRecord, META_UNIT_LABEL_FIELD,
};
use drover_runner::{RunRequest, RunnerSignal, UnitRunner};
use drover_store::StoreError;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("unit not found: {0}")]
    UnitNotFound(String),
    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),
    #[error("enumeration failed: {0}")]
    Enumeration(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("failed to spawn supervisor: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub name: String,
    pub user_intent: String,
    pub enumerator_type: String,
    pub enumerator_config: Value,
    pub post_processing_prompt: Option<String>,
    pub post_processing_output_directory: Option<PathBuf>,
    /// Payload field shown as the unit label in dashboards.
    pub unit_label_field: Option<String>,
}

#[derive(Debug)]
pub enum CreateJobOutcome {
    Created {
        job_id: JobId,
        worker_prompt_template: String,
        sample_payload: Option<Payload>,
        total_units: u64,
    },
    /// User-supplied enumeration code awaiting human approval. Nothing was
    /// persisted; the code goes back for review.
    PendingApproval { code: String, sha256: String },
}

#[derive(Debug)]
pub enum StartOutcome {
    /// A detached supervisor now owns the job.
    Spawned { pid: u32 },
    /// The test unit ran synchronously; the job is in `testing`.
    TestFinished { unit: Box<WorkUnit>, passed: bool },
    /// Test rejected; the job is back in `created` with the unit pending.
    TestRejected,
}

pub struct Orchestrator {
    store: SharedStore,
    runner: Arc<dyn UnitRunner>,
    synthesizer: Arc<dyn PromptSynthesizer>,
    enumerators: EnumeratorRegistry,
    env: EngineEnv,
}

impl Orchestrator {
    pub fn new(
        store: SharedStore,
        runner: Arc<dyn UnitRunner>,
        synthesizer: Arc<dyn PromptSynthesizer>,
        env: EngineEnv,
    ) -> Self {
        Self {
            store,
            runner,
            synthesizer,
            enumerators: EnumeratorRegistry::with_defaults(),
            env,
        }
    }

    pub fn env(&self) -> &EngineEnv {
        &self.env
    }

    fn require_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        self.store
            .lock()
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    fn require_unit_of(&self, job: &Job, unit_id: &str) -> Result<WorkUnit, OrchestratorError> {
        let unit = self
            .store
            .lock()
            .get_work_unit(unit_id)?
            .filter(|u| u.job_id == job.id)
            .ok_or_else(|| OrchestratorError::UnitNotFound(unit_id.to_string()))?;
        Ok(unit)
    }

    /// Enumerate → synthesize template → persist job + one unit per item.
    pub async fn create_job(
        &self,
        request: CreateJobRequest,
    ) -> Result<CreateJobOutcome, OrchestratorError> {
        // Availability is job creation's early fatal: a missing agent
        // binary must not produce a job that can never run.
        let version = self
            .runner
            .check_available()
            .await
            .map_err(|e| OrchestratorError::AgentUnavailable(e.to_string()))?;
        tracing::debug!(%version, "agent binary probe succeeded");

        let adapter = self
            .enumerators
            .resolve(&request.enumerator_type)
            .map_err(|e| OrchestratorError::Enumeration(e.to_string()))?;
        let payloads = match adapter.enumerate(&request.enumerator_config).await {
            Ok(payloads) => payloads,
            Err(EnumerateError::PendingApproval { code, sha256 }) => {
                return Ok(CreateJobOutcome::PendingApproval { code, sha256 });
            }
            Err(e) => return Err(OrchestratorError::Enumeration(e.to_string())),
        };
        if payloads.is_empty() {
            return Err(OrchestratorError::Enumeration(
                "enumerator produced no items".to_string(),
            ));
        }

        let template = self.synthesizer.synthesize(&request.user_intent, payloads.first());
        let clock = SystemClock;

        let mut job = Job::new(
            request.name,
            request.user_intent,
            template.clone(),
            adapter.unit_type(),
            self.env.max_workers,
            self.env.max_retries,
            &clock,
        );
        if let Some(prompt) = request.post_processing_prompt {
            job = job.post_processing_prompt(prompt);
        }
        if let Some(dir) = request.post_processing_output_directory {
            job = job.post_processing_output_directory(dir);
        }
        if let Some(field) = request.unit_label_field {
            job.metadata
                .insert(META_UNIT_LABEL_FIELD.to_string(), serde_json::json!(field));
        }
        job.total_units = payloads.len() as u64;

        let job_id = job.id;
        let total_units = payloads.len() as u64;
        let sample_payload = payloads.first().cloned();
        if !self.store.lock().create_job(job)? {
            return Err(OrchestratorError::InvalidState(
                "job id collision on create".to_string(),
            ));
        }
        for (sequence, payload) in payloads.into_iter().enumerate() {
            let unit = WorkUnit::new(
                job_id,
                adapter.unit_type(),
                sequence as u64,
                payload,
                self.env.max_retries,
                clock.epoch_ms(),
            );
            self.store.lock().create_work_unit(unit)?;
        }

        tracing::info!(job = %job_id, units = total_units, "job created");
        Ok(CreateJobOutcome::Created {
            job_id,
            worker_prompt_template: template,
            sample_payload,
            total_units,
        })
    }

    /// Start a job: straight to a supervisor with `skip_test`, otherwise
    /// through the synchronous test phase and its approval gate.
    pub async fn start_job(
        &self,
        job_id: &str,
        skip_test: bool,
        approve: Option<bool>,
    ) -> Result<StartOutcome, OrchestratorError> {
        let mut job = self.require_job(job_id)?;

        if skip_test {
            if !job.status.may_start() {
                return Err(OrchestratorError::InvalidState(format!(
                    "job is {}, not startable",
                    job.status
                )));
            }
            let pid = self.spawn(&mut job)?;
            return Ok(StartOutcome::Spawned { pid });
        }

        match (job.status, approve) {
            (JobStatus::Created, _) => self.run_test_unit(job).await,
            (JobStatus::Testing, Some(true)) => {
                job.status = JobStatus::Ready;
                self.store.lock().update_job(job.clone())?;
                let pid = self.spawn(&mut job)?;
                Ok(StartOutcome::Spawned { pid })
            }
            (JobStatus::Testing, Some(false)) => {
                self.reject_test(&mut job)?;
                Ok(StartOutcome::TestRejected)
            }
            (JobStatus::Testing, None) => Err(OrchestratorError::InvalidState(
                "job is testing: approve or reject the test result".to_string(),
            )),
            (status, _) => Err(OrchestratorError::InvalidState(format!(
                "job is {}, expected created or testing",
                status
            ))),
        }
    }

    /// Run the first pending unit synchronously in this process as the
    /// pre-batch test, storing its conversation like any other run.
    async fn run_test_unit(&self, mut job: Job) -> Result<StartOutcome, OrchestratorError> {
        let clock = SystemClock;
        let unit = self
            .store
            .lock()
            .get_pending_units(job.id, 1)?
            .pop()
            .ok_or_else(|| OrchestratorError::InvalidState("job has no pending units".to_string()))?;

        job.test_unit_id = Some(unit.id);
        job.status = JobStatus::Testing;
        self.store.lock().update_job(job.clone())?;

        let now = clock.epoch_ms();
        let worker = WorkerRecord::new(job.id, unit.id, std::process::id(), now);
        self.store.lock().upsert_worker(worker.clone())?;
        let prompt = render_prompt(&job.worker_prompt_template, &unit.payload);
        let mut unit = unit;
        unit.assign(worker.id, prompt.clone(), now);
        self.store.lock().update_work_unit(unit.clone())?;

        let (signal_tx, mut signal_rx) = mpsc::channel(64);
        let consumer = {
            let store = Arc::clone(&self.store);
            let unit_id = unit.id;
            tokio::spawn(async move {
                while let Some(signal) = signal_rx.recv().await {
                    let mut s = store.lock();
                    match signal {
                        RunnerSignal::Started { pid } => {
                            if let Ok(Some(mut u)) = s.get_work_unit(unit_id.as_str()) {
                                u.begin(SystemClock.epoch_ms());
                                u.process_id = Some(pid);
                                let _ = s.update_work_unit(u);
                            }
                        }
                        RunnerSignal::Event(event) => {
                            let _ = s.append_unit_event(unit_id, event);
                        }
                    }
                }
            })
        };

        let request = RunRequest::new(unit.id, prompt, self.env.unit_timeout);
        let outcome = self.runner.run(request, signal_tx).await;
        let _ = consumer.await;

        let now = clock.epoch_ms();
        let mut unit = self
            .store
            .lock()
            .get_work_unit(unit.id.as_str())?
            .ok_or_else(|| OrchestratorError::UnitNotFound(unit.id.to_string()))?;
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
        self.store.lock().update_work_unit(unit.clone())?;

        let mut worker = worker;
        worker.release(outcome.success, outcome.execution_time_seconds, now);
        self.store.lock().upsert_worker(worker)?;

        let mut job = self.require_job(job.id.as_str())?;
        job.test_passed = outcome.success;
        if outcome.success {
            job.completed_units += 1;
        }
        self.store.lock().update_job(job)?;

        tracing::info!(unit = %unit.id, passed = outcome.success, "test unit finished");
        Ok(StartOutcome::TestFinished { unit: Box::new(unit), passed: outcome.success })
    }

    /// Rejection path: test unit back to pending, job back to `created`.
    fn reject_test(&self, job: &mut Job) -> Result<(), OrchestratorError> {
        let test_id = job
            .test_unit_id
            .ok_or_else(|| OrchestratorError::InvalidState("job has no test unit".to_string()))?;
        let mut unit = self
            .store
            .lock()
            .get_work_unit(test_id.as_str())?
            .ok_or_else(|| OrchestratorError::UnitNotFound(test_id.to_string()))?;

        let was_completed = unit.status == UnitStatus::Completed;
        unit.restart();
        unit.retry_count = 0;
        unit.conversation.clear();
        self.store.lock().update_work_unit(unit)?;

        if was_completed {
            job.completed_units = job.completed_units.saturating_sub(1);
        }
        job.test_passed = false;
        job.status = JobStatus::Created;
        self.store.lock().update_job(job.clone())?;
        Ok(())
    }

    /// Idempotent resume: a live recorded supervisor wins; otherwise a new
    /// one is spawned to recover the job.
    pub fn resume_job(&self, job_id: &str) -> Result<u32, OrchestratorError> {
        let mut job = self.require_job(job_id)?;
        if let Some(pid) = job.executor_pid() {
            if pid_alive(pid) {
                tracing::debug!(job = %job.id, pid, "supervisor already running");
                return Ok(pid);
            }
        }
        if job.status == JobStatus::Completed {
            return Err(OrchestratorError::InvalidState(
                "job already completed".to_string(),
            ));
        }
        self.spawn(&mut job)
    }

    /// SIGTERM the recorded supervisor. Returns false when none is alive.
    pub fn kill_job(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        let job = self.require_job(job_id)?;
        match job.executor_pid() {
            Some(pid) if pid_alive(pid) => {
                tracing::info!(job = %job.id, pid, "terminating supervisor");
                Ok(terminate(pid))
            }
            _ => Ok(false),
        }
    }

    /// Allow post-processing over terminal failures, then resume.
    pub fn bypass_failures(&self, job_id: &str) -> Result<u32, OrchestratorError> {
        let mut job = self.require_job(job_id)?;
        if !job.bypass_failures {
            job.bypass_failures = true;
            self.store.lock().update_job(job.clone())?;
        }
        self.resume_job(job.id.as_str())
    }

    /// Operator restart of a failed unit: back to pending with worker,
    /// process, and error cleared.
    pub fn restart_unit(&self, job_id: &str, unit_id: &str) -> Result<(), OrchestratorError> {
        let mut job = self.require_job(job_id)?;
        let mut unit = self.require_unit_of(&job, unit_id)?;
        if unit.status != UnitStatus::Failed {
            return Err(OrchestratorError::InvalidState(format!(
                "unit is {}, only failed units can be restarted",
                unit.status
            )));
        }

        unit.restart();
        let counted = !unit.is_post_processing();
        self.store.lock().update_work_unit(unit)?;
        if counted {
            job.failed_units = job.failed_units.saturating_sub(1);
            self.store.lock().update_job(job)?;
        }
        Ok(())
    }

    /// Group-kill a unit's live agent child and settle the unit as failed
    /// with error `killed`.
    pub fn kill_unit(&self, job_id: &str, unit_id: &str) -> Result<(), OrchestratorError> {
        let mut job = self.require_job(job_id)?;
        let mut unit = self.require_unit_of(&job, unit_id)?;
        let Some(pid) = unit.process_id else {
            return Err(OrchestratorError::InvalidState(
                "unit has no live agent process".to_string(),
            ));
        };

        kill_process_group(pid);
        unit.fail("killed", SystemClock.epoch_ms());
        let counted = !unit.is_post_processing();
        self.store.lock().update_work_unit(unit)?;

        // Only count when no supervisor is alive to race against; a live
        // one resyncs counters from the unit rows when it settles the job.
        let supervisor_alive = job.executor_pid().map(pid_alive).unwrap_or(false);
        if counted && !supervisor_alive {
            job.failed_units += 1;
            self.store.lock().update_job(job)?;
        }
        Ok(())
    }

    fn spawn(&self, job: &mut Job) -> Result<u32, OrchestratorError> {
        let pid = spawn_supervisor(&job.id, &self.env)
            .map_err(|e| OrchestratorError::Spawn(e.to_string()))?;
        job.set_executor_pid(pid);
        self.store.lock().update_job(job.clone())?;
        Ok(pid)
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
