// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-engine: worker pool, supervisor, and orchestrator.
//!
//! The orchestrator creates jobs and spawns one detached `droverd`
//! supervisor per running job. The supervisor drives a bounded worker pool
//! that hands units to the agent runner and streams results back into the
//! store.

pub mod enumerate;
pub mod env;
pub mod orchestrator;
pub mod pool;
pub mod process;
pub mod spawn;
pub mod supervisor;
pub mod synth;

use parking_lot::Mutex;
use std::sync::Arc;

/// One store handle shared by the tasks of a process. Locks are held only
/// for the duration of a single store call.
pub type SharedStore = Arc<Mutex<drover_store::Store>>;

/// Wrap a freshly opened store for sharing.
pub fn shared_store(store: drover_store::Store) -> SharedStore {
    Arc::new(Mutex::new(store))
}

pub use enumerate::{Enumerator, EnumerateError, EnumeratorRegistry};
pub use env::{EngineEnv, EnvError};
pub use orchestrator::{
    CreateJobOutcome, CreateJobRequest, Orchestrator, OrchestratorError, StartOutcome,
};
pub use pool::{PoolConfig, UnitCallback, WorkerPool};
pub use supervisor::{run_supervisor, run_supervisor_guarded, StopFlag, SupervisorError};
pub use synth::{PromptSynthesizer, TemplateSynthesizer};
