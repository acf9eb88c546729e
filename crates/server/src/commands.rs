// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command handlers: operator actions routed through the orchestrator.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use drover_engine::Orchestrator;
use std::sync::Arc;

fn control(state: &AppState) -> Result<Arc<Orchestrator>, ApiError> {
    state.control.clone().ok_or_else(ApiError::read_only)
}

/// Set `bypass_failures` and resume toward post-processing.
pub async fn bypass(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = control(&state)?;
    let pid = orchestrator.bypass_failures(&id)?;
    Ok(Json(serde_json::json!({ "ok": true, "supervisor_pid": pid })))
}

/// Terminate the job's supervisor (graceful; it drains and pauses).
pub async fn kill_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = control(&state)?;
    let signaled = orchestrator.kill_job(&id)?;
    Ok(Json(serde_json::json!({ "ok": true, "signaled": signaled })))
}

/// Spawn a new supervisor (no-op if one is already alive).
pub async fn restart_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = control(&state)?;
    let pid = orchestrator.resume_job(&id)?;
    Ok(Json(serde_json::json!({ "ok": true, "supervisor_pid": pid })))
}

/// Group-kill the unit's agent child; the unit settles as failed/killed.
pub async fn kill_unit(
    State(state): State<AppState>,
    Path((id, uid)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = control(&state)?;
    orchestrator.kill_unit(&id, &uid)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Reset a failed unit back to pending.
pub async fn restart_unit(
    State(state): State<AppState>,
    Path((id, uid)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let orchestrator = control(&state)?;
    orchestrator.restart_unit(&id, &uid)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
