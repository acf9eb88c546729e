// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read handlers: everything comes straight out of the store.

use crate::dto::{JobDetail, JobSummary, LiveUnit, UnitSummary};
use crate::error::{ApiError, ErrorCode};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use drover_core::{Job, JobStatus};
use serde::Deserialize;

const DEFAULT_LIMIT: usize = 50;
const RECENT_UNITS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn parse_status(raw: &Option<String>) -> Result<Option<JobStatus>, ApiError> {
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => serde_json::from_value(serde_json::json!(s))
            .map(Some)
            .map_err(|_| ApiError::new(ErrorCode::ServerError, format!("unknown status {:?}", s))),
    }
}

fn load_job(state: &AppState, id: &str) -> Result<Job, ApiError> {
    state
        .store
        .lock()
        .get_job(id)?
        .ok_or_else(|| ApiError::job_not_found(id))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = parse_status(&params.status)?;
    let jobs = state.store.lock().list_jobs(
        status,
        params.limit.unwrap_or(DEFAULT_LIMIT),
        params.offset.unwrap_or(0),
    )?;
    let summaries: Vec<JobSummary> = jobs.iter().map(JobSummary::from).collect();
    Ok(Json(serde_json::json!({ "jobs": summaries })))
}

pub async fn job_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobDetail>, ApiError> {
    let job = load_job(&state, &id)?;
    let label_field = job.unit_label_field().map(str::to_string);

    let (workers, units, counts) = {
        let mut store = state.store.lock();
        (
            store.workers_for_job(job.id)?,
            store.list_units_for_job(job.id, RECENT_UNITS, 0, true)?,
            store.count_units_by_status(job.id)?,
        )
    };

    let unit_stats = counts
        .into_iter()
        .map(|(status, count)| (status.to_string(), count))
        .collect();
    let recent_units = units
        .iter()
        .map(|u| UnitSummary::from_unit(u, label_field.as_deref()))
        .collect();

    Ok(Json(JobDetail { job, workers, recent_units, unit_stats }))
}

pub async fn list_units(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = load_job(&state, &id)?;
    let label_field = job.unit_label_field().map(str::to_string);

    let (units, post_processing_unit) = {
        let mut store = state.store.lock();
        let units = store.list_units_for_job(
            job.id,
            params.limit.unwrap_or(DEFAULT_LIMIT),
            params.offset.unwrap_or(0),
            true,
        )?;
        let pp = store
            .list_units_for_job(job.id, 0, 0, false)?
            .into_iter()
            .find(|u| u.is_post_processing());
        (units, pp)
    };

    let summaries: Vec<UnitSummary> = units
        .iter()
        .map(|u| UnitSummary::from_unit(u, label_field.as_deref()))
        .collect();
    let pp_summary =
        post_processing_unit.map(|u| UnitSummary::from_unit(&u, label_field.as_deref()));

    Ok(Json(serde_json::json!({
        "units": summaries,
        "post_processing_unit": pp_summary,
    })))
}

pub async fn unit_detail(
    State(state): State<AppState>,
    Path((id, uid)): Path<(String, String)>,
) -> Result<Json<drover_core::WorkUnit>, ApiError> {
    let job = load_job(&state, &id)?;
    let unit = state
        .store
        .lock()
        .get_work_unit(&uid)?
        .filter(|u| u.job_id == job.id)
        .ok_or_else(|| ApiError::unit_not_found(&uid))?;
    Ok(Json(unit))
}

/// Active units with their latest conversation event.
pub async fn live_units(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = load_job(&state, &id)?;
    let label_field = job.unit_label_field().map(str::to_string);

    let units = state.store.lock().list_units_for_job(job.id, 0, 0, false)?;
    let live: Vec<LiveUnit> = units
        .iter()
        .filter(|u| u.status.is_held())
        .map(|u| LiveUnit::from_unit(u, label_field.as_deref()))
        .collect();

    Ok(Json(serde_json::json!({ "units": live })))
}

pub async fn stats(
    State(state): State<AppState>,
) -> Result<Json<drover_store::StoreStats>, ApiError> {
    Ok(Json(state.store.lock().stats()?))
}
