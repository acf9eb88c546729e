// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-server: the thin HTTP read/command layer.
//!
//! Serves the dashboard and MCP tools. Reads go straight to the store;
//! commands go through the orchestrator. In dashboard mode the command
//! routes are absent entirely.

mod commands;
mod dto;
mod error;
mod queries;

pub use dto::{JobDetail, JobSummary, LiveUnit, UnitSummary};
pub use error::{ApiError, ErrorCode};

use axum::routing::{get, post};
use axum::Router;
use drover_engine::{Orchestrator, SharedStore};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    /// Present in `serve` mode; `None` makes the server read-only.
    pub control: Option<Arc<Orchestrator>>,
}

impl AppState {
    pub fn read_only(store: SharedStore) -> Self {
        Self { store, control: None }
    }

    pub fn with_control(store: SharedStore, orchestrator: Arc<Orchestrator>) -> Self {
        Self { store, control: Some(orchestrator) }
    }
}

/// The full API: read routes plus command routes (command routes answer
/// `READ_ONLY` when the state has no orchestrator).
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/jobs", get(queries::list_jobs))
        .route("/api/jobs/{id}", get(queries::job_detail))
        .route("/api/jobs/{id}/units", get(queries::list_units))
        .route("/api/jobs/{id}/units/{uid}", get(queries::unit_detail))
        .route("/api/jobs/{id}/live", get(queries::live_units))
        .route("/api/stats", get(queries::stats))
        .route("/api/jobs/{id}/bypass", post(commands::bypass))
        .route("/api/jobs/{id}/kill", post(commands::kill_job))
        .route("/api/jobs/{id}/restart", post(commands::restart_job))
        .route("/api/jobs/{id}/units/{uid}/kill", post(commands::kill_unit))
        .route("/api/jobs/{id}/units/{uid}/restart", post(commands::restart_unit))
        .with_state(state)
}

/// Dashboard mode: the read routes only.
pub fn dashboard_router(store: SharedStore) -> Router {
    Router::new()
        .route("/api/jobs", get(queries::list_jobs))
        .route("/api/jobs/{id}", get(queries::job_detail))
        .route("/api/jobs/{id}/units", get(queries::list_units))
        .route("/api/jobs/{id}/units/{uid}", get(queries::unit_detail))
        .route("/api/jobs/{id}/live", get(queries::live_units))
        .route("/api/stats", get(queries::stats))
        .with_state(AppState::read_only(store))
}

/// Bind and serve until the process is told to stop.
pub async fn serve(router: Router, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http api listening");
    axum::serve(listener, router).await
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
