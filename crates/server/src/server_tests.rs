// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use drover_core::test_support::{payload_of, sample_conversation};
use drover_core::{Job, UnitStatus, WorkUnit, WorkerRecord, POST_PROCESSING_UNIT_TYPE};
use drover_engine::{shared_store, EngineEnv, Orchestrator, TemplateSynthesizer};
use drover_runner::FakeRunner;
use drover_store::Store;
use http_body_util::BodyExt;
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct Seed {
    _dir: TempDir,
    store: SharedStoreAlias,
    job: Job,
    done_unit: WorkUnit,
    live_unit: WorkUnit,
    failed_unit: WorkUnit,
}

type SharedStoreAlias = drover_engine::SharedStore;

fn seed() -> Seed {
    let dir = TempDir::new().unwrap();
    let store = shared_store(Store::open(dir.path().join("db")).unwrap());

    let mut job = Job::builder().total_units(3).completed_units(1).failed_units(1).build();
    job.metadata.insert(
        drover_core::META_UNIT_LABEL_FIELD.to_string(),
        serde_json::json!("file_path"),
    );
    assert!(store.lock().create_job(job.clone()).unwrap());

    let mut done_unit = WorkUnit::builder()
        .job_id(job.id)
        .sequence(0u64)
        .payload(payload_of(&[("file_path", "/done.txt")]))
        .build();
    assert!(store.lock().create_work_unit(done_unit.clone()).unwrap());
    done_unit.conversation = sample_conversation("sess-done", false, 0.02);
    done_unit.session_id = Some("sess-done".into());
    done_unit.cost_usd = 0.02;
    done_unit.complete(2_000_000);
    assert!(store.lock().update_work_unit(done_unit.clone()).unwrap());

    let worker = WorkerRecord::new(job.id, done_unit.id, std::process::id(), 1_000_000);
    assert!(store.lock().upsert_worker(worker.clone()).unwrap());

    let mut live_unit = WorkUnit::builder()
        .job_id(job.id)
        .sequence(1u64)
        .payload(payload_of(&[("file_path", "/live.txt")]))
        .build();
    assert!(store.lock().create_work_unit(live_unit.clone()).unwrap());
    live_unit.assign(worker.id, "prompt".into(), 1_500_000);
    live_unit.begin(1_500_100);
    assert!(store.lock().update_work_unit(live_unit.clone()).unwrap());
    let events = sample_conversation("sess-live", false, 0.0);
    assert!(store.lock().append_unit_event(live_unit.id, events[0].clone()).unwrap());
    assert!(store.lock().append_unit_event(live_unit.id, events[1].clone()).unwrap());

    let mut failed_unit = WorkUnit::builder()
        .job_id(job.id)
        .sequence(2u64)
        .payload(payload_of(&[("file_path", "/failed.txt")]))
        .build();
    assert!(store.lock().create_work_unit(failed_unit.clone()).unwrap());
    failed_unit.fail("agent error: broke", 1_600_000);
    assert!(store.lock().update_work_unit(failed_unit.clone()).unwrap());

    let pp = WorkUnit::builder()
        .job_id(job.id)
        .unit_type(POST_PROCESSING_UNIT_TYPE)
        .sequence(3u64)
        .build();
    assert!(store.lock().create_work_unit(pp).unwrap());

    Seed { _dir: dir, store, job, done_unit, live_unit, failed_unit }
}

fn read_router(seed: &Seed) -> axum::Router {
    dashboard_router(seed.store.clone())
}

fn control_router(seed: &Seed) -> axum::Router {
    let env = EngineEnv {
        max_workers: 2,
        max_retries: 3,
        storage_path: seed._dir.path().to_path_buf(),
        dashboard_port: 0,
        skip_test: false,
        unit_timeout: Duration::from_secs(5),
        agent_binary: "unused".into(),
    };
    let orchestrator = Orchestrator::new(
        seed.store.clone(),
        std::sync::Arc::new(FakeRunner::new()),
        std::sync::Arc::new(TemplateSynthesizer),
        env,
    );
    api_router(AppState::with_control(seed.store.clone(), std::sync::Arc::new(orchestrator)))
}

async fn request(router: axum::Router, method: &str, path: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn list_jobs_returns_summaries_with_status_filter() {
    let seed = seed();

    let (status, body) = request(read_router(&seed), "GET", "/api/jobs").await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], serde_json::json!(seed.job.id.as_str()));
    assert_eq!(jobs[0]["completed_units"], serde_json::json!(1));

    let (_, filtered) = request(read_router(&seed), "GET", "/api/jobs?status=completed").await;
    assert!(filtered["jobs"].as_array().unwrap().is_empty());

    let (_, filtered) = request(read_router(&seed), "GET", "/api/jobs?status=created").await;
    assert_eq!(filtered["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn job_detail_includes_workers_and_unit_stats() {
    let seed = seed();
    let path = format!("/api/jobs/{}", seed.job.id);
    let (status, body) = request(read_router(&seed), "GET", &path).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], serde_json::json!(seed.job.name));
    assert_eq!(body["workers"].as_array().unwrap().len(), 1);
    assert_eq!(body["unit_stats"]["completed"], serde_json::json!(1));
    assert_eq!(body["unit_stats"]["processing"], serde_json::json!(1));
    assert_eq!(body["unit_stats"]["failed"], serde_json::json!(1));
    assert!(!body["recent_units"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn units_endpoint_splits_out_the_post_processing_unit() {
    let seed = seed();
    let path = format!("/api/jobs/{}/units", seed.job.id);
    let (status, body) = request(read_router(&seed), "GET", &path).await;

    assert_eq!(status, StatusCode::OK);
    let units = body["units"].as_array().unwrap();
    assert_eq!(units.len(), 3, "post-processing unit is not in the main list");
    assert_eq!(
        body["post_processing_unit"]["unit_type"],
        serde_json::json!(POST_PROCESSING_UNIT_TYPE)
    );
    // Labels come from the job's configured label field.
    assert_eq!(units[0]["label"], serde_json::json!("/done.txt"));
}

#[tokio::test]
async fn unit_detail_includes_the_conversation() {
    let seed = seed();
    let path = format!("/api/jobs/{}/units/{}", seed.job.id, seed.done_unit.id);
    let (status, body) = request(read_router(&seed), "GET", &path).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], serde_json::json!("sess-done"));
    assert_eq!(body["conversation"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn live_endpoint_shows_only_held_units_with_latest_event() {
    let seed = seed();
    let path = format!("/api/jobs/{}/live", seed.job.id);
    let (status, body) = request(read_router(&seed), "GET", &path).await;

    assert_eq!(status, StatusCode::OK);
    let live = body["units"].as_array().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0]["id"], serde_json::json!(seed.live_unit.id.as_str()));
    assert_eq!(live[0]["latest_activity"], serde_json::json!("Working on it."));
    assert!(live[0]["latest_event"].is_object());
}

#[tokio::test]
async fn stats_aggregates() {
    let seed = seed();
    let (status, body) = request(read_router(&seed), "GET", "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs_total"], serde_json::json!(1));
    assert_eq!(body["units_total"], serde_json::json!(4));
}

#[tokio::test]
async fn unknown_job_is_404_with_code() {
    let seed = seed();
    let (status, body) = request(read_router(&seed), "GET", "/api/jobs/job-missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], serde_json::json!("JOB_NOT_FOUND"));
}

#[tokio::test]
async fn unknown_unit_is_404_with_code() {
    let seed = seed();
    let path = format!("/api/jobs/{}/units/unt-missing", seed.job.id);
    let (status, body) = request(read_router(&seed), "GET", &path).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], serde_json::json!("UNIT_NOT_FOUND"));
}

#[tokio::test]
async fn command_routes_refuse_without_control() {
    let seed = seed();
    let router = api_router(AppState::read_only(seed.store.clone()));
    let path = format!("/api/jobs/{}/kill", seed.job.id);
    let (status, body) = request(router, "POST", &path).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], serde_json::json!("READ_ONLY"));
}

#[tokio::test]
async fn dashboard_router_has_no_command_routes() {
    let seed = seed();
    let path = format!("/api/jobs/{}/kill", seed.job.id);
    let (status, _) = request(read_router(&seed), "POST", &path).await;
    assert_ne!(status, StatusCode::OK);
}

#[tokio::test]
async fn restart_unit_command_resets_a_failed_unit() {
    let seed = seed();
    let path = format!(
        "/api/jobs/{}/units/{}/restart",
        seed.job.id, seed.failed_unit.id
    );
    let (status, body) = request(control_router(&seed), "POST", &path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], serde_json::json!(true));

    let unit = seed
        .store
        .lock()
        .get_work_unit(seed.failed_unit.id.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(unit.status, UnitStatus::Pending);
    assert!(unit.error.is_none());
}

#[tokio::test]
async fn kill_job_without_supervisor_reports_not_signaled() {
    let seed = seed();
    let path = format!("/api/jobs/{}/kill", seed.job.id);
    let (status, body) = request(control_router(&seed), "POST", &path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["signaled"], serde_json::json!(false));
}
