//! Router tests for the HTTP API.
//!
//! Tests cover:
//! - Health and metrics endpoints
//! - Job dispatch and status polling
//! - Bulk submission and polling
//! - Maintenance endpoints
//! - Error responses and status codes

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use mediascribe_core::api::{build_router, AppState};
use mediascribe_core::config::JobsConfig;
use mediascribe_core::jobs::{
    InMemoryStore, JobId, JobProcessor, JobQueue, ProcessError, ProgressReporter,
};
use mediascribe_core::orchestrator::Orchestrator;
use mediascribe_core::telemetry::MetricsRegistry;

// ============================================================================
// Test Fixtures
// ============================================================================

struct KnownSources(Vec<&'static str>);

#[async_trait]
impl JobProcessor for KnownSources {
    async fn has_video_source(&self, job_id: &JobId) -> bool {
        self.0.contains(&job_id.as_str())
    }

    async fn process_job(
        &self,
        _job_id: &JobId,
        _progress: &ProgressReporter,
    ) -> Result<String, ProcessError> {
        Ok("Transcription completed (0 characters)".to_string())
    }
}

fn app() -> (axum::Router, Arc<Orchestrator>) {
    let orchestrator = Arc::new(
        Orchestrator::new(
            JobsConfig {
                monitor_enabled: false,
                ..JobsConfig::default()
            },
            "http://127.0.0.1:1",
            Arc::new(InMemoryStore::new()),
            Arc::new(JobQueue::in_memory()),
            Arc::new(KnownSources(vec!["lecture-1", "lecture-2"])),
        )
        .unwrap(),
    );
    let state = AppState {
        orchestrator: orchestrator.clone(),
        metrics: MetricsRegistry::disabled(),
    };
    (build_router(state), orchestrator)
}

async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

// ============================================================================
// Service Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let (app, _) = app();
    let (status, body) = send(app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["store"]["backend"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint_returns_text() {
    let (app, _) = app();
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

// ============================================================================
// Job Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_dispatch_returns_accepted_receipt() {
    let (app, orchestrator) = app();
    let (status, body) = send(app, "POST", "/api/v1/jobs/lecture-1/dispatch", None).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["job_id"], "lecture-1");
    assert_eq!(body["data"]["accepted"], true);
    assert_eq!(body["data"]["channels_fired"], json!(["queue"]));

    let polled = orchestrator.poll_status("lecture-1").await.unwrap();
    assert_eq!(polled.message, "Initializing...");
}

#[tokio::test]
async fn test_dispatch_without_source_is_rejected_receipt() {
    let (app, _) = app();
    let (status, body) = send(app.clone(), "POST", "/api/v1/jobs/unknown-video/dispatch", None).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["accepted"], false);

    let (_, body) = send(app, "GET", "/api/v1/jobs/unknown-video", None).await;
    assert_eq!(body["data"]["state"], "failed");
}

#[tokio::test]
async fn test_status_of_unknown_job() {
    let (app, _) = app();
    let (status, body) = send(app, "GET", "/api/v1/jobs/nothing-here", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "unknown");
}

#[tokio::test]
async fn test_invalid_job_id_is_unprocessable() {
    let (app, _) = app();
    let (status, body) = send(app, "POST", "/api/v1/jobs/bad%20id/dispatch", None).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "INVALID_JOB_ID");
}

#[tokio::test]
async fn test_internal_run_accepts_immediately() {
    let (app, _) = app();
    let (status, body) = send(app, "POST", "/internal/jobs/lecture-1/run", None).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["job_id"], "lecture-1");
}

// ============================================================================
// Bulk Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_submit_and_poll_bulk() {
    let (app, _) = app();
    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/v1/bulk",
        Some(json!({ "job_ids": ["lecture-1", "lecture-2"], "type": "transcribe" })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let bulk_id = body["data"]["bulk_id"].as_str().unwrap().to_string();
    assert!(bulk_id.starts_with("bulk_"));

    let (status, body) = send(app, "GET", &format!("/api/v1/bulk/{}", bulk_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["type"], "transcribe");
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["status"], "processing");
}

#[tokio::test]
async fn test_empty_bulk_is_rejected() {
    let (app, _) = app();
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/bulk",
        Some(json!({ "job_ids": [], "type": "download" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_bulk_is_not_found() {
    let (app, _) = app();
    let (status, body) = send(app, "GET", "/api/v1/bulk/bulk_nope", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "BULK_NOT_FOUND");
}

// ============================================================================
// Maintenance Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_clear_stuck_reports_count() {
    let (app, orchestrator) = app();
    orchestrator.dispatch_single("lecture-1").await.unwrap();
    orchestrator.dispatch_single("lecture-2").await.unwrap();

    let (status, body) = send(app, "POST", "/api/v1/maintenance/clear-stuck", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cleared"], 2);
}

#[tokio::test]
async fn test_stats_lists_channels() {
    let (app, _) = app();
    let (status, body) = send(app, "GET", "/api/v1/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["channels"], json!(["queue"]));
    assert_eq!(body["data"]["worker_running"], false);
}
