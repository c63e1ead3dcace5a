//! API request handlers with proper error propagation.
//!
//! All handlers return `Result<impl IntoResponse, MediascribeError>` so that
//! errors are converted to HTTP status codes via the `IntoResponse`
//! implementation on `MediascribeError`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState};
use crate::error::MediascribeError;
use crate::jobs::BulkKind;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.orchestrator.ping().await;
    let healthy = store.is_ok();

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": {
            "backend": state.orchestrator.store().backend_name(),
            "reachable": healthy,
            "error": store.err().map(|e| e.to_string()),
        },
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::success(body)))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn dispatch_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MediascribeError> {
    let receipt = state.orchestrator.dispatch_single(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(receipt))))
}

pub async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MediascribeError> {
    let status = state.orchestrator.poll_status(&id).await?;
    Ok(Json(ApiResponse::success(status)))
}

/// Self-call target. Accepts immediately and runs in the background.
pub async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MediascribeError> {
    state.orchestrator.run_now(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(serde_json::json!({ "job_id": id }))),
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bulk Handlers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct SubmitBulkRequest {
    pub job_ids: Vec<String>,
    #[serde(rename = "type")]
    pub kind: BulkKind,
}

#[derive(Debug, Serialize)]
pub struct SubmitBulkResponse {
    pub bulk_id: String,
}

pub async fn submit_bulk(
    State(state): State<AppState>,
    Json(request): Json<SubmitBulkRequest>,
) -> Result<impl IntoResponse, MediascribeError> {
    let bulk_id = state
        .orchestrator
        .submit_bulk(request.job_ids, request.kind)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(SubmitBulkResponse {
            bulk_id: bulk_id.to_string(),
        })),
    ))
}

pub async fn get_bulk_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MediascribeError> {
    let bulk = state.orchestrator.poll_bulk(&id).await?;
    Ok(Json(ApiResponse::success(bulk)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Maintenance
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn clear_stuck(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, MediascribeError> {
    let cleared = state.orchestrator.clear_all_stuck().await?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "cleared": cleared }))))
}

pub async fn system_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, MediascribeError> {
    let stats = state.orchestrator.stats().await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn dead_letters(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.orchestrator.queue().dead_letters().await))
}
