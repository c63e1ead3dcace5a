//! V1 API routes for Mediascribe.

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::{handlers, AppState};

/// V1 API prefix.
pub const V1_PREFIX: &str = "/api/v1";

/// Build the V1 API router.
///
/// All routes are mounted under `/api/v1/`.
///
/// # Endpoints
///
/// ## Jobs
/// - `POST /api/v1/jobs/:id/dispatch` - Dispatch a job (202)
/// - `GET /api/v1/jobs/:id` - Current job status
///
/// ## Bulk operations
/// - `POST /api/v1/bulk` - Submit `{job_ids, type}` (202)
/// - `GET /api/v1/bulk/:id` - Bulk progress
///
/// ## Maintenance
/// - `POST /api/v1/maintenance/clear-stuck` - Delete all processing records
/// - `GET /api/v1/maintenance/dead-letters` - Jobs the monitor gave up on
///
/// ## System
/// - `GET /api/v1/stats` - Queue, worker and channel statistics
pub fn v1_router() -> Router<AppState> {
    Router::new()
        // Job endpoints
        .route("/jobs/:id", get(handlers::get_job_status))
        .route("/jobs/:id/dispatch", post(handlers::dispatch_job))
        // Bulk endpoints
        .route("/bulk", post(handlers::submit_bulk))
        .route("/bulk/:id", get(handlers::get_bulk_status))
        // Maintenance
        .route("/maintenance/clear-stuck", post(handlers::clear_stuck))
        .route("/maintenance/dead-letters", get(handlers::dead_letters))
        // Stats
        .route("/stats", get(handlers::system_stats))
}

/// V1 API route constants for use in clients and documentation.
pub mod paths {
    pub const JOB: &str = "/api/v1/jobs/:id";
    pub const JOB_DISPATCH: &str = "/api/v1/jobs/:id/dispatch";

    pub const BULK: &str = "/api/v1/bulk";
    pub const BULK_STATUS: &str = "/api/v1/bulk/:id";

    pub const CLEAR_STUCK: &str = "/api/v1/maintenance/clear-stuck";
    pub const DEAD_LETTERS: &str = "/api/v1/maintenance/dead-letters";

    pub const STATS: &str = "/api/v1/stats";
}
