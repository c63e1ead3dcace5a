#![allow(clippy::result_large_err)]
//! # Mediascribe Core
//!
//! Background orchestration for video transcription jobs.
//!
//! ## Architecture
//!
//! - **Jobs**: status store, dispatcher, delivery channels, lease-guarded runner
//! - **Bulk**: parallel and chained batches with lossless outcome counting
//! - **Monitor**: redelivery and dead-lettering of abandoned jobs
//! - **Pipeline**: ffmpeg conversion, HTTP transcription, WebVTT subtitles
//! - **API**: axum endpoints for dispatch, polling and maintenance
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod pipeline;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, MediascribeError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{
        ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, MediascribeError, Result,
    };
    pub use crate::jobs::{
        BulkId, BulkKind, BulkOperation, BulkStatus, DispatchReceipt, JobId, JobProcessor,
        JobState, JobStatus, ProcessError, ProgressReporter, RunOutcome, SkipReason,
    };
    pub use crate::orchestrator::{Orchestrator, OrchestratorStats};
    pub use crate::pipeline::{MediaPipeline, Transcript};
    pub use crate::telemetry::{init_telemetry, JobMetrics, MetricsRegistry};
}
