//! Job definitions and traits.
//!
//! This module provides the core abstractions shared by the orchestration layer:
//!
//! - **JobId / BulkId**: Validated identifiers
//! - **JobStatus**: The per-job record polled by clients
//! - **BulkOperation**: The aggregate record for a batch of jobs
//! - **JobProcessor**: The opaque "process one job" seam, with progress reporting
//! - **RetryPolicy**: Configuration for retry behavior with backoff strategies

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{MediascribeError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum length of a job id.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Caller-supplied identifier for a job (for example a chapter id).
///
/// Ids are restricted to ASCII alphanumerics plus `-`, `_` and `.` so they
/// can be embedded in store keys and URL paths unescaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Parse and validate a job id.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(MediascribeError::invalid_job_id(&raw, "must not be empty"));
        }
        if raw.len() > MAX_JOB_ID_LEN {
            return Err(MediascribeError::invalid_job_id(
                &raw,
                "must be at most 128 characters",
            ));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(MediascribeError::invalid_job_id(
                &raw,
                &format!("contains invalid character {:?}", bad),
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = MediascribeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::str::FromStr for JobId {
    type Err = MediascribeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Identifier of a bulk operation, `bulk_<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BulkId(String);

impl BulkId {
    /// Generate a new random bulk id.
    pub fn new() -> Self {
        Self(format!("bulk_{}", Uuid::new_v4().simple()))
    }

    /// Wrap an id received from a caller. Unknown ids simply poll as not found.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BulkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BulkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// State of a job as seen by polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// No record exists
    Unknown,
    /// Dispatched or executing
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The status record kept for one job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    /// Human-readable description of the current step
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Bulk operation this job belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_id: Option<BulkId>,
    /// Runner executions that acquired the lease
    #[serde(default)]
    pub attempt: u32,
}

impl JobStatus {
    /// The status reported for an id with no record.
    pub fn unknown(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::Unknown,
            message: "No status recorded".to_string(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            bulk_id: None,
            attempt: 0,
        }
    }

    /// The status written by the dispatcher before any channel fires.
    pub fn initializing(job_id: JobId, bulk_id: Option<BulkId>) -> Self {
        Self {
            job_id,
            state: JobState::Processing,
            message: "Initializing...".to_string(),
            started_at: Some(Utc::now()),
            completed_at: None,
            failed_at: None,
            bulk_id,
            attempt: 0,
        }
    }

    /// Mark as started by a runner that holds the lease.
    pub fn mark_started(&mut self) {
        self.state = JobState::Processing;
        self.message = "Starting...".to_string();
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.failed_at = None;
        self.attempt += 1;
    }

    /// Mark as completed.
    pub fn mark_completed(&mut self, message: impl Into<String>) {
        self.state = JobState::Completed;
        self.message = message.into();
        self.completed_at = Some(Utc::now());
        self.failed_at = None;
    }

    /// Mark as failed. The message is stored verbatim.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.state = JobState::Failed;
        self.message = message.into();
        self.failed_at = Some(Utc::now());
        self.completed_at = None;
    }

    /// Time since `started_at`, if the job has started.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at
            .and_then(|started| now.signed_duration_since(started).to_std().ok())
    }

    /// A processing record older than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.state == JobState::Processing
            && self.age(now).map_or(true, |age| age >= threshold)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Bulk Operations
// ═══════════════════════════════════════════════════════════════════════════════

/// How a bulk operation schedules its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkKind {
    /// One member at a time, each chained after the previous one finishes
    Download,
    /// All members dispatched at once
    Transcribe,
}

impl BulkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Transcribe => "transcribe",
        }
    }
}

impl fmt::Display for BulkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BulkKind {
    type Err = MediascribeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "download" => Ok(Self::Download),
            "transcribe" => Ok(Self::Transcribe),
            other => Err(MediascribeError::validation(format!(
                "Unknown bulk operation type '{}' (expected download or transcribe)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Processing,
    Completed,
}

/// Aggregate record for a batch of jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub bulk_id: BulkId,
    #[serde(rename = "type")]
    pub kind: BulkKind,
    /// Members in submission order, without duplicates
    pub job_ids: Vec<JobId>,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Cursor into `job_ids` (download variant)
    pub current_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<JobId>,
    pub status: BulkStatus,
    /// Failure message per member, append-only
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
    /// Members already counted
    #[serde(default)]
    pub resolved: BTreeSet<JobId>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkOperation {
    /// Create a bulk record, dropping duplicate ids (first occurrence wins).
    pub fn new(kind: BulkKind, job_ids: Vec<JobId>) -> Self {
        let mut seen = HashSet::new();
        let job_ids: Vec<JobId> = job_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Self {
            bulk_id: BulkId::new(),
            kind,
            total: job_ids.len(),
            current_job_id: job_ids.first().cloned(),
            job_ids,
            completed: 0,
            failed: 0,
            current_index: 0,
            status: BulkStatus::Processing,
            errors: BTreeMap::new(),
            resolved: BTreeSet::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == BulkStatus::Completed
    }

    pub fn is_member(&self, job_id: &JobId) -> bool {
        self.job_ids.contains(job_id)
    }

    /// Count one member outcome. Returns `false` when the member was
    /// already resolved or does not belong to this operation.
    pub fn record(&mut self, job_id: &JobId, success: bool, message: &str) -> bool {
        if !self.is_member(job_id) || self.resolved.contains(job_id) {
            return false;
        }

        self.resolved.insert(job_id.clone());
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
            self.errors
                .entry(job_id.to_string())
                .or_insert_with(|| message.to_string());
        }

        if self.completed + self.failed >= self.total {
            self.status = BulkStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Advance the download cursor past resolved members and return the
    /// member to run next, if any.
    pub fn advance(&mut self) -> Option<JobId> {
        if self.kind != BulkKind::Download || self.is_complete() {
            return None;
        }

        while self.current_index < self.job_ids.len()
            && self.resolved.contains(&self.job_ids[self.current_index])
        {
            self.current_index += 1;
        }

        let next = self.job_ids.get(self.current_index).cloned();
        self.current_job_id = next.clone();
        next
    }

    /// Percentage of members resolved.
    pub fn progress_percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (((self.completed + self.failed) * 100) / self.total).min(100) as u8
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Processing Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure of one job's processing, carried into its `failed` status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ConversionFailed(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("{0}")]
    UploadFailed(String),

    #[error("{0}")]
    PersistenceFailed(String),

    /// The processor panicked or was aborted
    #[error("{0}")]
    Internal(String),
}

impl ProcessError {
    /// Stable tag used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ConversionFailed(_) => "conversion_failed",
            Self::ValidationFailed(_) => "validation_failed",
            Self::UploadFailed(_) => "upload_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::Internal(_) => "internal",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Progress Reporting
// ═══════════════════════════════════════════════════════════════════════════════

/// Handed to a [`JobProcessor`] so it can publish its current step.
///
/// Messages are forwarded to the runner, which writes them to the job's
/// status and renews the job lease.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    sender: tokio::sync::mpsc::Sender<String>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, sender: tokio::sync::mpsc::Sender<String>) -> Self {
        Self { job_id, sender }
    }

    /// A reporter whose messages go nowhere.
    pub fn detached(job_id: JobId) -> Self {
        let (sender, _) = tokio::sync::mpsc::channel(1);
        Self { job_id, sender }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Report the step the job is now on.
    pub async fn report(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(job_id = %self.job_id, progress = %message, "Job progress");
        let _ = self.sender.send(message).await;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Processor Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The work performed for one job id.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    /// Whether a source video exists for this job.
    async fn has_video_source(&self, job_id: &JobId) -> bool;

    /// Run the job to completion, returning a success message.
    async fn process_job(
        &self,
        job_id: &JobId,
        progress: &ProgressReporter,
    ) -> std::result::Result<String, ProcessError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay_ms: u64 },
    /// Exponential increase in delay (initial * multiplier^attempt)
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    },
    /// Exponential with random jitter
    ExponentialWithJitter {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
        jitter_factor: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
            } => {
                let delay = (*initial_delay_ms as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_delay_ms as f64) as u64
            }
            Self::ExponentialWithJitter {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
                jitter_factor,
            } => {
                let base_delay = (*initial_delay_ms as f64) * multiplier.powi(attempt as i32);
                let capped_delay = base_delay.min(*max_delay_ms as f64);
                let jitter_range = capped_delay * jitter_factor;
                let jitter = (rand_simple() * 2.0 - 1.0) * jitter_range;
                (capped_delay + jitter).max(1.0) as u64
            }
        };

        Duration::from_millis(ms)
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Create an exponential backoff with jitter.
    pub fn exponential_with_jitter() -> Self {
        Self::ExponentialWithJitter {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Simple pseudo-random number generator for jitter (0.0 to 1.0).
fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    );
    (hasher.finish() as f64) / (u64::MAX as f64)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry behaviour for calls to external services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with a specific number of attempts.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check if another attempt should follow attempt number `attempt` (1-indexed).
    pub fn should_retry(&self, attempt: u32, retryable: bool) -> bool {
        retryable && attempt < self.max_attempts
    }

    /// Get the delay before the attempt following `attempt` (1-indexed).
    pub fn next_retry_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt.saturating_sub(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    #[test]
    fn test_job_id_validation() {
        assert!(JobId::parse("chapter-42").is_ok());
        assert!(JobId::parse("lesson_3.part.1").is_ok());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("has space").is_err());
        assert!(JobId::parse("status:1").is_err());
        assert!(JobId::parse("a".repeat(MAX_JOB_ID_LEN)).is_ok());
        assert!(JobId::parse("a".repeat(MAX_JOB_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_job_id_deserialize_validates() {
        let ok: std::result::Result<JobId, _> = serde_json::from_str("\"c-1\"");
        assert!(ok.is_ok());
        let bad: std::result::Result<JobId, _> = serde_json::from_str("\"c 1\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_bulk_id_format() {
        let bulk_id = BulkId::new();
        assert!(bulk_id.as_str().starts_with("bulk_"));
        assert_eq!(bulk_id.as_str().len(), "bulk_".len() + 32);
        assert_ne!(bulk_id, BulkId::new());
    }

    #[test]
    fn test_job_state() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(!JobState::Unknown.is_terminal());
        assert_eq!(
            serde_json::to_string(&JobState::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn test_status_transitions() {
        let mut status = JobStatus::initializing(id("c-1"), None);
        assert_eq!(status.state, JobState::Processing);
        assert_eq!(status.message, "Initializing...");
        assert_eq!(status.attempt, 0);

        status.mark_started();
        assert_eq!(status.attempt, 1);
        assert_eq!(status.message, "Starting...");

        status.mark_failed("Failed: boom (took 1s)");
        assert_eq!(status.state, JobState::Failed);
        assert!(status.failed_at.is_some());
        assert!(status.completed_at.is_none());
    }

    #[test]
    fn test_status_staleness() {
        let mut status = JobStatus::initializing(id("c-1"), None);
        let now = Utc::now();
        assert!(!status.is_stale(now, Duration::from_secs(600)));

        status.started_at = Some(now - chrono::Duration::minutes(11));
        assert!(status.is_stale(now, Duration::from_secs(600)));

        status.mark_completed("done");
        assert!(!status.is_stale(now, Duration::from_secs(600)));
    }

    #[test]
    fn test_bulk_dedupes_members() {
        let bulk = BulkOperation::new(
            BulkKind::Transcribe,
            vec![id("a"), id("b"), id("a"), id("c")],
        );
        assert_eq!(bulk.total, 3);
        assert_eq!(bulk.job_ids, vec![id("a"), id("b"), id("c")]);
        assert_eq!(bulk.status, BulkStatus::Processing);
    }

    #[test]
    fn test_bulk_record_counts_once() {
        let mut bulk = BulkOperation::new(BulkKind::Transcribe, vec![id("a"), id("b")]);

        assert!(bulk.record(&id("a"), false, "Audio file validation failed: empty"));
        assert!(!bulk.record(&id("a"), true, "again"));
        assert!(!bulk.record(&id("zzz"), true, "stranger"));
        assert_eq!(bulk.failed, 1);
        assert_eq!(bulk.completed, 0);
        assert!(!bulk.is_complete());

        assert!(bulk.record(&id("b"), true, ""));
        assert!(bulk.is_complete());
        assert!(bulk.completed_at.is_some());
        assert_eq!(bulk.completed + bulk.failed, bulk.total);
        assert_eq!(
            bulk.errors.get("a").map(String::as_str),
            Some("Audio file validation failed: empty")
        );
    }

    #[test]
    fn test_bulk_advance_download() {
        let mut bulk = BulkOperation::new(BulkKind::Download, vec![id("a"), id("b"), id("c")]);
        assert_eq!(bulk.current_job_id, Some(id("a")));

        bulk.record(&id("a"), true, "");
        assert_eq!(bulk.advance(), Some(id("b")));
        assert_eq!(bulk.current_index, 1);

        bulk.record(&id("b"), false, "no source");
        assert_eq!(bulk.advance(), Some(id("c")));

        bulk.record(&id("c"), true, "");
        assert_eq!(bulk.advance(), None);
        assert_eq!(bulk.progress_percent(), 100);
    }

    #[test]
    fn test_bulk_serializes_kind_as_type() {
        let bulk = BulkOperation::new(BulkKind::Download, vec![id("a")]);
        let json = serde_json::to_value(&bulk).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["status"], "processing");
    }

    #[test]
    fn test_process_error_kind() {
        let error = ProcessError::ValidationFailed("Audio file validation failed: empty".into());
        assert_eq!(error.kind(), "validation_failed");
        assert_eq!(error.to_string(), "Audio file validation failed: empty");
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = BackoffStrategy::Exponential {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let backoff = BackoffStrategy::exponential_with_jitter();
        let delay = backoff.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(800));
        assert!(delay <= Duration::from_millis(1_200));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::with_attempts(3);
        assert!(policy.should_retry(1, true));
        assert!(policy.should_retry(2, true));
        assert!(!policy.should_retry(3, true));
        assert!(!policy.should_retry(1, false));
        assert!(!RetryPolicy::no_retry().should_retry(1, true));
    }

    #[tokio::test]
    async fn test_progress_reporter_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let reporter = ProgressReporter::new(id("c-1"), tx);
        reporter.report("Converting to audio...").await;
        assert_eq!(rx.recv().await.as_deref(), Some("Converting to audio..."));

        ProgressReporter::detached(id("c-2")).report("ignored").await;
    }
}
