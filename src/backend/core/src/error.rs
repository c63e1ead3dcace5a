//! Error handling for Mediascribe Core.
//!
//! This module provides:
//! - A service-level error type with codes, context and chaining
//! - HTTP status code mapping for API responses
//! - Machine-readable error codes for clients and the CLI
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration and an error counter metric
//!
//! Failures of the media pipeline itself are modelled separately by
//! [`crate::jobs::ProcessError`]; those never leave the job runner and are
//! turned into `failed` job statuses instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mediascribe_core::error::{ErrorContext, ErrorCode, Result};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("settings.toml").with_error_code(ErrorCode::ConfigurationError)
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Mediascribe operations.
pub type Result<T> = std::result::Result<T, MediascribeError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job Errors (1000-1099)
    JobNotFound,
    InvalidJobId,
    DispatchUnreachable,
    LeaseConflict,

    // Bulk Errors (1100-1199)
    BulkNotFound,

    // Store Errors (2000-2099)
    StoreError,
    StoreConnectionFailed,

    // Queue Errors (2100-2199)
    QueueError,
    QueueClosed,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // External Service Errors (3000-3099)
    TranscriptionApiError,
    TranscriptionRateLimited,
    ExternalServiceError,
    NetworkError,
    Timeout,

    // Validation Errors (4100-4199)
    ValidationError,
    InvalidInput,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::JobNotFound => 1000,
            Self::InvalidJobId => 1001,
            Self::DispatchUnreachable => 1002,
            Self::LeaseConflict => 1003,

            Self::BulkNotFound => 1100,

            Self::StoreError => 2000,
            Self::StoreConnectionFailed => 2001,

            Self::QueueError => 2100,
            Self::QueueClosed => 2101,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::TranscriptionApiError => 3000,
            Self::TranscriptionRateLimited => 3001,
            Self::ExternalServiceError => 3002,
            Self::NetworkError => 3003,
            Self::Timeout => 3004,

            Self::ValidationError => 4100,
            Self::InvalidInput => 4101,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::JobNotFound | Self::BulkNotFound => StatusCode::NOT_FOUND,

            Self::LeaseConflict => StatusCode::CONFLICT,

            Self::InvalidJobId
            | Self::ValidationError
            | Self::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,

            Self::TranscriptionRateLimited => StatusCode::TOO_MANY_REQUESTS,

            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,

            Self::StoreConnectionFailed
            | Self::QueueClosed
            | Self::DispatchUnreachable
            | Self::ExternalServiceError => StatusCode::SERVICE_UNAVAILABLE,

            Self::TranscriptionApiError | Self::NetworkError => StatusCode::BAD_GATEWAY,

            Self::StoreError
            | Self::QueueError
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError
            | Self::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreConnectionFailed
                | Self::StoreError
                | Self::QueueError
                | Self::TranscriptionRateLimited
                | Self::ExternalServiceError
                | Self::NetworkError
                | Self::Timeout
                | Self::DispatchUnreachable
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            1100..=1199 => "bulk",
            2000..=2099 => "store",
            2100..=2199 => "queue",
            2200..=2299 => "serialization",
            3000..=3099 => "external_service",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, unknown ids)
    Low,
    /// Operational issues (rate limits, timeouts, lease conflicts)
    Medium,
    /// System errors (store failures, serialization bugs)
    High,
    /// Errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::JobNotFound
            | ErrorCode::BulkNotFound
            | ErrorCode::InvalidJobId
            | ErrorCode::ValidationError
            | ErrorCode::InvalidInput => Self::Low,

            ErrorCode::LeaseConflict
            | ErrorCode::TranscriptionRateLimited
            | ErrorCode::Timeout
            | ErrorCode::NetworkError => Self::Medium,

            ErrorCode::StoreError
            | ErrorCode::QueueError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::TranscriptionApiError
            | ErrorCode::ExternalServiceError
            | ErrorCode::DispatchUnreachable
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::StoreConnectionFailed
            | ErrorCode::QueueClosed
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (job, bulk operation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.entity_id.is_none()
            && self.retry_after_secs.is_none()
            && self.suggested_action.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Mediascribe Core.
#[derive(Debug)]
pub struct MediascribeError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for MediascribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl std::error::Error for MediascribeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl MediascribeError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "mediascribe_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
///
/// Shares the `success`/`error`/`error_code` fields with
/// [`crate::api::ApiResponse`] so the CLI can decode both with one type.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// User-friendly error message
    pub error: String,

    /// Machine-readable error code
    pub error_code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&MediascribeError> for ErrorResponse {
    fn from(error: &MediascribeError) -> Self {
        Self {
            success: false,
            error: error.user_message.to_string(),
            error_code: error.code,
            numeric_code: error.code.numeric_code(),
            details: if error.details.is_empty() {
                None
            } else {
                Some(error.details.clone())
            },
            timestamp: chrono::Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for MediascribeError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| MediascribeError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| MediascribeError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| MediascribeError::new(ErrorCode::JobNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| MediascribeError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<redis::RedisError> for MediascribeError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::StoreConnectionFailed, "Unable to connect to the job store")
        } else if error.is_timeout() {
            (ErrorCode::StoreError, "Job store operation timed out")
        } else {
            (ErrorCode::StoreError, "A job store error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for MediascribeError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for MediascribeError {
    fn from(error: reqwest::Error) -> Self {
        let (code, user_msg) = if error.is_timeout() {
            (ErrorCode::Timeout, "External service request timed out")
        } else if error.is_connect() {
            (ErrorCode::NetworkError, "Failed to connect to external service")
        } else if let Some(status) = error.status() {
            match status.as_u16() {
                429 => (
                    ErrorCode::TranscriptionRateLimited,
                    "Rate limited by transcription service",
                ),
                401 | 403 => (
                    ErrorCode::TranscriptionApiError,
                    "Authentication failed with transcription service",
                ),
                500..=599 => (
                    ErrorCode::ExternalServiceError,
                    "External service is temporarily unavailable",
                ),
                _ => (
                    ErrorCode::TranscriptionApiError,
                    "External service returned an error",
                ),
            }
        } else {
            (ErrorCode::NetworkError, "Network error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for MediascribeError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::Timeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for MediascribeError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::TimedOut => (ErrorCode::Timeout, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::NetworkError, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for MediascribeError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<MediascribeError>() {
            Ok(inner) => inner,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for MediascribeError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl MediascribeError {
    /// Create an invalid job id error.
    pub fn invalid_job_id(raw: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::InvalidJobId,
            format!("Invalid job id '{}': {}", raw, reason),
        )
        .with_details(ErrorDetails::new().with_entity("job", raw))
    }

    /// Create a job not found error.
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", job_id))
            .with_details(ErrorDetails::new().with_entity("job", job_id))
    }

    /// Create a bulk operation not found error.
    pub fn bulk_not_found(bulk_id: impl Into<String>) -> Self {
        let bulk_id = bulk_id.into();
        Self::new(
            ErrorCode::BulkNotFound,
            format!("Bulk operation not found: {}", bulk_id),
        )
        .with_details(ErrorDetails::new().with_entity("bulk_operation", bulk_id))
    }

    /// Create an error for a job that no delivery channel could reach.
    pub fn dispatch_unreachable(job_id: impl Into<String>, attempted: usize) -> Self {
        let job_id = job_id.into();
        Self::new(
            ErrorCode::DispatchUnreachable,
            format!("No delivery channel accepted job {}", job_id),
        )
        .with_context("channels_attempted", attempted)
        .with_details(
            ErrorDetails::new()
                .with_entity("job", job_id)
                .with_suggestion("Check the worker queue and the delivery channel configuration"),
        )
    }

    /// Create a queue closed error.
    pub fn queue_closed(queue: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::QueueClosed,
            format!("Job queue '{}' is closed", queue.into()),
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
