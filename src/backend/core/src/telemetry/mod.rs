//! Telemetry: structured logging and Prometheus metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use mediascribe_core::telemetry::{init_telemetry, LoggingConfig, MetricsConfig};
//!
//! let handle = init_telemetry(&LoggingConfig::default(), &MetricsConfig::default())
//!     .expect("Failed to initialize telemetry");
//! println!("{}", handle.metrics.render());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{init_metrics, JobMetrics, MetricsConfig, MetricsRegistry};

/// Service name reported in logs and metrics.
pub const SERVICE_NAME: &str = "mediascribe-core";

/// Initialize logging and metrics.
///
/// Call once at application startup.
///
/// # Errors
///
/// Returns an error if any component fails to initialize.
pub fn init_telemetry(
    logging: &LoggingConfig,
    metrics: &MetricsConfig,
) -> anyhow::Result<TelemetryHandle> {
    init_logging(logging)?;

    let metrics = init_metrics(metrics, SERVICE_NAME)?;

    Ok(TelemetryHandle { metrics })
}

/// Handle for managing telemetry lifecycle.
pub struct TelemetryHandle {
    /// Metrics handle for rendering `/metrics`
    pub metrics: MetricsRegistry,
}

impl TelemetryHandle {
    pub fn shutdown(self) {
        ::tracing::info!("Telemetry shutdown complete");
    }
}
