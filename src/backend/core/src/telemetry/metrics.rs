//! Prometheus metrics for job orchestration.
//!
//! Metric names are registered with descriptions in
//! [`register_metric_descriptions`]; recording goes through [`JobMetrics`]
//! so label sets stay consistent across the dispatcher, runner and monitor.
//!
//! # Example
//!
//! ```rust,no_run
//! use mediascribe_core::telemetry::metrics::JobMetrics;
//!
//! JobMetrics::record_dispatched("queue");
//! JobMetrics::record_completed(12.5);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for job durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

// Jobs run for minutes, so the buckets reach well past the HTTP-style defaults.
fn default_duration_buckets() -> Vec<f64> {
    vec![
        1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0,
    ]
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder; `render` returns an empty string.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }
}

/// Initialize the metrics subsystem.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;

    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

/// Register all metric descriptions.
fn register_metric_descriptions() {
    // Dispatch metrics
    describe_counter!(
        "mediascribe_jobs_dispatched_total",
        "Jobs fired through a delivery channel, by channel"
    );
    describe_counter!(
        "mediascribe_delivery_failures_total",
        "Delivery channel firings that failed, by channel"
    );
    describe_counter!(
        "mediascribe_jobs_rejected_total",
        "Dispatches rejected before any channel fired, by reason"
    );

    // Runner metrics
    describe_counter!(
        "mediascribe_jobs_completed_total",
        "Jobs that reached the completed state"
    );
    describe_counter!(
        "mediascribe_jobs_failed_total",
        "Jobs that reached the failed state, by failure kind"
    );
    describe_counter!(
        "mediascribe_jobs_skipped_total",
        "Runner invocations that did nothing, by reason"
    );
    describe_histogram!(
        "mediascribe_job_duration_seconds",
        "Wall time of a job run in seconds"
    );
    describe_gauge!("mediascribe_jobs_running", "Jobs currently executing");

    // Queue metrics
    describe_gauge!("mediascribe_queue_depth", "Deliveries waiting in the job queue");
    describe_counter!(
        "mediascribe_jobs_dead_lettered_total",
        "Jobs given up on after redelivery"
    );
    describe_counter!(
        "mediascribe_jobs_redelivered_total",
        "Jobs redelivered by the stuck-job monitor"
    );

    // Bulk metrics
    describe_counter!(
        "mediascribe_bulk_submitted_total",
        "Bulk operations submitted, by type"
    );
    describe_counter!(
        "mediascribe_bulk_completed_total",
        "Bulk operations whose members all resolved, by type"
    );

    // Maintenance
    describe_counter!(
        "mediascribe_stuck_jobs_cleared_total",
        "Processing records removed by the stuck-job sweep"
    );

    // Error metrics
    describe_counter!("mediascribe_errors_total", "Service errors by code");
}

/// Recording helpers for job orchestration metrics.
pub struct JobMetrics;

impl JobMetrics {
    pub fn record_dispatched(channel: &'static str) {
        counter!("mediascribe_jobs_dispatched_total", "channel" => channel).increment(1);
    }

    pub fn record_delivery_failure(channel: &'static str) {
        counter!("mediascribe_delivery_failures_total", "channel" => channel).increment(1);
    }

    pub fn record_rejected(reason: &'static str) {
        counter!("mediascribe_jobs_rejected_total", "reason" => reason).increment(1);
    }

    pub fn record_started() {
        gauge!("mediascribe_jobs_running").increment(1.0);
    }

    /// Record a successful run.
    pub fn record_completed(duration_seconds: f64) {
        gauge!("mediascribe_jobs_running").decrement(1.0);
        counter!("mediascribe_jobs_completed_total").increment(1);
        histogram!("mediascribe_job_duration_seconds", "outcome" => "completed")
            .record(duration_seconds);
    }

    /// Record a failed run.
    pub fn record_failed(kind: &'static str, duration_seconds: f64) {
        gauge!("mediascribe_jobs_running").decrement(1.0);
        counter!("mediascribe_jobs_failed_total", "kind" => kind).increment(1);
        histogram!("mediascribe_job_duration_seconds", "outcome" => "failed")
            .record(duration_seconds);
    }

    pub fn record_skipped(reason: &'static str) {
        counter!("mediascribe_jobs_skipped_total", "reason" => reason).increment(1);
    }

    pub fn set_queue_depth(depth: usize) {
        gauge!("mediascribe_queue_depth").set(depth as f64);
    }

    pub fn record_dead_lettered() {
        counter!("mediascribe_jobs_dead_lettered_total").increment(1);
    }

    pub fn record_redelivered() {
        counter!("mediascribe_jobs_redelivered_total").increment(1);
    }

    pub fn record_bulk_submitted(kind: &'static str) {
        counter!("mediascribe_bulk_submitted_total", "type" => kind).increment(1);
    }

    pub fn record_bulk_completed(kind: &'static str) {
        counter!("mediascribe_bulk_completed_total", "type" => kind).increment(1);
    }

    pub fn record_stuck_cleared(count: usize) {
        counter!("mediascribe_stuck_jobs_cleared_total").increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(!config.duration_buckets.is_empty());
        assert!(config.duration_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let registry = init_metrics(&config, "test").unwrap();
        assert!(!registry.is_enabled());
        assert_eq!(registry.render(), "");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        JobMetrics::record_dispatched("queue");
        JobMetrics::record_failed("upload_failed", 1.5);
        JobMetrics::set_queue_depth(3);
    }
}
