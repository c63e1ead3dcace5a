//! Configuration management.
//!
//! Values are layered: defaults, then an optional file named by
//! `MEDIASCRIBE_CONFIG`, then `MEDIASCRIBE__*` environment variables
//! (`MEDIASCRIBE__JOBS__STUCK_THRESHOLD=15m`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::{LoggingConfig, MetricsConfig};

/// Environment variable naming an optional configuration file.
pub const CONFIG_PATH_ENV: &str = "MEDIASCRIBE_CONFIG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Job store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Orchestration configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Media pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL this server is reachable at, used by the self-call channels
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

/// Which key-value store backs job state.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackendKind,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix prepended to every Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How often the in-memory backend drops expired entries
    #[serde(default = "default_purge_interval", with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            purge_interval: default_purge_interval(),
        }
    }
}

/// Toggles and parameters for the delivery channels.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    /// Redeliver through the queue after `delayed_offsets`
    #[serde(default)]
    pub delayed: bool,

    #[serde(default = "default_delayed_offsets", deserialize_with = "deserialize_durations")]
    pub delayed_offsets: Vec<Duration>,

    /// POST to this server's internal run endpoint
    #[serde(default)]
    pub http_self_call: bool,

    /// Write the same request over a raw TCP socket
    #[serde(default)]
    pub raw_socket: bool,

    /// Timeout for both self-call channels
    #[serde(default = "default_self_call_timeout", with = "humantime_serde")]
    pub self_call_timeout: Duration,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            delayed: false,
            delayed_offsets: default_delayed_offsets(),
            http_self_call: false,
            raw_socket: false,
            self_call_timeout: default_self_call_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// TTL of status and bulk records
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,

    /// Age after which a processing job without a live lease is abandoned
    #[serde(default = "default_stuck_threshold", with = "humantime_serde")]
    pub stuck_threshold: Duration,

    /// Lease duration; renewed on every progress write
    #[serde(default = "default_stuck_threshold", with = "humantime_serde")]
    pub lease_ttl: Duration,

    /// Maximum concurrently executing jobs
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum queued deliveries (0 = unlimited)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delay between members of a download bulk
    #[serde(default = "default_chain_delay", with = "humantime_serde")]
    pub chain_delay: Duration,

    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Run the stuck-job monitor
    #[serde(default = "default_monitor_enabled")]
    pub monitor_enabled: bool,

    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Redeliveries attempted by the monitor before giving up on a job
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    /// Worker name recorded on leases
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            stuck_threshold: default_stuck_threshold(),
            lease_ttl: default_stuck_threshold(),
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            chain_delay: default_chain_delay(),
            channels: ChannelsConfig::default(),
            monitor_enabled: default_monitor_enabled(),
            monitor_interval: default_monitor_interval(),
            max_redeliveries: default_max_redeliveries(),
            worker_name: default_worker_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding `<job_id>.<ext>` source videos
    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,

    /// Directory receiving transcripts and subtitles
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Scratch directory for converted audio
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Transcription endpoint
    #[serde(default = "default_transcription_url")]
    pub transcription_url: String,

    pub transcription_api_key: Option<String>,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default = "default_transcription_timeout", with = "humantime_serde")]
    pub transcription_timeout: Duration,

    /// Upload attempts before a job fails
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_dir: default_video_dir(),
            output_dir: default_output_dir(),
            work_dir: default_work_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            transcription_url: default_transcription_url(),
            transcription_api_key: None,
            transcription_model: default_transcription_model(),
            transcription_timeout: default_transcription_timeout(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_public_url() -> String { "http://127.0.0.1:8080".to_string() }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "mediascribe:".to_string() }
fn default_purge_interval() -> Duration { Duration::from_secs(300) }
fn default_delayed_offsets() -> Vec<Duration> { vec![Duration::from_secs(2), Duration::from_secs(5)] }
fn default_self_call_timeout() -> Duration { Duration::from_millis(200) }
fn default_retention() -> Duration { Duration::from_secs(3600) }
fn default_stuck_threshold() -> Duration { Duration::from_secs(600) }
fn default_concurrency() -> usize { 4 }
fn default_queue_capacity() -> usize { 10_000 }
fn default_chain_delay() -> Duration { Duration::from_secs(2) }
fn default_monitor_enabled() -> bool { true }
fn default_monitor_interval() -> Duration { Duration::from_secs(60) }
fn default_max_redeliveries() -> u32 { 1 }
fn default_worker_name() -> String { "mediascribe-worker".to_string() }
fn default_video_dir() -> PathBuf { PathBuf::from("media/videos") }
fn default_output_dir() -> PathBuf { PathBuf::from("media/transcripts") }
fn default_work_dir() -> PathBuf { std::env::temp_dir().join("mediascribe") }
fn default_ffmpeg_path() -> PathBuf { PathBuf::from("ffmpeg") }
fn default_transcription_url() -> String { "https://api.openai.com/v1/audio/transcriptions".to_string() }
fn default_transcription_model() -> String { "whisper-1".to_string() }
fn default_transcription_timeout() -> Duration { Duration::from_secs(600) }
fn default_retry_attempts() -> u32 { 3 }

fn deserialize_durations<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<humantime_serde::Serde<Duration>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(humantime_serde::Serde::into_inner).collect())
}

impl Config {
    /// Load configuration from the optional file and the environment.
    pub fn load() -> crate::error::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::build(path.as_deref())
    }

    /// Load from a specific file path, still layered under the environment.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        Self::build(Some(path))
    }

    fn build(path: Option<&str>) -> crate::error::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("MEDIASCRIBE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("jobs.channels.delayed_offsets")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations the orchestrator cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.jobs.concurrency == 0 {
            return Err(crate::error::MediascribeError::configuration(
                "jobs.concurrency must be at least 1",
            ));
        }
        if self.jobs.lease_ttl.is_zero() || self.jobs.stuck_threshold.is_zero() {
            return Err(crate::error::MediascribeError::configuration(
                "jobs.lease_ttl and jobs.stuck_threshold must be non-zero",
            ));
        }
        if self.jobs.retention < self.jobs.stuck_threshold {
            return Err(crate::error::MediascribeError::configuration(
                "jobs.retention must not be shorter than jobs.stuck_threshold",
            ));
        }
        Ok(())
    }
}
