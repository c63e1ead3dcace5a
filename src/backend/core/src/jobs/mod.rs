//! Job orchestration for Mediascribe.
//!
//! This module turns a request to process a media file into a reliable,
//! non-blocking background run:
//!
//! - **Store**: status, bulk and lease records behind a TTL key-value contract
//! - **Dispatcher**: writes the initial status and fires delivery channels
//! - **Queue / Scheduler**: the primary delivery path, immediate or delayed
//! - **Worker / Runner**: lease-guarded execution with progress reporting
//! - **Bulk**: batched jobs, parallel or chained one after another
//! - **Monitor**: redelivery and dead-lettering of abandoned jobs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            Job Orchestration                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐  │
//! │  │ Dispatcher  │───▶│  Channels   │───▶│    Queue    │───▶│   Worker    │  │
//! │  │ (status +   │    │ (queue/     │    │ (+ delayed  │    │  (Runner +  │  │
//! │  │  admission) │    │  self-call) │    │  scheduler) │    │   lease)    │  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘  │
//! │         ▲                                                        │         │
//! │         │                 bulk outcome / chain next              │         │
//! │         └────────────────────────────────────────────────────────┘         │
//! │  ┌─────────────────────────────────────────────────────────────────────┐  │
//! │  │          Job Store (status / bulk / bulk_member / lease)            │  │
//! │  └─────────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use mediascribe_core::jobs::{Dispatcher, JobId, JobRunner};
//!
//! let receipt = dispatcher.dispatch(&JobId::parse("lecture-01")?).await?;
//! assert!(receipt.accepted);
//!
//! // On the worker side, every delivery goes through the runner.
//! let outcome = runner.run(&receipt.job_id).await;
//! ```

pub mod bulk;
pub mod channel;
pub mod dispatcher;
pub mod job;
pub mod lease;
pub mod monitor;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use bulk::{BulkCoordinator, BulkTracker};
pub use channel::{
    internal_run_path, DelayedChannel, DeliveryChannel, HttpSelfCallChannel, QueueChannel,
    RawSocketChannel,
};
pub use dispatcher::{DispatchReceipt, Dispatcher};
pub use job::{
    BackoffStrategy, BulkId, BulkKind, BulkOperation, BulkStatus, JobId, JobProcessor, JobState,
    JobStatus, ProcessError, ProgressReporter, RetryPolicy,
};
pub use lease::{JobLease, LeaseManager};
pub use monitor::{
    MonitorConfig, MonitorHandle, MonitorReport, StuckJobMonitor, StuckJobSweep,
    UNREACHABLE_REASON,
};
pub use queue::{
    DeadLetterQueue, InMemoryQueueBackend, JobQueue, QueueBackend, QueueConfig, QueueStats,
    QueuedJob, RedisQueueBackend,
};
pub use runner::{format_elapsed, JobRunner, RunOutcome, SkipReason};
pub use scheduler::{JobScheduler, ScheduleId, ScheduledJob};
pub use store::{InMemoryStore, JobStore, KvStore, RedisStore};
pub use worker::{JobWorker, WorkerConfig, WorkerHandle, WorkerStats};
