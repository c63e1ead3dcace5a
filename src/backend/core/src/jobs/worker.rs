//! Job worker for concurrent job execution.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::queue::JobQueue;
use super::runner::{JobRunner, RunOutcome};

/// Configuration for the job worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrent job executions
    pub concurrency: usize,
    /// How long one dequeue waits before checking for shutdown
    #[serde(with = "humantime_serde")]
    pub dequeue_timeout: Duration,
    /// How long `stop` waits for in-flight jobs
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Worker name, also the lease owner
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            dequeue_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            name: "mediascribe-worker".to_string(),
        }
    }
}

/// Statistics for the job worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Deliveries taken off the queue
    pub processed: Arc<AtomicU64>,
    pub succeeded: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    /// Deliveries the runner declined
    pub skipped: Arc<AtomicU64>,
    /// Currently running jobs
    pub active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &RunOutcome) {
        let counter = match outcome {
            RunOutcome::Completed { .. } => &self.succeeded,
            RunOutcome::Failed { .. } => &self.failed,
            RunOutcome::Skipped { .. } => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: tokio::sync::watch::Sender<bool>,
    stats: WorkerStats,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    shutdown_timeout: Duration,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop taking new deliveries.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Shut down and wait for in-flight jobs, up to the shutdown timeout.
    pub async fn stop(self) -> bool {
        self.shutdown();
        let _ = self.task.await;

        let drained = tokio::time::timeout(
            self.shutdown_timeout,
            self.semaphore.acquire_many(self.concurrency as u32),
        )
        .await;

        match drained {
            Ok(Ok(_permits)) => true,
            _ => {
                tracing::warn!(
                    active = self.stats.active(),
                    "Worker stopped with jobs still running"
                );
                false
            }
        }
    }
}

/// Job worker that takes deliveries off the queue and hands them to the runner.
pub struct JobWorker {
    config: WorkerConfig,
    stats: WorkerStats,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            stats: WorkerStats::new(),
        }
    }

    /// Start the worker, returning a handle for control.
    pub fn start(self, queue: Arc<JobQueue>, runner: Arc<JobRunner>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let stats = self.stats.clone();
        let config = self.config.clone();
        let concurrency = config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let loop_semaphore = semaphore.clone();
        let loop_stats = stats.clone();

        let task = tokio::spawn(async move {
            tracing::info!(
                worker = %config.name,
                concurrency,
                "Job worker started"
            );

            loop {
                let permit = tokio::select! {
                    _ = shutdown_rx.wait_for(|stopped| *stopped) => break,
                    permit = loop_semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let delivery = tokio::select! {
                    _ = shutdown_rx.wait_for(|stopped| *stopped) => break,
                    delivery = queue.dequeue(config.dequeue_timeout) => delivery,
                };

                let job = match delivery {
                    Ok(Some(job)) => job,
                    Ok(None) => continue,
                    Err(e) => {
                        e.log();
                        tokio::time::sleep(config.dequeue_timeout).await;
                        continue;
                    }
                };

                loop_stats.processed.fetch_add(1, Ordering::Relaxed);
                loop_stats.active.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(job_id = %job.job_id, channel = %job.channel, "Delivery taken");

                let runner = runner.clone();
                let stats = loop_stats.clone();
                tokio::spawn(async move {
                    let outcome = runner.run(&job.job_id).await;
                    stats.record(&outcome);
                    stats.active.fetch_sub(1, Ordering::Relaxed);
                    drop(permit);
                });
            }

            tracing::info!(worker = %config.name, "Worker stopped");
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            stats,
            semaphore,
            concurrency,
            shutdown_timeout: self.config.shutdown_timeout,
            task,
        }
    }
}
