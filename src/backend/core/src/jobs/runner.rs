//! Lease-guarded job execution.
//!
//! Every delivery of a job, from any channel, ends up in [`JobRunner::run`].
//! The runner only proceeds when the job is still processing and it wins
//! the job lease, so redundant deliveries are harmless.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;

use super::dispatcher::Dispatcher;
use super::job::{JobId, JobProcessor, JobState, JobStatus, ProcessError, ProgressReporter};
use super::lease::{JobLease, LeaseManager};
use super::store::JobStore;
use crate::error::Result;
use crate::telemetry::metrics::JobMetrics;

/// Why a delivery did not run the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No status record; the job was never dispatched or has expired
    NotDispatched,
    /// The job already reached a terminal state
    AlreadyFinished,
    /// Another runner holds the lease
    AlreadyRunning,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDispatched => "not_dispatched",
            Self::AlreadyFinished => "already_finished",
            Self::AlreadyRunning => "already_running",
        }
    }
}

/// Result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Skipped { reason: SkipReason },
    Completed { message: String },
    Failed { message: String },
}

enum Start {
    Skip(SkipReason),
    Go(JobLease, JobStatus),
}

/// Runs a delivered job at most once at a time.
pub struct JobRunner {
    store: JobStore,
    leases: LeaseManager,
    processor: Arc<dyn JobProcessor>,
    dispatcher: Arc<Dispatcher>,
    stuck_threshold: Duration,
}

impl JobRunner {
    pub fn new(
        store: JobStore,
        leases: LeaseManager,
        processor: Arc<dyn JobProcessor>,
        dispatcher: Arc<Dispatcher>,
        stuck_threshold: Duration,
    ) -> Self {
        Self {
            store,
            leases,
            processor,
            dispatcher,
            stuck_threshold,
        }
    }

    /// Handle one delivery of `job_id`.
    pub async fn run(&self, job_id: &JobId) -> RunOutcome {
        let span = tracing::info_span!("job_run", job_id = %job_id);
        async {
            match self.try_start(job_id).await {
                Ok(Start::Go(lease, status)) => self.execute(lease, status).await,
                Ok(Start::Skip(reason)) => {
                    tracing::debug!(reason = reason.as_str(), "Delivery skipped");
                    JobMetrics::record_skipped(reason.as_str());
                    RunOutcome::Skipped { reason }
                }
                Err(e) => {
                    // Nothing was claimed. A later delivery or the monitor retries.
                    e.log();
                    JobMetrics::record_skipped("store_error");
                    RunOutcome::Skipped {
                        reason: SkipReason::NotDispatched,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_start(&self, job_id: &JobId) -> Result<Start> {
        let Some(status) = self.store.get_status(job_id).await? else {
            return Ok(Start::Skip(SkipReason::NotDispatched));
        };
        if status.state != JobState::Processing {
            return Ok(Start::Skip(SkipReason::AlreadyFinished));
        }

        let stale = status.is_stale(chrono::Utc::now(), self.stuck_threshold);
        if !stale && self.leases.is_held(job_id).await? {
            return Ok(Start::Skip(SkipReason::AlreadyRunning));
        }

        let Some(lease) = self.leases.acquire(job_id).await? else {
            return Ok(Start::Skip(SkipReason::AlreadyRunning));
        };

        // The previous holder may have finished between the read and the acquire.
        let status = match self.store.get_status(job_id).await? {
            Some(status) if status.state == JobState::Processing => status,
            other => {
                self.leases.release(&lease).await?;
                let reason = if other.is_some() {
                    SkipReason::AlreadyFinished
                } else {
                    SkipReason::NotDispatched
                };
                return Ok(Start::Skip(reason));
            }
        };

        if stale {
            tracing::info!(attempt = status.attempt + 1, "Reclaiming abandoned job");
        }
        Ok(Start::Go(lease, status))
    }

    async fn execute(&self, mut lease: JobLease, mut status: JobStatus) -> RunOutcome {
        let job_id = status.job_id.clone();
        status.mark_started();
        self.write(&status).await;
        JobMetrics::record_started();
        tracing::info!(attempt = status.attempt, "Job started");

        let started = Instant::now();
        let (sender, mut progress) = mpsc::channel(16);
        let reporter = ProgressReporter::new(job_id.clone(), sender);
        let processor = self.processor.clone();
        let task_job_id = job_id.clone();
        let handle =
            tokio::spawn(async move { processor.process_job(&task_job_id, &reporter).await });

        // Renew on every progress message and on a heartbeat, so silent
        // steps longer than the lease TTL keep the lease.
        let mut heartbeat = tokio::time::interval(heartbeat_period(self.leases.ttl()));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        // The channel closes when the processor task drops its reporter.
        loop {
            tokio::select! {
                message = progress.recv() => match message {
                    Some(message) => {
                        status.message = message;
                        self.write(&status).await;
                        self.renew(&mut lease).await;
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    self.renew(&mut lease).await;
                    self.touch(&status).await;
                }
            }
        }

        let result = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ProcessError::Internal("job processor panicked".to_string())),
            Err(_) => Err(ProcessError::Internal("job processor was cancelled".to_string())),
        };

        let elapsed = started.elapsed();
        let took = format_elapsed(elapsed);
        let (outcome, success, detail) = match result {
            Ok(message) => {
                status.mark_completed(format!("{} (took {})", message, took));
                JobMetrics::record_completed(elapsed.as_secs_f64());
                tracing::info!(took = %took, "Job completed");
                (
                    RunOutcome::Completed {
                        message: status.message.clone(),
                    },
                    true,
                    message,
                )
            }
            Err(e) => {
                status.mark_failed(format!("Failed: {} (took {})", e, took));
                JobMetrics::record_failed(e.kind(), elapsed.as_secs_f64());
                tracing::warn!(kind = e.kind(), error = %e, took = %took, "Job failed");
                (
                    RunOutcome::Failed {
                        message: status.message.clone(),
                    },
                    false,
                    e.to_string(),
                )
            }
        };

        self.write(&status).await;
        if let Err(e) = self.leases.release(&lease).await {
            e.log();
        }
        if let Err(e) = self.dispatcher.finish(&job_id, success, &detail).await {
            e.log();
        }

        outcome
    }

    async fn renew(&self, lease: &mut JobLease) {
        if let Err(e) = self.leases.renew(lease).await {
            e.log();
        }
    }

    async fn touch(&self, status: &JobStatus) {
        if let Err(e) = self.store.touch_status(status).await {
            tracing::warn!(job_id = %status.job_id, error = %e, "Failed to extend job status");
        }
    }

    async fn write(&self, status: &JobStatus) {
        if let Err(e) = self.store.put_status(status).await {
            tracing::error!(job_id = %status.job_id, error = %e, "Failed to write job status");
        }
    }
}

fn heartbeat_period(lease_ttl: Duration) -> Duration {
    (lease_ttl / 3).max(Duration::from_millis(10))
}

/// Whole seconds, humanized (`1m 12s`).
pub fn format_elapsed(elapsed: Duration) -> String {
    humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::bulk::BulkTracker;
    use crate::jobs::channel::{DeliveryChannel, QueueChannel};
    use crate::jobs::queue::JobQueue;
    use crate::jobs::scheduler::JobScheduler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: AtomicUsize,
        fail: bool,
        hold: Duration,
    }

    #[async_trait]
    impl JobProcessor for Counting {
        async fn has_video_source(&self, _job_id: &JobId) -> bool {
            true
        }

        async fn process_job(
            &self,
            _job_id: &JobId,
            progress: &ProgressReporter,
        ) -> std::result::Result<String, ProcessError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            progress.report("Converting to audio...").await;
            tokio::time::sleep(self.hold).await;
            if self.fail {
                Err(ProcessError::ConversionFailed("ffmpeg exited with 1".to_string()))
            } else {
                Ok("Transcription completed (42 characters)".to_string())
            }
        }
    }

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    fn runner(processor: Arc<Counting>) -> (JobRunner, Arc<Dispatcher>, JobStore) {
        runner_with_lease(processor, Duration::from_secs(600))
    }

    fn runner_with_lease(
        processor: Arc<Counting>,
        lease_ttl: Duration,
    ) -> (JobRunner, Arc<Dispatcher>, JobStore) {
        let store = JobStore::in_memory(Duration::from_secs(3600));
        let queue = Arc::new(JobQueue::in_memory());
        let scheduler = Arc::new(JobScheduler::new(queue.clone()));
        let channels: Vec<Arc<dyn DeliveryChannel>> =
            vec![Arc::new(QueueChannel::new(queue, scheduler))];
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(BulkTracker::new(store.clone())),
            processor.clone(),
            channels,
            Duration::ZERO,
        ));
        let leases = LeaseManager::new(store.clone(), lease_ttl, "test");
        let runner = JobRunner::new(
            store.clone(),
            leases,
            processor,
            dispatcher.clone(),
            Duration::from_secs(600),
        );
        (runner, dispatcher, store)
    }

    fn counting(fail: bool, hold: Duration) -> Arc<Counting> {
        Arc::new(Counting {
            runs: AtomicUsize::new(0),
            fail,
            hold,
        })
    }

    #[tokio::test]
    async fn test_undispatched_job_is_skipped() {
        let processor = counting(false, Duration::ZERO);
        let (runner, _, _) = runner(processor.clone());

        let outcome = runner.run(&id("a")).await;
        assert_eq!(
            outcome,
            RunOutcome::Skipped {
                reason: SkipReason::NotDispatched
            }
        );
        assert_eq!(processor.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completed_status_has_timing_suffix() {
        let processor = counting(false, Duration::ZERO);
        let (runner, dispatcher, store) = runner(processor.clone());
        dispatcher.dispatch(&id("a")).await.unwrap();

        let outcome = runner.run(&id("a")).await;
        assert!(matches!(outcome, RunOutcome::Completed { .. }));

        let status = store.get_status(&id("a")).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.message, "Transcription completed (42 characters) (took 0s)");
        assert_eq!(status.attempt, 1);
        assert!(status.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_with_prefix() {
        let processor = counting(true, Duration::ZERO);
        let (runner, dispatcher, store) = runner(processor);
        dispatcher.dispatch(&id("a")).await.unwrap();

        runner.run(&id("a")).await;
        let status = store.get_status(&id("a")).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.message.starts_with("Failed: ffmpeg exited with 1 (took "));
        assert!(status.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_rerun() {
        let processor = counting(false, Duration::ZERO);
        let (runner, dispatcher, _) = runner(processor.clone());
        dispatcher.dispatch(&id("a")).await.unwrap();

        runner.run(&id("a")).await;
        let again = runner.run(&id("a")).await;
        assert_eq!(
            again,
            RunOutcome::Skipped {
                reason: SkipReason::AlreadyFinished
            }
        );
        assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_run_once() {
        let processor = counting(false, Duration::from_millis(100));
        let (runner, dispatcher, _) = runner(processor.clone());
        let runner = Arc::new(runner);
        dispatcher.dispatch(&id("a")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let runner = runner.clone();
            handles.push(tokio::spawn(async move { runner.run(&id("a")).await }));
        }

        let mut completed = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), RunOutcome::Completed { .. }) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_step_keeps_lease() {
        // One progress message, then silence for several lease lifetimes.
        let processor = counting(false, Duration::from_secs(30));
        let (runner, dispatcher, store) = runner_with_lease(processor.clone(), Duration::from_secs(3));
        let runner = Arc::new(runner);
        dispatcher.dispatch(&id("a")).await.unwrap();

        let first = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(&id("a")).await })
        };
        tokio::time::sleep(Duration::from_secs(10)).await;

        let second = runner.run(&id("a")).await;
        assert_eq!(
            second,
            RunOutcome::Skipped {
                reason: SkipReason::AlreadyRunning
            }
        );

        assert!(matches!(first.await.unwrap(), RunOutcome::Completed { .. }));
        assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
        let status = store.get_status(&id("a")).await.unwrap().unwrap();
        assert_eq!(status.attempt, 1);
    }

    #[test]
    fn test_heartbeat_period_is_a_third_of_the_ttl() {
        assert_eq!(heartbeat_period(Duration::from_secs(600)), Duration::from_secs(200));
        assert_eq!(heartbeat_period(Duration::ZERO), Duration::from_millis(10));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(900)), "0s");
        assert_eq!(format_elapsed(Duration::from_millis(72_400)), "1m 12s");
    }
}
