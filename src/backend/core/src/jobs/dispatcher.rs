//! Job dispatch.
//!
//! Dispatching writes an `Initializing...` status and then fires every
//! configured delivery channel concurrently. It returns as soon as the
//! channels have fired; the run itself happens on whichever runner wins the lease.
//!
//! The dispatcher also owns bulk chaining: after a member of a download
//! bulk resolves, the next member is dispatched after `chain_delay`.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::bulk::BulkTracker;
use super::channel::DeliveryChannel;
use super::job::{JobId, JobProcessor, JobStatus};
use super::store::JobStore;
use crate::error::{MediascribeError, Result};
use crate::telemetry::metrics::JobMetrics;

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub job_id: JobId,
    /// `false` when the job was rejected before any channel fired
    pub accepted: bool,
    /// Channels that reported success
    pub channels_fired: Vec<String>,
}

enum Admission {
    Accepted,
    /// Rejected up front. Carries the bulk member to chain to, if any.
    Rejected { next: Option<JobId> },
}

/// Writes initial statuses and fires delivery channels.
pub struct Dispatcher {
    store: JobStore,
    tracker: Arc<BulkTracker>,
    processor: Arc<dyn JobProcessor>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
    chain_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        store: JobStore,
        tracker: Arc<BulkTracker>,
        processor: Arc<dyn JobProcessor>,
        channels: Vec<Arc<dyn DeliveryChannel>>,
        chain_delay: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            processor,
            channels,
            chain_delay,
        }
    }

    /// Names of the configured channels, in firing order.
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Dispatch a job for immediate delivery.
    pub async fn dispatch(&self, job_id: &JobId) -> Result<DispatchReceipt> {
        self.dispatch_after(job_id, Duration::ZERO).await
    }

    /// Dispatch a job, delivering no earlier than `delay` from now.
    ///
    /// The `Initializing...` status is written immediately either way.
    /// Fails with `DispatchUnreachable` if no channel fired.
    pub async fn dispatch_after(&self, job_id: &JobId, delay: Duration) -> Result<DispatchReceipt> {
        match self.admit(job_id).await? {
            Admission::Accepted => {
                let channels_fired = self.fire(job_id, delay).await?;
                Ok(DispatchReceipt {
                    job_id: job_id.clone(),
                    accepted: true,
                    channels_fired,
                })
            }
            Admission::Rejected { next } => {
                self.chain(next).await;
                Ok(DispatchReceipt {
                    job_id: job_id.clone(),
                    accepted: false,
                    channels_fired: Vec::new(),
                })
            }
        }
    }

    /// Dispatch several jobs at once.
    ///
    /// Every status is written before any channel fires, so no job in the
    /// batch can be observed without a record while its siblings run.
    pub async fn dispatch_batch(&self, job_ids: &[JobId]) -> Vec<Result<DispatchReceipt>> {
        let mut admitted = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            admitted.push(self.admit(job_id).await);
        }

        let mut receipts = Vec::with_capacity(job_ids.len());
        for (job_id, admission) in job_ids.iter().zip(admitted) {
            let receipt = match admission {
                Ok(Admission::Accepted) => {
                    self.fire(job_id, Duration::ZERO)
                        .await
                        .map(|channels_fired| DispatchReceipt {
                            job_id: job_id.clone(),
                            accepted: true,
                            channels_fired,
                        })
                }
                Ok(Admission::Rejected { next }) => {
                    self.chain(next).await;
                    Ok(DispatchReceipt {
                        job_id: job_id.clone(),
                        accepted: false,
                        channels_fired: Vec::new(),
                    })
                }
                Err(e) => Err(e),
            };
            receipts.push(receipt);
        }
        receipts
    }

    /// Record a terminal outcome against the job's bulk and dispatch the
    /// next download member, if one is due.
    pub async fn finish(&self, job_id: &JobId, success: bool, message: &str) -> Result<()> {
        let next = self.tracker.record_outcome(job_id, success, message).await?;
        self.chain(next).await;
        Ok(())
    }

    async fn admit(&self, job_id: &JobId) -> Result<Admission> {
        let bulk_id = self.store.get_bulk_member(job_id).await?;

        if !self.processor.has_video_source(job_id).await {
            let reason = format!("no video source found for {}", job_id);
            let mut status = JobStatus::initializing(job_id.clone(), bulk_id);
            status.started_at = None;
            status.mark_failed(format!("Failed: {}", reason));
            self.store.put_status(&status).await?;

            tracing::warn!(job_id = %job_id, "Dispatch rejected: no video source");
            JobMetrics::record_rejected("no_video_source");

            let next = self.tracker.record_outcome(job_id, false, &reason).await?;
            return Ok(Admission::Rejected { next });
        }

        self.store
            .put_status(&JobStatus::initializing(job_id.clone(), bulk_id))
            .await?;
        Ok(Admission::Accepted)
    }

    async fn fire(&self, job_id: &JobId, delay: Duration) -> Result<Vec<String>> {
        let results = join_all(
            self.channels
                .iter()
                .map(|channel| channel.fire(job_id, delay)),
        )
        .await;

        let mut fired = Vec::with_capacity(self.channels.len());
        for (channel, result) in self.channels.iter().zip(results) {
            match result {
                Ok(()) => {
                    JobMetrics::record_dispatched(channel.name());
                    fired.push(channel.name().to_string());
                }
                Err(e) => {
                    JobMetrics::record_delivery_failure(channel.name());
                    tracing::warn!(
                        job_id = %job_id,
                        channel = channel.name(),
                        error = %e,
                        "Delivery channel failed"
                    );
                }
            }
        }

        if fired.is_empty() {
            let error = MediascribeError::dispatch_unreachable(job_id.to_string(), self.channels.len());
            error.log();
            return Err(error);
        }

        tracing::info!(
            job_id = %job_id,
            channels = ?fired,
            delay_ms = delay.as_millis() as u64,
            "Job dispatched"
        );
        Ok(fired)
    }

    /// Dispatch `next` after the chain delay. Members rejected at admission
    /// resolve immediately, so keep walking until one is accepted.
    async fn chain(&self, mut next: Option<JobId>) {
        while let Some(job_id) = next.take() {
            match self.admit(&job_id).await {
                Ok(Admission::Accepted) => {
                    if let Err(e) = self.fire(&job_id, self.chain_delay).await {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to chain bulk member");
                    }
                }
                Ok(Admission::Rejected { next: following }) => next = following,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to admit bulk member");
                }
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channel_names())
            .field("chain_delay", &self.chain_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::job::{BulkKind, JobState, ProcessError, ProgressReporter};
    use crate::jobs::queue::JobQueue;
    use crate::jobs::scheduler::JobScheduler;
    use crate::jobs::channel::QueueChannel;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct Sources(HashSet<String>);

    #[async_trait]
    impl JobProcessor for Sources {
        async fn has_video_source(&self, job_id: &JobId) -> bool {
            self.0.contains(job_id.as_str())
        }

        async fn process_job(
            &self,
            _job_id: &JobId,
            _progress: &ProgressReporter,
        ) -> std::result::Result<String, ProcessError> {
            Ok("done".to_string())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl DeliveryChannel for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn fire(&self, _job_id: &JobId, _delay: Duration) -> Result<()> {
            Err(MediascribeError::internal("connection refused"))
        }
    }

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    struct Fixture {
        store: JobStore,
        queue: Arc<JobQueue>,
        tracker: Arc<BulkTracker>,
        dispatcher: Dispatcher,
    }

    fn fixture(sources: &[&str], extra: Vec<Arc<dyn DeliveryChannel>>) -> Fixture {
        let store = JobStore::in_memory(Duration::from_secs(3600));
        let queue = Arc::new(JobQueue::in_memory());
        let scheduler = Arc::new(JobScheduler::new(queue.clone()));
        let tracker = Arc::new(BulkTracker::new(store.clone()));
        let processor = Arc::new(Sources(sources.iter().map(|s| s.to_string()).collect()));

        let mut channels: Vec<Arc<dyn DeliveryChannel>> =
            vec![Arc::new(QueueChannel::new(queue.clone(), scheduler))];
        channels.extend(extra);

        let dispatcher = Dispatcher::new(
            store.clone(),
            tracker.clone(),
            processor,
            channels,
            Duration::from_secs(2),
        );
        Fixture {
            store,
            queue,
            tracker,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_dispatch_writes_initializing_and_enqueues() {
        let f = fixture(&["a"], vec![]);
        let receipt = f.dispatcher.dispatch(&id("a")).await.unwrap();

        assert!(receipt.accepted);
        assert_eq!(receipt.channels_fired, vec!["queue".to_string()]);

        let status = f.store.get_status(&id("a")).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Processing);
        assert_eq!(status.message, "Initializing...");
        assert!(status.started_at.is_some());

        let queued = f.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(queued.job_id, id("a"));
    }

    #[tokio::test]
    async fn test_dispatch_without_source_fails_immediately() {
        let f = fixture(&[], vec![]);
        let receipt = f.dispatcher.dispatch(&id("missing")).await.unwrap();

        assert!(!receipt.accepted);
        let status = f.store.get_status(&id("missing")).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.message.contains("no video source"));
        assert!(status.started_at.is_none());
        assert!(f.queue.dequeue(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_failing_channel_is_tolerated() {
        let f = fixture(&["a"], vec![Arc::new(Unreachable)]);
        let receipt = f.dispatcher.dispatch(&id("a")).await.unwrap();
        assert_eq!(receipt.channels_fired, vec!["queue".to_string()]);
    }

    #[tokio::test]
    async fn test_all_channels_failing_is_unreachable() {
        let store = JobStore::in_memory(Duration::from_secs(3600));
        let tracker = Arc::new(BulkTracker::new(store.clone()));
        let processor = Arc::new(Sources(["a".to_string()].into_iter().collect()));
        let dispatcher = Dispatcher::new(
            store.clone(),
            tracker,
            processor,
            vec![Arc::new(Unreachable)],
            Duration::ZERO,
        );

        let error = dispatcher.dispatch(&id("a")).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::DispatchUnreachable);

        // The status stays processing for the stuck-job monitor to resolve.
        let status = store.get_status(&id("a")).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_chains_next_download_member() {
        let f = fixture(&["a", "b"], vec![]);
        let bulk = f
            .tracker
            .create(BulkKind::Download, vec![id("a"), id("b")])
            .await
            .unwrap();
        f.dispatcher.dispatch(&id("a")).await.unwrap();
        f.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();

        f.dispatcher.finish(&id("a"), true, "ok").await.unwrap();

        // Status for the next member is written right away, delivery waits.
        let next = f.store.get_status(&id("b")).await.unwrap().unwrap();
        assert_eq!(next.message, "Initializing...");
        assert_eq!(next.bulk_id.as_ref(), Some(&bulk.bulk_id));
        assert!(f.queue.dequeue(Duration::ZERO).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let queued = f.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(queued.job_id, id("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_skips_members_without_source() {
        let f = fixture(&["a", "c"], vec![]);
        let bulk = f
            .tracker
            .create(BulkKind::Download, vec![id("a"), id("b"), id("c")])
            .await
            .unwrap();
        f.dispatcher.dispatch(&id("a")).await.unwrap();
        f.dispatcher.finish(&id("a"), true, "ok").await.unwrap();

        let skipped = f.store.get_status(&id("b")).await.unwrap().unwrap();
        assert_eq!(skipped.state, JobState::Failed);

        let bulk = f.tracker.get(&bulk.bulk_id).await.unwrap().unwrap();
        assert_eq!(bulk.failed, 1);
        assert_eq!(bulk.current_job_id, Some(id("c")));
        assert!(bulk.errors.contains_key("b"));
    }
}
