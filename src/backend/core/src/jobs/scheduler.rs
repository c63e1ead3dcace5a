//! Delayed delivery scheduling.
//!
//! The scheduler enqueues a delivery after a delay, from a detached task, so
//! nothing depends on the HTTP request that caused it staying open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::job::JobId;
use super::queue::{JobQueue, QueuedJob};

/// Identifier of one scheduled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A delivery waiting for its delay to elapse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: ScheduleId,
    pub job_id: JobId,
    pub channel: String,
    pub due_at: DateTime<Utc>,
}

/// Schedules one-shot deliveries into the job queue.
pub struct JobScheduler {
    queue: Arc<JobQueue>,
    pending: Arc<RwLock<HashMap<ScheduleId, ScheduledJob>>>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl JobScheduler {
    /// Create a new job scheduler delivering into `queue`.
    pub fn new(queue: Arc<JobQueue>) -> Self {
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            queue,
            pending: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    /// Enqueue `job` once `delay` has elapsed.
    pub async fn schedule_once(&self, delay: Duration, job: QueuedJob) -> ScheduleId {
        let id = ScheduleId::new();
        let due_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

        self.pending.write().await.insert(
            id,
            ScheduledJob {
                id,
                job_id: job.job_id.clone(),
                channel: job.channel.clone(),
                due_at,
            },
        );

        let queue = self.queue.clone();
        let pending = self.pending.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = async { let _ = shutdown.wait_for(|stopped| *stopped).await; } => {
                    tracing::debug!(schedule_id = %id, job_id = %job.job_id, "Scheduled delivery dropped on shutdown");
                    pending.write().await.remove(&id);
                    return;
                }
            }

            // Cancelled entries have already been removed.
            if pending.write().await.remove(&id).is_none() {
                return;
            }

            let job = QueuedJob::new(job.job_id, job.channel);
            if let Err(e) = queue.enqueue(job.clone()).await {
                tracing::error!(
                    job_id = %job.job_id,
                    channel = %job.channel,
                    error = %e,
                    "Failed to enqueue scheduled delivery"
                );
            }
        });

        tracing::debug!(schedule_id = %id, delay_ms = delay.as_millis() as u64, "Delivery scheduled");
        id
    }

    /// Cancel a scheduled delivery.
    pub async fn cancel(&self, id: ScheduleId) -> bool {
        self.pending.write().await.remove(&id).is_some()
    }

    /// Deliveries not yet due.
    pub async fn list(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.pending.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.due_at);
        jobs
    }

    /// Ids of jobs with a delivery not yet due.
    pub async fn pending_job_ids(&self) -> HashSet<JobId> {
        self.pending
            .read()
            .await
            .values()
            .map(|scheduled| scheduled.job_id.clone())
            .collect()
    }

    /// Shutdown the scheduler, dropping pending deliveries.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(raw: &str) -> QueuedJob {
        QueuedJob::new(JobId::parse(raw).unwrap(), "delayed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_after_delay() {
        let queue = Arc::new(JobQueue::in_memory());
        let scheduler = JobScheduler::new(queue.clone());

        scheduler.schedule_once(Duration::from_secs(2), queued("a")).await;
        assert_eq!(scheduler.list().await.len(), 1);
        assert!(scheduler.pending_job_ids().await.contains(&JobId::parse("a").unwrap()));

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let delivered = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(delivered.job_id.as_str(), "a");
        assert_eq!(delivered.channel, "delayed");
        assert!(scheduler.list().await.is_empty());
        assert!(scheduler.pending_job_ids().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_schedule() {
        let queue = Arc::new(JobQueue::in_memory());
        let scheduler = JobScheduler::new(queue.clone());

        let id = scheduler.schedule_once(Duration::from_secs(1), queued("a")).await;
        assert!(scheduler.cancel(id).await);
        assert!(!scheduler.cancel(id).await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending() {
        let queue = Arc::new(JobQueue::in_memory());
        let scheduler = JobScheduler::new(queue.clone());

        scheduler.schedule_once(Duration::from_secs(5), queued("a")).await;
        scheduler.shutdown();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
        assert!(scheduler.list().await.is_empty());
    }
}
