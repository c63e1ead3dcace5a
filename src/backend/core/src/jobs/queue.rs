//! Job queue with dead letter handling.
//!
//! The queue carries deliveries (a job id plus the channel that produced it)
//! from dispatchers, the delayed scheduler and the stuck-job monitor to the
//! worker pool. Delivery order is FIFO.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

use super::job::JobId;
use crate::error::{ErrorCode, MediascribeError, Result};
use crate::telemetry::JobMetrics;

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queue size (0 = unlimited)
    pub max_size: usize,
    /// Whether to enable the dead letter queue
    pub enable_dead_letter: bool,
    /// Maximum items in the dead letter queue
    pub dead_letter_max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            enable_dead_letter: true,
            dead_letter_max_size: 1000,
        }
    }
}

/// One delivery of a job to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: JobId,
    /// Channel that produced this delivery (`queue`, `delayed`, `monitor`)
    pub channel: String,
    /// When the job was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(job_id: JobId, channel: impl Into<String>) -> Self {
        Self {
            job_id,
            channel: channel.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Deliveries waiting to be picked up
    pub pending: usize,
    /// Deliveries accepted since start
    pub enqueued: u64,
    /// Deliveries handed to workers since start
    pub dequeued: u64,
    /// Jobs given up on
    pub dead_letter: usize,
}

/// Dead letter queue for jobs that could not be delivered.
#[derive(Debug)]
pub struct DeadLetterQueue {
    jobs: VecDeque<QueuedJob>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_size,
        }
    }

    pub fn push(&mut self, job: QueuedJob) {
        if self.jobs.len() >= self.max_size {
            self.jobs.pop_front();
        }
        self.jobs.push_back(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueuedJob> {
        self.jobs.iter().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<QueuedJob> {
        self.jobs.drain(..).collect()
    }
}

/// Trait for queue backends.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Enqueue a delivery.
    async fn enqueue(&self, job: QueuedJob) -> Result<()>;

    /// Dequeue the oldest delivery, waiting up to `timeout` for one to arrive.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>>;

    /// Get the current queue length.
    async fn len(&self) -> Result<usize>;

    /// Job ids of every delivery still waiting, oldest first.
    async fn pending_job_ids(&self) -> Result<Vec<JobId>>;

    /// Check if the queue is empty.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Get the backend name.
    fn name(&self) -> &'static str;
}

/// In-memory queue backend.
pub struct InMemoryQueueBackend {
    queue: Mutex<VecDeque<QueuedJob>>,
    notify: Notify,
    max_size: usize,
}

impl InMemoryQueueBackend {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_size,
        }
    }
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new(QueueConfig::default().max_size)
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        {
            let mut queue = self.queue.lock();
            if self.max_size > 0 && queue.len() >= self.max_size {
                return Err(MediascribeError::new(
                    ErrorCode::QueueError,
                    format!("Job queue is full ({} pending)", queue.len()),
                ));
            }
            queue.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.queue.lock().pop_front() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.queue.lock().len())
    }

    async fn pending_job_ids(&self) -> Result<Vec<JobId>> {
        Ok(self.queue.lock().iter().map(|job| job.job_id.clone()).collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis-backed queue backend.
pub struct RedisQueueBackend {
    client: redis::Client,
    queue_key: String,
}

impl RedisQueueBackend {
    /// Create a new Redis queue backend.
    ///
    /// # Arguments
    /// * `client` - A Redis client
    /// * `queue_key` - The Redis list key to use (e.g. `"mediascribe:queue"`)
    pub fn new(client: redis::Client, queue_key: impl Into<String>) -> Self {
        Self {
            client,
            queue_key: queue_key.into(),
        }
    }

    /// Obtain an async multiplexed connection from the Redis client.
    async fn get_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                MediascribeError::with_internal(
                    ErrorCode::StoreConnectionFailed,
                    "Failed to get Redis connection for job queue",
                    e.to_string(),
                )
            })
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        let serialized = serde_json::to_string(&job)?;

        let mut conn = self.get_conn().await?;
        redis::cmd("RPUSH")
            .arg(&self.queue_key)
            .arg(&serialized)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| {
                MediascribeError::with_internal(
                    ErrorCode::QueueError,
                    "Failed to enqueue job to Redis",
                    e.to_string(),
                )
            })?;

        tracing::debug!(queue = %self.queue_key, job_id = %job.job_id, "Job enqueued");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>> {
        let mut conn = self.get_conn().await?;

        let result: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.queue_key)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                MediascribeError::with_internal(
                    ErrorCode::QueueError,
                    "Failed to dequeue job from Redis",
                    e.to_string(),
                )
            })?;

        match result {
            Some((_key, value)) => {
                let job: QueuedJob = serde_json::from_str(&value)?;
                tracing::debug!(queue = %self.queue_key, job_id = %job.job_id, "Job dequeued");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.get_conn().await?;
        let length: usize = redis::cmd("LLEN")
            .arg(&self.queue_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                MediascribeError::with_internal(
                    ErrorCode::QueueError,
                    "Failed to get Redis queue length",
                    e.to_string(),
                )
            })?;

        Ok(length)
    }

    async fn pending_job_ids(&self) -> Result<Vec<JobId>> {
        let mut conn = self.get_conn().await?;
        let entries: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.queue_key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                MediascribeError::with_internal(
                    ErrorCode::QueueError,
                    "Failed to list Redis queue entries",
                    e.to_string(),
                )
            })?;

        Ok(entries
            .iter()
            .filter_map(|raw| serde_json::from_str::<QueuedJob>(raw).ok())
            .map(|job| job.job_id)
            .collect())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// The main job queue.
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    dead_letter: RwLock<DeadLetterQueue>,
    config: QueueConfig,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

impl JobQueue {
    /// Create a new job queue with the given backend.
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        let dlq = DeadLetterQueue::new(config.dead_letter_max_size);
        Self {
            backend,
            dead_letter: RwLock::new(dlq),
            config,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        }
    }

    /// Create a new in-memory job queue.
    pub fn in_memory() -> Self {
        let config = QueueConfig::default();
        Self::new(Arc::new(InMemoryQueueBackend::new(config.max_size)), config)
    }

    /// Enqueue a delivery.
    pub async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        self.backend.enqueue(job).await?;
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if let Ok(depth) = self.backend.len().await {
            JobMetrics::set_queue_depth(depth);
        }
        Ok(())
    }

    /// Dequeue the next delivery, waiting up to `timeout`.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>> {
        let job = self.backend.dequeue(timeout).await?;
        if job.is_some() {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        Ok(job)
    }

    /// Ids of jobs with a delivery waiting in the queue.
    pub async fn pending_job_ids(&self) -> Result<HashSet<JobId>> {
        Ok(self.backend.pending_job_ids().await?.into_iter().collect())
    }

    /// Move a job to the dead letter queue.
    pub async fn dead_letter(&self, job: QueuedJob) {
        if self.config.enable_dead_letter {
            tracing::warn!(job_id = %job.job_id, channel = %job.channel, "Job dead-lettered");
            JobMetrics::record_dead_lettered();
            self.dead_letter.write().await.push(job);
        }
    }

    /// Jobs currently in the dead letter queue.
    pub async fn dead_letters(&self) -> Vec<QueuedJob> {
        self.dead_letter.read().await.snapshot()
    }

    /// Get queue statistics.
    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.backend.len().await?,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dead_letter: self.dead_letter.read().await.len(),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(raw: &str) -> QueuedJob {
        QueuedJob::new(JobId::parse(raw).unwrap(), "queue")
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::in_memory();
        queue.enqueue(job("a")).await.unwrap();
        queue.enqueue(job("b")).await.unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.dequeue(timeout).await.unwrap().unwrap().job_id.as_str(), "a");
        assert_eq!(queue.dequeue(timeout).await.unwrap().unwrap().job_id.as_str(), "b");
        assert!(queue.dequeue(timeout).await.unwrap().is_none());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.dequeued, 2);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(JobQueue::in_memory());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        queue.enqueue(job("late")).await.unwrap();

        let received = consumer.await.unwrap().unwrap();
        assert_eq!(received.unwrap().job_id.as_str(), "late");
    }

    #[tokio::test]
    async fn test_pending_job_ids_lists_waiting_deliveries() {
        let queue = JobQueue::in_memory();
        queue.enqueue(job("a")).await.unwrap();
        queue.enqueue(job("b")).await.unwrap();
        queue.enqueue(job("a")).await.unwrap();
        queue.dequeue(Duration::ZERO).await.unwrap();

        let pending = queue.pending_job_ids().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.contains(&JobId::parse("a").unwrap()));
        assert!(pending.contains(&JobId::parse("b").unwrap()));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let backend = Arc::new(InMemoryQueueBackend::new(1));
        let queue = JobQueue::new(backend, QueueConfig::default());
        queue.enqueue(job("a")).await.unwrap();
        let error = queue.enqueue(job("b")).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::QueueError);
    }

    #[tokio::test]
    async fn test_dead_letter_bounded() {
        let config = QueueConfig {
            dead_letter_max_size: 2,
            ..Default::default()
        };
        let queue = JobQueue::new(Arc::new(InMemoryQueueBackend::default()), config);
        queue.dead_letter(job("a")).await;
        queue.dead_letter(job("b")).await;
        queue.dead_letter(job("c")).await;

        let ids: Vec<String> = queue
            .dead_letters()
            .await
            .into_iter()
            .map(|j| j.job_id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(queue.stats().await.unwrap().dead_letter, 2);
    }
}
