//! Delivery channels.
//!
//! A channel is one path by which a dispatched job reaches a runner. Firing a
//! channel must return quickly; the actual run happens elsewhere. The queue
//! channel is the reliable primary path. The others are optional redundant
//! paths, which is safe because the runner is lease-guarded.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::job::JobId;
use super::queue::{JobQueue, QueuedJob};
use super::scheduler::JobScheduler;
use crate::error::{MediascribeError, Result};

/// One path by which a dispatched job reaches a runner.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Stable name used in logs, metrics and queued deliveries.
    fn name(&self) -> &'static str;

    /// Fire the channel for `job_id`, delivering no earlier than `delay` from now.
    async fn fire(&self, job_id: &JobId, delay: Duration) -> Result<()>;
}

/// Path of the internal run endpoint for a job.
pub fn internal_run_path(job_id: &JobId) -> String {
    format!("/internal/jobs/{}/run", job_id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Enqueue onto the in-process job queue, through the scheduler when delayed.
pub struct QueueChannel {
    queue: Arc<JobQueue>,
    scheduler: Arc<JobScheduler>,
}

impl QueueChannel {
    pub fn new(queue: Arc<JobQueue>, scheduler: Arc<JobScheduler>) -> Self {
        Self { queue, scheduler }
    }
}

#[async_trait]
impl DeliveryChannel for QueueChannel {
    fn name(&self) -> &'static str {
        "queue"
    }

    async fn fire(&self, job_id: &JobId, delay: Duration) -> Result<()> {
        let job = QueuedJob::new(job_id.clone(), self.name());
        if delay.is_zero() {
            self.queue.enqueue(job).await
        } else {
            self.scheduler.schedule_once(delay, job).await;
            Ok(())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Delayed redelivery
// ═══════════════════════════════════════════════════════════════════════════════

/// Schedule extra deliveries at fixed offsets after the dispatch.
pub struct DelayedChannel {
    scheduler: Arc<JobScheduler>,
    offsets: Vec<Duration>,
}

impl DelayedChannel {
    pub fn new(scheduler: Arc<JobScheduler>, offsets: Vec<Duration>) -> Self {
        Self { scheduler, offsets }
    }
}

#[async_trait]
impl DeliveryChannel for DelayedChannel {
    fn name(&self) -> &'static str {
        "delayed"
    }

    async fn fire(&self, job_id: &JobId, delay: Duration) -> Result<()> {
        if self.offsets.is_empty() {
            return Err(MediascribeError::configuration(
                "delayed channel enabled with no offsets",
            ));
        }
        for offset in &self.offsets {
            self.scheduler
                .schedule_once(delay + *offset, QueuedJob::new(job_id.clone(), self.name()))
                .await;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP self-call
// ═══════════════════════════════════════════════════════════════════════════════

/// POST to this server's internal run endpoint and ignore the response.
pub struct HttpSelfCallChannel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSelfCallChannel {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DeliveryChannel for HttpSelfCallChannel {
    fn name(&self) -> &'static str {
        "http_self_call"
    }

    async fn fire(&self, job_id: &JobId, delay: Duration) -> Result<()> {
        let url = format!("{}{}", self.base_url, internal_run_path(job_id));
        let client = self.client.clone();
        let job_id = job_id.clone();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = client.post(&url).send().await {
                tracing::debug!(job_id = %job_id, error = %e, "Self-call did not complete");
            }
        });
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Raw socket
// ═══════════════════════════════════════════════════════════════════════════════

/// Write the self-call request as raw HTTP/1.1 and close without reading.
pub struct RawSocketChannel {
    host: String,
    port: u16,
    timeout: Duration,
}

impl RawSocketChannel {
    /// Build from the server's public base URL (`http://host:port`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(base_url).map_err(|e| {
            MediascribeError::configuration(format!("invalid public_url '{}': {}", base_url, e))
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| MediascribeError::configuration("public_url has no host"))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Self { host, port, timeout })
    }

    fn request(&self, job_id: &JobId) -> String {
        format!(
            "POST {} HTTP/1.1\r\nHost: {}:{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            internal_run_path(job_id),
            self.host,
            self.port
        )
    }

    async fn send(host: String, port: u16, request: String, timeout: Duration) -> Result<()> {
        let mut stream =
            tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await??;
        tokio::time::timeout(timeout, stream.write_all(request.as_bytes())).await??;
        let _ = stream.shutdown().await;
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for RawSocketChannel {
    fn name(&self) -> &'static str {
        "raw_socket"
    }

    async fn fire(&self, job_id: &JobId, delay: Duration) -> Result<()> {
        let request = self.request(job_id);
        let (host, port, timeout) = (self.host.clone(), self.port, self.timeout);
        let job_id = job_id.clone();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = Self::send(host, port, request, timeout).await {
                tracing::warn!(job_id = %job_id, error = %e, "Raw socket delivery failed");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_queue_channel_immediate() {
        let queue = Arc::new(JobQueue::in_memory());
        let scheduler = Arc::new(JobScheduler::new(queue.clone()));
        let channel = QueueChannel::new(queue.clone(), scheduler);

        channel.fire(&id("a"), Duration::ZERO).await.unwrap();
        let delivered = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(delivered.channel, "queue");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_channel_schedules_each_offset() {
        let queue = Arc::new(JobQueue::in_memory());
        let scheduler = Arc::new(JobScheduler::new(queue.clone()));
        let channel = DelayedChannel::new(
            scheduler.clone(),
            vec![Duration::from_secs(2), Duration::from_secs(5)],
        );

        channel.fire(&id("a"), Duration::ZERO).await.unwrap();
        assert_eq!(scheduler.list().await.len(), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_some());
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_some());
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_raw_socket_writes_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let channel =
            RawSocketChannel::new(&format!("http://127.0.0.1:{}", port), Duration::from_secs(1))
                .unwrap();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = String::new();
            socket.read_to_string(&mut buf).await.unwrap();
            buf
        });

        channel.fire(&id("chapter-9"), Duration::ZERO).await.unwrap();
        let request = accept.await.unwrap();
        assert!(request.starts_with("POST /internal/jobs/chapter-9/run HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_raw_socket_fire_does_not_wait_for_connect() {
        // TEST-NET-1 is never routable, so a connect would hang until the timeout.
        let channel =
            RawSocketChannel::new("http://192.0.2.1:8080", Duration::from_secs(30)).unwrap();

        let fired = tokio::time::timeout(
            Duration::from_millis(100),
            channel.fire(&id("a"), Duration::ZERO),
        )
        .await;
        assert!(matches!(fired, Ok(Ok(()))));
    }
}
