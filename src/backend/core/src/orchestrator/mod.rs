//! Orchestrator - the service facade.
//!
//! Wires the store, queue, channels, dispatcher, runner, worker and monitor
//! together from configuration and exposes the operations the HTTP API and
//! CLI need.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::JobsConfig;
use crate::error::Result;
use crate::jobs::{
    BulkCoordinator, BulkId, BulkKind, BulkOperation, BulkTracker, DelayedChannel,
    DeliveryChannel, DispatchReceipt, Dispatcher, HttpSelfCallChannel, JobId, JobProcessor,
    JobQueue, JobRunner, JobScheduler, JobStatus, JobStore, JobWorker, KvStore, LeaseManager,
    MonitorConfig, MonitorHandle, QueueChannel, QueueStats, RawSocketChannel, StuckJobMonitor,
    StuckJobSweep, WorkerConfig, WorkerHandle, WorkerStats,
};

/// Point-in-time view of the running service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub store_backend: String,
    pub queue_backend: String,
    pub queue: QueueStats,
    pub channels: Vec<String>,
    pub worker_running: bool,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
    pub jobs_active: u64,
    pub scheduled_deliveries: usize,
}

struct Running {
    worker: WorkerHandle,
    monitor: Option<MonitorHandle>,
}

/// The job orchestration service.
pub struct Orchestrator {
    config: JobsConfig,
    store: JobStore,
    queue: Arc<JobQueue>,
    scheduler: Arc<JobScheduler>,
    dispatcher: Arc<Dispatcher>,
    runner: Arc<JobRunner>,
    bulk: BulkCoordinator,
    sweep: StuckJobSweep,
    monitor: Arc<StuckJobMonitor>,
    worker_stats: Mutex<WorkerStats>,
    running: Mutex<Option<Running>>,
}

impl Orchestrator {
    /// Build the service. Nothing runs until [`Orchestrator::start`].
    ///
    /// `public_url` is the base URL this server is reachable on; the
    /// self-call channels post to it.
    pub fn new(
        config: JobsConfig,
        public_url: &str,
        kv: Arc<dyn KvStore>,
        queue: Arc<JobQueue>,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<Self> {
        let store = JobStore::new(kv, config.retention);
        let leases = LeaseManager::new(store.clone(), config.lease_ttl, config.worker_name.clone());
        let scheduler = Arc::new(JobScheduler::new(queue.clone()));

        let channels = build_channels(&config, public_url, &queue, &scheduler)?;
        let tracker = Arc::new(BulkTracker::new(store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            tracker.clone(),
            processor.clone(),
            channels,
            config.chain_delay,
        ));
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            leases.clone(),
            processor,
            dispatcher.clone(),
            config.stuck_threshold,
        ));
        let monitor = Arc::new(StuckJobMonitor::new(
            MonitorConfig {
                interval: config.monitor_interval,
                stuck_threshold: config.stuck_threshold,
                max_redeliveries: config.max_redeliveries,
            },
            store.clone(),
            leases.clone(),
            queue.clone(),
            scheduler.clone(),
            dispatcher.clone(),
        ));

        tracing::info!(
            store = store.backend_name(),
            queue = queue.backend_name(),
            channels = ?dispatcher.channel_names(),
            "Orchestrator configured"
        );

        Ok(Self {
            bulk: BulkCoordinator::new(tracker, dispatcher.clone()),
            sweep: StuckJobSweep::new(store.clone(), leases),
            worker_stats: Mutex::new(WorkerStats::new()),
            running: Mutex::new(None),
            config,
            store,
            queue,
            scheduler,
            dispatcher,
            runner,
            monitor,
        })
    }

    /// Start the worker and, when enabled, the stuck-job monitor.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let worker = JobWorker::new(WorkerConfig {
            concurrency: self.config.concurrency,
            name: self.config.worker_name.clone(),
            ..WorkerConfig::default()
        })
        .start(self.queue.clone(), self.runner.clone());
        *self.worker_stats.lock() = worker.stats().clone();

        let monitor = self
            .config
            .monitor_enabled
            .then(|| self.monitor.clone().start());

        *running = Some(Running { worker, monitor });
    }

    /// Stop background tasks and wait for in-flight jobs.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        let running = self.running.lock().take();
        if let Some(running) = running {
            if let Some(monitor) = running.monitor {
                monitor.stop().await;
            }
            running.worker.stop().await;
        }
        tracing::info!("Orchestrator stopped");
    }

    /// Dispatch one job.
    pub async fn dispatch_single(&self, job_id: &str) -> Result<DispatchReceipt> {
        let job_id = JobId::parse(job_id)?;
        self.dispatcher.dispatch(&job_id).await
    }

    /// Submit a bulk operation.
    pub async fn submit_bulk(&self, job_ids: Vec<String>, kind: BulkKind) -> Result<BulkId> {
        let job_ids = job_ids
            .into_iter()
            .map(JobId::parse)
            .collect::<Result<Vec<_>>>()?;
        self.bulk.submit(job_ids, kind).await
    }

    /// Current status of a job, `unknown` when nothing is recorded.
    pub async fn poll_status(&self, job_id: &str) -> Result<JobStatus> {
        let job_id = JobId::parse(job_id)?;
        Ok(self
            .store
            .get_status(&job_id)
            .await?
            .unwrap_or_else(|| JobStatus::unknown(job_id)))
    }

    pub async fn poll_bulk(&self, bulk_id: &str) -> Result<BulkOperation> {
        self.bulk.poll(&BulkId::from_raw(bulk_id)).await
    }

    /// Delete every processing record. Returns how many were removed.
    pub async fn clear_all_stuck(&self) -> Result<usize> {
        self.sweep.clear_all_stuck().await
    }

    /// Run a job in the background, bypassing the queue.
    pub fn run_now(&self, job_id: &str) -> Result<()> {
        let job_id = JobId::parse(job_id)?;
        let runner = self.runner.clone();
        tokio::spawn(async move {
            runner.run(&job_id).await;
        });
        Ok(())
    }

    /// Check the store is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    pub async fn stats(&self) -> Result<OrchestratorStats> {
        let queue = self.queue.stats().await?;
        let worker = self.worker_stats.lock().clone();
        let worker_running = self.running.lock().is_some();

        Ok(OrchestratorStats {
            store_backend: self.store.backend_name().to_string(),
            queue_backend: self.queue.backend_name().to_string(),
            queue,
            channels: self
                .dispatcher
                .channel_names()
                .into_iter()
                .map(String::from)
                .collect(),
            worker_running,
            jobs_processed: worker.processed(),
            jobs_succeeded: worker.succeeded(),
            jobs_failed: worker.failed(),
            jobs_skipped: worker.skipped(),
            jobs_active: worker.active(),
            scheduled_deliveries: self.scheduler.list().await.len(),
        })
    }

    /// The monitor, for running a check on demand.
    pub fn monitor(&self) -> &Arc<StuckJobMonitor> {
        &self.monitor
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

fn build_channels(
    config: &JobsConfig,
    public_url: &str,
    queue: &Arc<JobQueue>,
    scheduler: &Arc<JobScheduler>,
) -> Result<Vec<Arc<dyn DeliveryChannel>>> {
    let channels = &config.channels;
    let mut built: Vec<Arc<dyn DeliveryChannel>> =
        vec![Arc::new(QueueChannel::new(queue.clone(), scheduler.clone()))];

    if channels.delayed {
        built.push(Arc::new(DelayedChannel::new(
            scheduler.clone(),
            channels.delayed_offsets.clone(),
        )));
    }
    if channels.http_self_call {
        built.push(Arc::new(HttpSelfCallChannel::new(
            public_url,
            channels.self_call_timeout,
        )?));
    }
    if channels.raw_socket {
        built.push(Arc::new(RawSocketChannel::new(
            public_url,
            channels.self_call_timeout,
        )?));
    }
    Ok(built)
}
