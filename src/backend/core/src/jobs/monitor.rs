//! Stuck-job handling.
//!
//! [`StuckJobMonitor`] periodically looks for processing records that are
//! older than the stuck threshold, have no live lease and have no delivery
//! waiting in the queue or the scheduler. Those jobs were dispatched but the
//! delivery was lost, or their runner died. Each is redelivered a bounded
//! number of times and then failed and dead-lettered.
//!
//! Jobs that are only waiting for a free worker are not stuck. Their records
//! are extended on every pass so they survive a long backlog.
//!
//! [`StuckJobSweep`] is the operator's manual reset: it deletes every
//! processing record outright.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::Dispatcher;
use super::job::{JobId, JobState};
use super::lease::LeaseManager;
use super::queue::{JobQueue, QueuedJob};
use super::scheduler::JobScheduler;
use super::store::JobStore;
use crate::error::Result;
use crate::telemetry::metrics::JobMetrics;

/// Reason stored on jobs the monitor gives up on.
pub const UNREACHABLE_REASON: &str = "job was never picked up by a worker (dispatch unreachable)";

// ═══════════════════════════════════════════════════════════════════════════════
// Manual sweep
// ═══════════════════════════════════════════════════════════════════════════════

/// Deletes every processing status record.
#[derive(Debug, Clone)]
pub struct StuckJobSweep {
    store: JobStore,
    leases: LeaseManager,
}

impl StuckJobSweep {
    pub fn new(store: JobStore, leases: LeaseManager) -> Self {
        Self { store, leases }
    }

    /// Delete all processing records and their leases. Terminal records are
    /// left alone. Returns how many records were removed.
    pub async fn clear_all_stuck(&self) -> Result<usize> {
        let mut cleared = 0;

        for job_id in self.store.scan_status_ids().await? {
            let Some(status) = self.store.get_status(&job_id).await? else {
                continue;
            };
            if status.state != JobState::Processing {
                continue;
            }

            if self.store.delete_status(&job_id).await? {
                cleared += 1;
            }
            self.leases.force_release(&job_id).await?;
        }

        tracing::info!(cleared, "Cleared stuck jobs");
        JobMetrics::record_stuck_cleared(cleared);
        Ok(cleared)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Monitor
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub stuck_threshold: Duration,
    /// Redeliveries before a stuck job is failed
    pub max_redeliveries: u32,
}

/// Outcome of one monitor pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub redelivered: Vec<JobId>,
    pub dead_lettered: Vec<JobId>,
}

/// Redelivers and eventually fails abandoned jobs.
pub struct StuckJobMonitor {
    config: MonitorConfig,
    store: JobStore,
    leases: LeaseManager,
    queue: Arc<JobQueue>,
    scheduler: Arc<JobScheduler>,
    dispatcher: Arc<Dispatcher>,
    redeliveries: DashMap<JobId, u32>,
}

impl StuckJobMonitor {
    pub fn new(
        config: MonitorConfig,
        store: JobStore,
        leases: LeaseManager,
        queue: Arc<JobQueue>,
        scheduler: Arc<JobScheduler>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            store,
            leases,
            queue,
            scheduler,
            dispatcher,
            redeliveries: DashMap::new(),
        }
    }

    /// Run one pass over all status records.
    pub async fn check_once(&self) -> Result<MonitorReport> {
        let now = chrono::Utc::now();
        let mut report = MonitorReport::default();
        let mut stuck = HashSet::new();
        let mut waiting = self.queue.pending_job_ids().await?;
        waiting.extend(self.scheduler.pending_job_ids().await);

        for job_id in self.store.scan_status_ids().await? {
            let Some(mut status) = self.store.get_status(&job_id).await? else {
                continue;
            };
            if !status.is_stale(now, self.config.stuck_threshold) {
                continue;
            }
            if self.leases.is_held(&job_id).await? {
                continue;
            }

            stuck.insert(job_id.clone());
            if waiting.contains(&job_id) {
                self.store.touch_status(&status).await?;
                continue;
            }

            let attempts = self.redeliveries.get(&job_id).map(|n| *n).unwrap_or(0);

            if attempts < self.config.max_redeliveries {
                self.queue.enqueue(QueuedJob::new(job_id.clone(), "monitor")).await?;
                self.redeliveries.insert(job_id.clone(), attempts + 1);
                JobMetrics::record_redelivered();
                tracing::warn!(job_id = %job_id, redelivery = attempts + 1, "Redelivering stuck job");
                report.redelivered.push(job_id);
                continue;
            }

            status.mark_failed(format!("Failed: {}", UNREACHABLE_REASON));
            self.store.put_status(&status).await?;
            self.queue.dead_letter(QueuedJob::new(job_id.clone(), "monitor")).await;
            self.redeliveries.remove(&job_id);
            if let Err(e) = self.dispatcher.finish(&job_id, false, UNREACHABLE_REASON).await {
                e.log();
            }
            report.dead_lettered.push(job_id);
        }

        self.redeliveries.retain(|job_id, _| stuck.contains(job_id));

        if !report.redelivered.is_empty() || !report.dead_lettered.is_empty() {
            tracing::info!(
                redelivered = report.redelivered.len(),
                dead_lettered = report.dead_lettered.len(),
                "Stuck-job check finished"
            );
        }
        Ok(report)
    }

    /// Start checking on the configured interval.
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let monitor = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::info!(
                interval = ?monitor.config.interval,
                stuck_threshold = ?monitor.config.stuck_threshold,
                "Stuck-job monitor started"
            );

            loop {
                tokio::select! {
                    _ = async { let _ = shutdown_rx.wait_for(|stopped| *stopped).await; } => break,
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.check_once().await {
                            e.log();
                        }
                    }
                }
            }

            tracing::info!("Stuck-job monitor stopped");
        });

        MonitorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle for stopping a running monitor.
pub struct MonitorHandle {
    shutdown: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
