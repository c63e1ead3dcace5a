//! Bulk operations.
//!
//! [`BulkTracker`] owns the bulk records and serializes every outcome update
//! for a bulk behind a per-bulk lock, so concurrent member completions are
//! never lost. [`BulkCoordinator`] is the submission and polling surface.

use dashmap::DashMap;
use std::sync::Arc;

use super::dispatcher::Dispatcher;
use super::job::{BulkId, BulkKind, BulkOperation, JobId};
use super::store::JobStore;
use crate::error::{MediascribeError, Result};
use crate::telemetry::metrics::JobMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Tracker
// ═══════════════════════════════════════════════════════════════════════════════

/// Stores bulk records and applies member outcomes to them.
pub struct BulkTracker {
    store: JobStore,
    locks: DashMap<BulkId, Arc<tokio::sync::Mutex<()>>>,
}

impl BulkTracker {
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Persist a new bulk record and its member index.
    pub async fn create(&self, kind: BulkKind, job_ids: Vec<JobId>) -> Result<BulkOperation> {
        let bulk = BulkOperation::new(kind, job_ids);
        self.store.put_bulk(&bulk).await?;

        tracing::info!(
            bulk_id = %bulk.bulk_id,
            kind = kind.as_str(),
            total = bulk.total,
            "Bulk operation created"
        );
        JobMetrics::record_bulk_submitted(kind.as_str());
        Ok(bulk)
    }

    pub async fn get(&self, bulk_id: &BulkId) -> Result<Option<BulkOperation>> {
        self.store.get_bulk(bulk_id).await
    }

    fn lock_for(&self, bulk_id: &BulkId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(bulk_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Count a member's terminal outcome against its bulk.
    ///
    /// Returns the next member to dispatch when the job was the current
    /// member of a download bulk. Jobs outside any bulk, and members already
    /// counted, are ignored.
    pub async fn record_outcome(
        &self,
        job_id: &JobId,
        success: bool,
        message: &str,
    ) -> Result<Option<JobId>> {
        let Some(bulk_id) = self.store.get_bulk_member(job_id).await? else {
            return Ok(None);
        };

        let lock = self.lock_for(&bulk_id);
        let _guard = lock.lock().await;

        let Some(mut bulk) = self.store.get_bulk(&bulk_id).await? else {
            tracing::warn!(bulk_id = %bulk_id, job_id = %job_id, "Bulk record expired before member finished");
            drop(_guard);
            self.locks.remove(&bulk_id);
            return Ok(None);
        };

        let was_current =
            bulk.kind == BulkKind::Download && bulk.current_job_id.as_ref() == Some(job_id);

        if !bulk.record(job_id, success, message) {
            tracing::debug!(bulk_id = %bulk_id, job_id = %job_id, "Bulk member already counted");
            return Ok(None);
        }

        let next = if was_current { bulk.advance() } else { None };
        self.store.put_bulk(&bulk).await?;

        tracing::debug!(
            bulk_id = %bulk_id,
            job_id = %job_id,
            success,
            completed = bulk.completed,
            failed = bulk.failed,
            total = bulk.total,
            "Bulk member resolved"
        );

        if bulk.is_complete() {
            tracing::info!(
                bulk_id = %bulk_id,
                completed = bulk.completed,
                failed = bulk.failed,
                "Bulk operation completed"
            );
            JobMetrics::record_bulk_completed(bulk.kind.as_str());
            self.locks.remove(&bulk_id);
        }

        Ok(next)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Coordinator
// ═══════════════════════════════════════════════════════════════════════════════

/// Submits bulk operations and reports their progress.
pub struct BulkCoordinator {
    tracker: Arc<BulkTracker>,
    dispatcher: Arc<Dispatcher>,
}

impl BulkCoordinator {
    pub fn new(tracker: Arc<BulkTracker>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { tracker, dispatcher }
    }

    /// Create a bulk operation and start it.
    ///
    /// Transcribe bulks dispatch every member at once. Download bulks
    /// dispatch only the first member; the rest are chained as each one
    /// finishes. Dispatch failures of individual members are logged and left
    /// to the stuck-job monitor.
    pub async fn submit(&self, job_ids: Vec<JobId>, kind: BulkKind) -> Result<BulkId> {
        if job_ids.is_empty() {
            return Err(MediascribeError::validation("job_ids must not be empty"));
        }

        let bulk = self.tracker.create(kind, job_ids).await?;

        match kind {
            BulkKind::Transcribe => {
                let receipts = self.dispatcher.dispatch_batch(&bulk.job_ids).await;
                for (job_id, receipt) in bulk.job_ids.iter().zip(receipts) {
                    if let Err(e) = receipt {
                        tracing::warn!(bulk_id = %bulk.bulk_id, job_id = %job_id, error = %e, "Bulk member dispatch failed");
                    }
                }
            }
            BulkKind::Download => {
                if let Some(first) = bulk.job_ids.first() {
                    if let Err(e) = self.dispatcher.dispatch(first).await {
                        tracing::warn!(bulk_id = %bulk.bulk_id, job_id = %first, error = %e, "Bulk member dispatch failed");
                    }
                }
            }
        }

        Ok(bulk.bulk_id)
    }

    /// Current record of a bulk operation.
    pub async fn poll(&self, bulk_id: &BulkId) -> Result<BulkOperation> {
        self.tracker
            .get(bulk_id)
            .await?
            .ok_or_else(|| MediascribeError::bulk_not_found(bulk_id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::BulkStatus;
    use std::time::Duration;

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    fn tracker() -> BulkTracker {
        BulkTracker::new(JobStore::in_memory(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn test_create_indexes_members() {
        let tracker = tracker();
        let bulk = tracker
            .create(BulkKind::Transcribe, vec![id("a"), id("b"), id("a")])
            .await
            .unwrap();

        assert_eq!(bulk.total, 2);
        assert_eq!(
            tracker.store.get_bulk_member(&id("b")).await.unwrap(),
            Some(bulk.bulk_id.clone())
        );
    }

    #[tokio::test]
    async fn test_record_outcome_counts_once() {
        let tracker = tracker();
        let bulk = tracker
            .create(BulkKind::Transcribe, vec![id("a"), id("b")])
            .await
            .unwrap();

        tracker.record_outcome(&id("a"), false, "boom").await.unwrap();
        tracker.record_outcome(&id("a"), true, "ok").await.unwrap();
        tracker.record_outcome(&id("b"), true, "ok").await.unwrap();

        let bulk = tracker.get(&bulk.bulk_id).await.unwrap().unwrap();
        assert_eq!(bulk.completed, 1);
        assert_eq!(bulk.failed, 1);
        assert_eq!(bulk.status, BulkStatus::Completed);
        assert_eq!(bulk.errors.get("a").map(String::as_str), Some("boom"));
    }

    #[tokio::test]
    async fn test_concurrent_outcomes_are_not_lost() {
        let tracker = Arc::new(tracker());
        let ids: Vec<JobId> = (0..20).map(|i| id(&format!("job-{}", i))).collect();
        let bulk = tracker.create(BulkKind::Transcribe, ids.clone()).await.unwrap();

        let mut handles = Vec::new();
        for (i, job_id) in ids.into_iter().enumerate() {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.record_outcome(&job_id, i % 3 != 0, "failed").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let bulk = tracker.get(&bulk.bulk_id).await.unwrap().unwrap();
        assert_eq!(bulk.completed + bulk.failed, 20);
        assert_eq!(bulk.failed, 7);
        assert!(bulk.is_complete());
    }

    #[tokio::test]
    async fn test_download_returns_next_only_for_current_member() {
        let tracker = tracker();
        let bulk = tracker
            .create(BulkKind::Download, vec![id("a"), id("b"), id("c")])
            .await
            .unwrap();

        // A member resolved out of turn does not move the cursor.
        assert_eq!(tracker.record_outcome(&id("b"), false, "x").await.unwrap(), None);
        assert_eq!(tracker.record_outcome(&id("a"), true, "ok").await.unwrap(), Some(id("c")));

        let bulk = tracker.get(&bulk.bulk_id).await.unwrap().unwrap();
        assert_eq!(bulk.current_job_id, Some(id("c")));
        assert_eq!(bulk.current_index, 2);
    }

    #[tokio::test]
    async fn test_outcome_for_missing_bulk_drops_its_lock() {
        let tracker = tracker();
        let orphan = BulkId::from_raw("gone".to_string());
        tracker.store.set_bulk_member(&id("a"), &orphan).await.unwrap();

        assert_eq!(tracker.record_outcome(&id("a"), true, "ok").await.unwrap(), None);
        assert!(tracker.locks.is_empty());
    }

    #[tokio::test]
    async fn test_outcome_outside_bulk_is_ignored() {
        let tracker = tracker();
        assert_eq!(tracker.record_outcome(&id("solo"), true, "ok").await.unwrap(), None);
    }
}
