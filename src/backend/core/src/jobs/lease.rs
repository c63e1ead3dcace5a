//! Job leases.
//!
//! A lease is a time-bounded claim on a job id held by one runner. It is
//! acquired with set-if-absent, renewed whenever the job reports progress and
//! released once the terminal status is written. A runner that dies simply
//! stops renewing, and the lease expires after its TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::job::JobId;
use super::store::JobStore;
use crate::error::{ErrorCode, MediascribeError, Result};

/// An acquired lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLease {
    pub lease_id: Uuid,
    pub job_id: JobId,
    /// Worker name of the holder
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Acquires, renews and releases leases in the job store.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    store: JobStore,
    ttl: Duration,
    owner: String,
}

impl LeaseManager {
    pub fn new(store: JobStore, ttl: Duration, owner: impl Into<String>) -> Self {
        Self {
            store,
            ttl,
            owner: owner.into(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Try to claim `job_id`. Returns `None` if another holder has a live lease.
    pub async fn acquire(&self, job_id: &JobId) -> Result<Option<JobLease>> {
        let lease_id = Uuid::new_v4();
        let acquired = self
            .store
            .try_acquire_lease(job_id, &lease_id.to_string(), self.ttl)
            .await?;

        if !acquired {
            tracing::debug!(job_id = %job_id, "Lease already held");
            return Ok(None);
        }

        let now = Utc::now();
        let lease = JobLease {
            lease_id,
            job_id: job_id.clone(),
            owner: self.owner.clone(),
            acquired_at: now,
            expires_at: self.expiry_from(now),
        };
        tracing::debug!(job_id = %job_id, lease_id = %lease_id, owner = %self.owner, "Lease acquired");
        Ok(Some(lease))
    }

    /// Extend a held lease by a full TTL.
    ///
    /// Fails with `LeaseConflict` when the lease has expired or been taken over.
    pub async fn renew(&self, lease: &mut JobLease) -> Result<()> {
        let renewed = self
            .store
            .renew_lease(&lease.job_id, &lease.lease_id.to_string(), self.ttl)
            .await?;

        if !renewed {
            return Err(MediascribeError::new(
                ErrorCode::LeaseConflict,
                format!("Lease on job {} is no longer held", lease.job_id),
            )
            .with_context("lease_id", lease.lease_id));
        }

        lease.expires_at = self.expiry_from(Utc::now());
        Ok(())
    }

    /// Release a held lease. Returns `false` if it was no longer ours.
    pub async fn release(&self, lease: &JobLease) -> Result<bool> {
        let released = self
            .store
            .release_lease(&lease.job_id, &lease.lease_id.to_string())
            .await?;
        tracing::debug!(job_id = %lease.job_id, lease_id = %lease.lease_id, released, "Lease released");
        Ok(released)
    }

    /// Whether any runner currently holds a lease on `job_id`.
    pub async fn is_held(&self, job_id: &JobId) -> Result<bool> {
        Ok(self.store.current_lease(job_id).await?.is_some())
    }

    /// Drop a lease regardless of holder.
    pub async fn force_release(&self, job_id: &JobId) -> Result<bool> {
        self.store.delete_lease(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(ttl: Duration) -> LeaseManager {
        LeaseManager::new(JobStore::in_memory(Duration::from_secs(3600)), ttl, "test-worker")
    }

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let leases = manager(Duration::from_secs(60));
        let first = leases.acquire(&id("a")).await.unwrap();
        assert!(first.is_some());
        assert!(leases.acquire(&id("a")).await.unwrap().is_none());
        assert!(leases.acquire(&id("b")).await.unwrap().is_some());
        assert!(leases.is_held(&id("a")).await.unwrap());
        assert_eq!(first.unwrap().owner, "test-worker");
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let leases = manager(Duration::from_secs(60));
        let lease = leases.acquire(&id("a")).await.unwrap().unwrap();
        assert!(leases.release(&lease).await.unwrap());
        assert!(!leases.release(&lease).await.unwrap());
        assert!(!leases.is_held(&id("a")).await.unwrap());
        assert!(leases.acquire(&id("a")).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_can_be_taken_over() {
        let leases = manager(Duration::from_secs(10));
        let mut stale = leases.acquire(&id("a")).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let fresh = leases.acquire(&id("a")).await.unwrap().unwrap();
        assert_ne!(stale.lease_id, fresh.lease_id);

        let error = leases.renew(&mut stale).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::LeaseConflict);
        assert!(!leases.release(&stale).await.unwrap());
        assert!(leases.is_held(&id("a")).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_extends_lease() {
        let leases = manager(Duration::from_secs(10));
        let mut lease = leases.acquire(&id("a")).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        leases.renew(&mut lease).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;

        assert!(leases.is_held(&id("a")).await.unwrap());
        assert!(leases.acquire(&id("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_force_release() {
        let leases = manager(Duration::from_secs(60));
        leases.acquire(&id("a")).await.unwrap().unwrap();
        assert!(leases.force_release(&id("a")).await.unwrap());
        assert!(!leases.is_held(&id("a")).await.unwrap());
    }
}
