//! Job status store.
//!
//! This module provides pluggable key-value backends with per-key expiry:
//! - **InMemoryStore**: DashMap-backed store for tests and single-node development
//! - **RedisStore**: Shared store using Redis, namespaced by a key prefix
//!
//! On top of the raw [`KvStore`] contract, [`JobStore`] owns the key layout
//! and JSON encoding of job statuses, bulk records, the job→bulk reverse
//! index and job leases:
//!
//! ```text
//! status:<job_id>       JobStatus        retention TTL
//! bulk:<bulk_id>        BulkOperation    retention TTL, extended by member writes
//! bulk_member:<job_id>  bulk_id          retention TTL, rewritten with the bulk
//! lease:<job_id>        lease_id         lease TTL, renewed on progress and heartbeat
//! ```

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::counter;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::job::{BulkId, BulkOperation, BulkStatus, JobId, JobStatus};
use crate::error::{ErrorCode, MediascribeError, Result};

const STATUS_PREFIX: &str = "status:";
const BULK_PREFIX: &str = "bulk:";
const BULK_MEMBER_PREFIX: &str = "bulk_member:";
const LEASE_PREFIX: &str = "lease:";

// ═══════════════════════════════════════════════════════════════════════════════
// Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw key-value contract. Last write wins per key; expired keys read as absent.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write a value with a TTL.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Write only if the key is absent (or expired). Returns whether it was written.
    async fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool>;

    /// Delete the key only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Reset a live key's TTL. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Reset the key's TTL only if it currently holds `expected`.
    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;

    /// Check connectivity.
    async fn ping(&self) -> Result<()>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory store. Expired entries are invisible and removed lazily on
/// access or by [`InMemoryStore::purge_expired`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired());
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, "Purged expired store entries");
        }
        purged
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn a task that purges expired entries every `interval`.
    pub fn spawn_purger(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.purge_expired();
                    }
                    None => break,
                }
            }
        })
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, v| v.is_expired());
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, v)| !v.is_expired())
            .unwrap_or(false))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove_if(key, |_, v| !v.is_expired() && v.value == expected)
            .is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() && entry.value == expected => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

const COMPARE_AND_DELETE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const COMPARE_AND_EXPIRE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

/// Redis store backend.
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    compare_and_delete: redis::Script,
    compare_and_expire: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with `PING`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            MediascribeError::with_internal(
                ErrorCode::StoreConnectionFailed,
                "Failed to create Redis client",
                e.to_string(),
            )
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            MediascribeError::with_internal(
                ErrorCode::StoreConnectionFailed,
                "Failed to connect to Redis",
                e.to_string(),
            )
        })?;

        let store = Self {
            conn,
            key_prefix: key_prefix.into(),
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
            compare_and_expire: redis::Script::new(COMPARE_AND_EXPIRE_SCRIPT),
        };
        store.ping().await?;

        info!(url = %url, prefix = %store.key_prefix, "Redis job store connected");
        Ok(store)
    }

    /// Build the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(value)
            .arg("PX")
            .arg(Self::ttl_millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.full_key(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(&self.key_prefix).map(str::to_string)),
            );

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(Self::ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(self.full_key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(self.full_key(key))
            .arg(Self::ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = self
            .compare_and_expire
            .key(self.full_key(key))
            .arg(expected)
            .arg(Self::ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            MediascribeError::with_internal(
                ErrorCode::StoreConnectionFailed,
                "Redis ping failed",
                e.to_string(),
            )
        })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Typed Facade
// ═══════════════════════════════════════════════════════════════════════════════

/// Typed access to job state on top of a [`KvStore`].
#[derive(Clone)]
pub struct JobStore {
    kv: Arc<dyn KvStore>,
    retention: Duration,
}

impl JobStore {
    pub fn new(kv: Arc<dyn KvStore>, retention: Duration) -> Self {
        Self { kv, retention }
    }

    /// In-memory store with the given retention window.
    pub fn in_memory(retention: Duration) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), retention)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn backend_name(&self) -> &'static str {
        self.kv.name()
    }

    pub async fn ping(&self) -> Result<()> {
        self.kv.ping().await
    }

    fn status_key(job_id: &JobId) -> String {
        format!("{}{}", STATUS_PREFIX, job_id)
    }

    fn bulk_key(bulk_id: &BulkId) -> String {
        format!("{}{}", BULK_PREFIX, bulk_id)
    }

    fn member_key(job_id: &JobId) -> String {
        format!("{}{}", BULK_MEMBER_PREFIX, job_id)
    }

    fn lease_key(job_id: &JobId) -> String {
        format!("{}{}", LEASE_PREFIX, job_id)
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.kv.put(key, encoded, self.retention).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable store record");
                    counter!("mediascribe_store_decode_failures_total").increment(1);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Job statuses
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a job status. A bulk member's write also extends its bulk
    /// record and member index, so a bulk outlives any member still running.
    pub async fn put_status(&self, status: &JobStatus) -> Result<()> {
        self.put_json(&Self::status_key(&status.job_id), status).await?;
        if let Some(bulk_id) = &status.bulk_id {
            self.keep_bulk_alive(&status.job_id, bulk_id).await?;
        }
        Ok(())
    }

    /// Extend a job's records to a full retention window without rewriting
    /// them. Used for jobs that are alive but have nothing new to report.
    pub async fn touch_status(&self, status: &JobStatus) -> Result<()> {
        self.kv
            .expire(&Self::status_key(&status.job_id), self.retention)
            .await?;
        if let Some(bulk_id) = &status.bulk_id {
            self.keep_bulk_alive(&status.job_id, bulk_id).await?;
        }
        Ok(())
    }

    pub async fn get_status(&self, job_id: &JobId) -> Result<Option<JobStatus>> {
        self.get_json(&Self::status_key(job_id)).await
    }

    pub async fn delete_status(&self, job_id: &JobId) -> Result<bool> {
        self.kv.delete(&Self::status_key(job_id)).await
    }

    /// Ids of every job with a live status record.
    pub async fn scan_status_ids(&self) -> Result<Vec<JobId>> {
        let keys = self.kv.scan_prefix(STATUS_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(STATUS_PREFIX))
            .filter_map(|raw| JobId::parse(raw).ok())
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bulk operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a bulk record. While the bulk is open, every member index is
    /// rewritten and every unresolved member's status is extended, so members
    /// waiting behind a long bulk keep their records.
    pub async fn put_bulk(&self, bulk: &BulkOperation) -> Result<()> {
        self.put_json(&Self::bulk_key(&bulk.bulk_id), bulk).await?;
        if bulk.status != BulkStatus::Processing {
            return Ok(());
        }
        for job_id in &bulk.job_ids {
            self.set_bulk_member(job_id, &bulk.bulk_id).await?;
            if !bulk.resolved.contains(job_id) {
                self.kv.expire(&Self::status_key(job_id), self.retention).await?;
            }
        }
        Ok(())
    }

    async fn keep_bulk_alive(&self, job_id: &JobId, bulk_id: &BulkId) -> Result<()> {
        self.set_bulk_member(job_id, bulk_id).await?;
        self.kv.expire(&Self::bulk_key(bulk_id), self.retention).await?;
        Ok(())
    }

    pub async fn get_bulk(&self, bulk_id: &BulkId) -> Result<Option<BulkOperation>> {
        self.get_json(&Self::bulk_key(bulk_id)).await
    }

    pub async fn set_bulk_member(&self, job_id: &JobId, bulk_id: &BulkId) -> Result<()> {
        self.kv
            .put(&Self::member_key(job_id), bulk_id.to_string(), self.retention)
            .await
    }

    pub async fn get_bulk_member(&self, job_id: &JobId) -> Result<Option<BulkId>> {
        Ok(self
            .kv
            .get(&Self::member_key(job_id))
            .await?
            .map(BulkId::from_raw))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Leases
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn try_acquire_lease(&self, job_id: &JobId, lease_id: &str, ttl: Duration) -> Result<bool> {
        self.kv
            .put_if_absent(&Self::lease_key(job_id), lease_id.to_string(), ttl)
            .await
    }

    pub async fn renew_lease(&self, job_id: &JobId, lease_id: &str, ttl: Duration) -> Result<bool> {
        self.kv
            .compare_and_expire(&Self::lease_key(job_id), lease_id, ttl)
            .await
    }

    pub async fn release_lease(&self, job_id: &JobId, lease_id: &str) -> Result<bool> {
        self.kv
            .compare_and_delete(&Self::lease_key(job_id), lease_id)
            .await
    }

    /// Current lease holder id, if any.
    pub async fn current_lease(&self, job_id: &JobId) -> Result<Option<String>> {
        self.kv.get(&Self::lease_key(job_id)).await
    }

    /// Remove a lease regardless of holder.
    pub async fn delete_lease(&self, job_id: &JobId) -> Result<bool> {
        self.kv.delete(&Self::lease_key(job_id)).await
    }
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("backend", &self.kv.name())
            .field("retention", &self.retention)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
