//! SQLite bindings for the store and queue ports.
//!
//! Both share one connection behind an async mutex. Every call takes the
//! lock, runs one synchronous query function from `rolesync_db`, and
//! releases it.

use std::sync::Arc;

use async_trait::async_trait;
use rolesync_db::queries::{self, jobs::JobRow};
use rolesync_types::{Principal, SubscriptionRecord, SyncJob, Tenant};
use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::QueueError;
use crate::ports::{Enqueued, QueuePort, StoreResult, TenantStore};

/// Shared database handle.
pub type Db = Arc<Mutex<Connection>>;

/// Linear retry backoff step: attempt `n` waits `n * RETRY_BACKOFF_SECS`.
pub const RETRY_BACKOFF_SECS: u64 = 5;

pub fn shared(conn: Connection) -> Db {
    Arc::new(Mutex::new(conn))
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Db,
}

impl SqliteStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TenantStore for SqliteStore {
    async fn setup_tenant(
        &self,
        external_id: &str,
        project_id: &str,
        chain_id: u64,
        privilege_id: &str,
        now: u64,
    ) -> StoreResult<Tenant> {
        let db = self.db.lock().await;
        Ok(queries::tenants::setup(
            &db,
            external_id,
            project_id,
            chain_id,
            privilege_id,
            now,
        )?)
    }

    async fn tenant(&self, external_id: &str) -> StoreResult<Option<Tenant>> {
        let db = self.db.lock().await;
        Ok(queries::tenants::find(&db, external_id)?)
    }

    async fn verified_tenants(&self, only_syncable: bool) -> StoreResult<Vec<Tenant>> {
        let db = self.db.lock().await;
        Ok(queries::tenants::list_verified(&db, only_syncable)?)
    }

    async fn set_tenant_nonce(&self, external_id: &str, nonce: &str, now: u64) -> StoreResult<()> {
        let db = self.db.lock().await;
        Ok(queries::tenants::set_nonce(&db, external_id, nonce, now)?)
    }

    async fn take_tenant_nonce(&self, external_id: &str, now: u64) -> StoreResult<Option<String>> {
        let db = self.db.lock().await;
        Ok(queries::tenants::take_nonce(&db, external_id, now)?)
    }

    async fn mark_verified(&self, external_id: &str, signature: &str, now: u64) -> StoreResult<()> {
        let db = self.db.lock().await;
        Ok(queries::tenants::mark_verified(&db, external_id, signature, now)?)
    }

    async fn mark_unsyncable(&self, tenant_id: i64, now: u64) -> StoreResult<()> {
        let db = self.db.lock().await;
        Ok(queries::tenants::mark_unsyncable(&db, tenant_id, now)?)
    }

    async fn record_sync(&self, tenant_id: i64, now: u64) -> StoreResult<()> {
        let db = self.db.lock().await;
        Ok(queries::tenants::record_sync(&db, tenant_id, now)?)
    }

    async fn principal(&self, tenant_id: i64, external_id: &str) -> StoreResult<Option<Principal>> {
        let db = self.db.lock().await;
        Ok(queries::principals::get(&db, tenant_id, external_id)?)
    }

    async fn ensure_principal(
        &self,
        tenant_id: i64,
        external_id: &str,
        now: u64,
    ) -> StoreResult<Principal> {
        let db = self.db.lock().await;
        Ok(queries::principals::ensure(&db, tenant_id, external_id, now)?)
    }

    async fn set_principal_nonce(
        &self,
        tenant_id: i64,
        external_id: &str,
        nonce: &str,
        now: u64,
    ) -> StoreResult<()> {
        let db = self.db.lock().await;
        Ok(queries::principals::set_nonce(&db, tenant_id, external_id, nonce, now)?)
    }

    async fn take_principal_nonce(
        &self,
        tenant_id: i64,
        external_id: &str,
        now: u64,
    ) -> StoreResult<Option<String>> {
        let db = self.db.lock().await;
        Ok(queries::principals::take_nonce(&db, tenant_id, external_id, now)?)
    }

    async fn link_wallet(
        &self,
        tenant_id: i64,
        external_id: &str,
        wallet: &str,
        now: u64,
    ) -> StoreResult<()> {
        let db = self.db.lock().await;
        Ok(queries::principals::link_wallet(&db, tenant_id, external_id, wallet, now)?)
    }

    async fn unlink_wallet(&self, tenant_id: i64, external_id: &str, now: u64) -> StoreResult<bool> {
        let db = self.db.lock().await;
        Ok(queries::principals::unlink(&db, tenant_id, external_id, now)?)
    }

    async fn linked_principals(&self, tenant_id: i64) -> StoreResult<Vec<Principal>> {
        let db = self.db.lock().await;
        Ok(queries::principals::list_linked(&db, tenant_id)?)
    }

    async fn unlinked_active_principals(&self, tenant_id: i64) -> StoreResult<Vec<Principal>> {
        let db = self.db.lock().await;
        Ok(queries::principals::list_unlinked_active(&db, tenant_id)?)
    }

    async fn subscription(
        &self,
        principal_id: i64,
        tenant_id: i64,
    ) -> StoreResult<Option<SubscriptionRecord>> {
        let db = self.db.lock().await;
        Ok(queries::subscriptions::get(&db, principal_id, tenant_id)?)
    }

    async fn activate_subscription(
        &self,
        principal_id: i64,
        tenant_id: i64,
        privilege: &str,
        expires_at: u64,
        now: u64,
    ) -> StoreResult<()> {
        let db = self.db.lock().await;
        Ok(queries::subscriptions::upsert_active(
            &db,
            principal_id,
            tenant_id,
            privilege,
            expires_at,
            now,
        )?)
    }

    async fn expire_subscription(&self, principal_id: i64, tenant_id: i64, now: u64) -> StoreResult<()> {
        let db = self.db.lock().await;
        queries::subscriptions::mark_expired(&db, principal_id, tenant_id, now)?;
        Ok(())
    }
}

/// The `sync_jobs` table as a queue.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Db,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl SqliteQueue {
    pub fn new(db: Db, max_attempts: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            max_attempts: max_attempts.max(1),
            clock,
        }
    }

    /// Claim the next ready job, if any.
    pub async fn claim(&self) -> Result<Option<JobRow>, QueueError> {
        let now = self.clock.now();
        let db = self.db.lock().await;
        Ok(queries::jobs::claim_next(&db, now)?)
    }

    pub async fn complete(&self, job: &JobRow) -> Result<(), QueueError> {
        let now = self.clock.now();
        let db = self.db.lock().await;
        Ok(queries::jobs::complete(&db, job.id, now)?)
    }

    /// Record a failed attempt. Returns `true` if the job will run again.
    pub async fn fail(&self, job: &JobRow, error: &str, retryable: bool) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let backoff = u64::from(job.attempts) * RETRY_BACKOFF_SECS;
        let db = self.db.lock().await;
        Ok(queries::jobs::fail(&db, job.id, error, retryable, backoff, now)?)
    }

    /// Put jobs orphaned by a previous process back in the queue.
    pub async fn requeue_stale(&self) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let db = self.db.lock().await;
        Ok(queries::jobs::requeue_running(&db, now)?)
    }

    /// Delete finished jobs older than `retention_secs`.
    pub async fn prune_finished(&self, retention_secs: u64) -> Result<usize, QueueError> {
        let older_than = self.clock.now().saturating_sub(retention_secs);
        let db = self.db.lock().await;
        Ok(queries::jobs::prune_finished(&db, older_than)?)
    }

    pub async fn count(&self, state: &str) -> Result<u64, QueueError> {
        let db = self.db.lock().await;
        Ok(queries::jobs::count_by_state(&db, state)?)
    }
}

#[async_trait]
impl QueuePort for SqliteQueue {
    async fn enqueue(&self, job: &SyncJob) -> Result<Enqueued, QueueError> {
        let now = self.clock.now();
        let db = self.db.lock().await;
        if queries::jobs::enqueue_sync(&db, job, self.max_attempts, now)? {
            Ok(Enqueued::Queued)
        } else {
            Ok(Enqueued::Duplicate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::StoreError;

    fn db() -> Db {
        shared(rolesync_db::open_memory().expect("open test db"))
    }

    #[tokio::test]
    async fn test_store_tenant_round_trip() {
        let store = SqliteStore::new(db());
        assert!(store.tenant("guild-1").await.expect("lookup").is_none());

        let t = store
            .setup_tenant("guild-1", "12", 8453, "role-1", 100)
            .await
            .expect("setup");
        store.mark_verified("guild-1", "0xsig", 101).await.expect("verify");
        let verified = store.verified_tenants(false).await.expect("list");
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].id, t.id);
    }

    #[tokio::test]
    async fn test_store_maps_missing_tenant() {
        let store = SqliteStore::new(db());
        let err = store
            .set_tenant_nonce("ghost", "n", 1)
            .await
            .expect_err("missing tenant");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_queue_dedupes_and_backs_off() {
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = SqliteQueue::new(db(), 3, clock.clone());
        let job = SyncJob::new("guild-1", "role-1");

        assert_eq!(queue.enqueue(&job).await.expect("enqueue"), Enqueued::Queued);
        assert_eq!(queue.enqueue(&job).await.expect("enqueue"), Enqueued::Duplicate);

        let claimed = queue.claim().await.expect("claim").expect("job");
        assert!(queue.fail(&claimed, "rpc down", true).await.expect("fail"));

        // First retry waits 1 * 5s.
        clock.advance(4);
        assert!(queue.claim().await.expect("claim").is_none());
        clock.advance(1);
        let again = queue.claim().await.expect("claim").expect("job");
        assert_eq!(again.attempts, 2);
        queue.complete(&again).await.expect("complete");
        assert_eq!(queue.count("done").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_requeue_stale() {
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = SqliteQueue::new(db(), 3, clock);
        queue
            .enqueue(&SyncJob::new("guild-1", "role-1"))
            .await
            .expect("enqueue");
        queue.claim().await.expect("claim").expect("job");
        assert_eq!(queue.requeue_stale().await.expect("requeue"), 1);
        assert_eq!(queue.count("pending").await.expect("count"), 1);
    }
}
