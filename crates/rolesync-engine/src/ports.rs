//! Collaborator ports.
//!
//! The engine drives the chat platform, the chain, the indexer, the store and
//! the queue only through these traits. Concrete bindings for the store and
//! the queue live in [`crate::sqlite`]; the remote ones are supplied by the
//! embedding process.

use async_trait::async_trait;
use rolesync_types::{
    ActuationOutcome, Address, ContractRef, Feasibility, PageResult, Principal,
    SubscriptionRecord, SyncJob, Tenant,
};

use crate::error::{ChainError, IndexerError, QueueError, StoreError};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Keyed upsert/find operations over tenants, principals and subscription
/// records.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn setup_tenant(
        &self,
        external_id: &str,
        project_id: &str,
        chain_id: u64,
        privilege_id: &str,
        now: u64,
    ) -> StoreResult<Tenant>;

    async fn tenant(&self, external_id: &str) -> StoreResult<Option<Tenant>>;

    async fn verified_tenants(&self, only_syncable: bool) -> StoreResult<Vec<Tenant>>;

    async fn set_tenant_nonce(&self, external_id: &str, nonce: &str, now: u64) -> StoreResult<()>;

    /// Fetch and clear the tenant's open nonce.
    async fn take_tenant_nonce(&self, external_id: &str, now: u64) -> StoreResult<Option<String>>;

    async fn mark_verified(&self, external_id: &str, signature: &str, now: u64) -> StoreResult<()>;

    async fn mark_unsyncable(&self, tenant_id: i64, now: u64) -> StoreResult<()>;

    /// Set `syncable = true` and `last_sync_at = now`.
    async fn record_sync(&self, tenant_id: i64, now: u64) -> StoreResult<()>;

    async fn principal(&self, tenant_id: i64, external_id: &str) -> StoreResult<Option<Principal>>;

    async fn ensure_principal(
        &self,
        tenant_id: i64,
        external_id: &str,
        now: u64,
    ) -> StoreResult<Principal>;

    async fn set_principal_nonce(
        &self,
        tenant_id: i64,
        external_id: &str,
        nonce: &str,
        now: u64,
    ) -> StoreResult<()>;

    /// Fetch and clear the principal's open nonce.
    async fn take_principal_nonce(
        &self,
        tenant_id: i64,
        external_id: &str,
        now: u64,
    ) -> StoreResult<Option<String>>;

    async fn link_wallet(
        &self,
        tenant_id: i64,
        external_id: &str,
        wallet: &str,
        now: u64,
    ) -> StoreResult<()>;

    /// Returns `false` if nothing was linked.
    async fn unlink_wallet(&self, tenant_id: i64, external_id: &str, now: u64) -> StoreResult<bool>;

    /// Principals with any wallet value stored, well-formed or not.
    async fn linked_principals(&self, tenant_id: i64) -> StoreResult<Vec<Principal>>;

    /// Principals without a wallet whose record is still active.
    async fn unlinked_active_principals(&self, tenant_id: i64) -> StoreResult<Vec<Principal>>;

    async fn subscription(
        &self,
        principal_id: i64,
        tenant_id: i64,
    ) -> StoreResult<Option<SubscriptionRecord>>;

    async fn activate_subscription(
        &self,
        principal_id: i64,
        tenant_id: i64,
        privilege: &str,
        expires_at: u64,
        now: u64,
    ) -> StoreResult<()>;

    async fn expire_subscription(&self, principal_id: i64, tenant_id: i64, now: u64) -> StoreResult<()>;
}

/// The chat platform. Calls report failure in the outcome rather than
/// returning an error.
#[async_trait]
pub trait ActuationClient: Send + Sync {
    async fn assign(&self, tenant: &str, principal: &str, privilege: &str) -> ActuationOutcome;

    async fn revoke(&self, tenant: &str, principal: &str, privilege: &str) -> ActuationOutcome;

    async fn feasibility(&self, tenant: &str, privilege: &str) -> Feasibility;
}

/// Blockchain reads against the subscription contract factory.
#[async_trait]
pub trait ChainReadPort: Send + Sync {
    /// Address of the subscription contract deployed for `project_id`.
    async fn resolve_contract(&self, project_id: &str, chain_id: u64) -> Result<Address, ChainError>;

    /// Subscription end time of `user`, 0 if never subscribed.
    async fn subscription_end(&self, contract: &ContractRef, user: &Address) -> Result<u64, ChainError>;

    async fn owner(&self, contract: &ContractRef) -> Result<Address, ChainError>;
}

/// Paginated subscriber index.
#[async_trait]
pub trait IndexerPort: Send + Sync {
    async fn page(
        &self,
        contract: &ContractRef,
        chain_id: u64,
        cursor: Option<&str>,
    ) -> Result<PageResult, IndexerError>;
}

/// Result of an enqueue call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// An open job for the same tenant already exists.
    Duplicate,
}

/// Durable job queue for `"sync"` jobs. Delivery is at-least-once.
#[async_trait]
pub trait QueuePort: Send + Sync {
    async fn enqueue(&self, job: &SyncJob) -> Result<Enqueued, QueueError>;
}
