//! Tenant setup, ownership proof, and wallet linking.
//!
//! Every state change that can alter who should hold the privilege ends
//! with a best-effort sync of the tenant. A failed sync is logged and never
//! fails the operation that triggered it.

use std::sync::Arc;

use rolesync_crypto::eip191;
use rolesync_types::{Address, SyncReport, Tenant};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain_reader::ChainStateReader;
use crate::challenge::{NonceChallenge, Purpose, Subject};
use crate::clock::Clock;
use crate::coordinator::SyncCoordinator;
use crate::error::{EngineError, Result};
use crate::ports::TenantStore;

/// Snapshot of a tenant's configuration as seen by one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TenantStatus {
    pub tenant_external_id: String,
    pub project_id: Option<String>,
    pub chain_id: Option<u64>,
    pub privilege_id: Option<String>,
    pub verified: bool,
    pub syncable: bool,
    pub last_sync_at: Option<u64>,
    /// The caller's linked wallet.
    pub wallet: Option<String>,
    /// The caller's on-chain end time, when linked and configured.
    pub subscription_end: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipVerified {
    pub owner: Address,
    pub sync: Option<SyncReport>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletLinked {
    pub address: Address,
    pub sync: Option<SyncReport>,
}

pub struct Onboarding {
    store: Arc<dyn TenantStore>,
    challenge: NonceChallenge,
    reader: Arc<ChainStateReader>,
    coordinator: Arc<SyncCoordinator>,
    clock: Arc<dyn Clock>,
}

impl Onboarding {
    pub fn new(
        store: Arc<dyn TenantStore>,
        challenge: NonceChallenge,
        reader: Arc<ChainStateReader>,
        coordinator: Arc<SyncCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            challenge,
            reader,
            coordinator,
            clock,
        }
    }

    async fn load(&self, tenant: &str) -> Result<Tenant> {
        self.store
            .tenant(tenant)
            .await?
            .ok_or_else(|| EngineError::TenantNotFound(tenant.to_string()))
    }

    /// Configure (or reconfigure) a tenant.
    ///
    /// `project_id` and `chain_id` must be decimal integers. Changing either
    /// drops verification. Changing only the privilege of a verified tenant
    /// moves current subscribers to the new one right away.
    pub async fn setup(
        &self,
        tenant: &str,
        project_id: &str,
        chain_id: &str,
        privilege_id: &str,
    ) -> Result<Tenant> {
        if project_id.is_empty() || !project_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EngineError::InvalidInput(format!(
                "project id '{project_id}' is not a number"
            )));
        }
        let chain_id: u64 = chain_id
            .parse()
            .map_err(|_| EngineError::InvalidInput(format!("chain id '{chain_id}' is not a number")))?;
        let privilege_id = privilege_id.trim();
        if privilege_id.is_empty() {
            return Err(EngineError::InvalidInput("privilege id is empty".into()));
        }

        let previous = self.store.tenant(tenant).await?.and_then(|t| t.privilege_id);
        let updated = self
            .store
            .setup_tenant(tenant, project_id, chain_id, privilege_id, self.clock.now())
            .await?;
        info!(
            tenant,
            project = project_id,
            chain = chain_id,
            verified = updated.verified,
            "tenant configured"
        );
        if previous.is_some_and(|p| p != privilege_id) {
            self.sync_after_change(tenant, updated.verified).await;
        }
        Ok(updated)
    }

    /// Issue an ownership challenge. Returns the text the contract owner
    /// must sign.
    pub async fn begin_ownership_proof(&self, tenant: &str) -> Result<String> {
        let t = self.load(tenant).await?;
        let (project_id, chain_id) = t
            .contract_key()
            .ok_or_else(|| EngineError::NotConfigured(tenant.to_string()))?;
        let nonce = self.challenge.issue(Subject::Tenant(tenant)).await?;
        Ok(NonceChallenge::message_for(
            Purpose::Ownership {
                project_id,
                chain_id,
            },
            &nonce,
        ))
    }

    /// Check a signature over the ownership challenge against the
    /// contract's on-chain owner.
    ///
    /// The challenge is spent whatever the outcome.
    pub async fn verify_ownership(&self, tenant: &str, signature: &str) -> Result<OwnershipVerified> {
        let t = self.load(tenant).await?;
        let (project_id, chain_id) = t
            .contract_key()
            .ok_or_else(|| EngineError::NotConfigured(tenant.to_string()))?;
        let nonce = self.challenge.consume(Subject::Tenant(tenant)).await?;

        let contract = self.reader.resolve_contract(project_id, chain_id).await?;
        let owner = self.reader.owner(&contract).await?;
        let message = NonceChallenge::message_for(
            Purpose::Ownership {
                project_id,
                chain_id,
            },
            &nonce,
        );
        if !eip191::verify_bytes(&owner, message.as_bytes(), signature) {
            warn!(tenant, owner = %owner.abbreviated(), "ownership signature rejected");
            return Err(EngineError::InvalidSignature);
        }

        self.store
            .mark_verified(tenant, signature, self.clock.now())
            .await?;
        info!(tenant, owner = %owner.abbreviated(), "tenant ownership verified");

        let sync = self.sync_after_change(tenant, true).await;
        Ok(OwnershipVerified { owner, sync })
    }

    /// Issue a linking challenge for a user. Returns the text to sign.
    pub async fn begin_link(&self, tenant: &str, user: &str) -> Result<String> {
        let t = self.load(tenant).await?;
        let nonce = self
            .challenge
            .issue(Subject::Principal {
                tenant_id: t.id,
                user,
            })
            .await?;
        Ok(NonceChallenge::message_for(Purpose::Link, &nonce))
    }

    /// Bind `wallet` to a user after checking its signature over the open
    /// linking challenge. The challenge is spent whatever the outcome.
    pub async fn complete_link(
        &self,
        tenant: &str,
        user: &str,
        wallet: &str,
        signature: &str,
    ) -> Result<WalletLinked> {
        let address = Address::parse(wallet)
            .map_err(|e| EngineError::InvalidInput(format!("wallet '{wallet}': {e}")))?;
        if address.is_zero() {
            return Err(EngineError::InvalidInput("zero wallet address".into()));
        }

        let t = self.load(tenant).await?;
        let subject = Subject::Principal {
            tenant_id: t.id,
            user,
        };
        let nonce = self.challenge.consume(subject).await?;
        let message = NonceChallenge::message_for(Purpose::Link, &nonce);
        if !eip191::verify_bytes(&address, message.as_bytes(), signature) {
            warn!(tenant, user, wallet = %address.abbreviated(), "link signature rejected");
            return Err(EngineError::InvalidSignature);
        }

        self.store
            .link_wallet(t.id, user, &address.to_string(), self.clock.now())
            .await?;
        info!(tenant, user, wallet = %address.abbreviated(), "wallet linked");

        let sync = self.sync_after_change(tenant, t.verified).await;
        Ok(WalletLinked { address, sync })
    }

    /// Remove a user's wallet. Returns `false` if none was linked.
    pub async fn unlink(&self, tenant: &str, user: &str) -> Result<bool> {
        let t = self.load(tenant).await?;
        let removed = self
            .store
            .unlink_wallet(t.id, user, self.clock.now())
            .await?;
        if removed {
            info!(tenant, user, "wallet unlinked");
            self.sync_after_change(tenant, t.verified).await;
        }
        Ok(removed)
    }

    pub async fn linked_wallet(&self, tenant: &str, user: &str) -> Result<Option<String>> {
        let t = self.load(tenant).await?;
        Ok(self
            .store
            .principal(t.id, user)
            .await?
            .and_then(|p| p.wallet))
    }

    pub async fn status(&self, tenant: &str, user: &str) -> Result<TenantStatus> {
        let t = self.load(tenant).await?;
        let principal = self.store.principal(t.id, user).await?;

        let mut subscription_end = None;
        if let (Some(address), Some((project_id, chain_id))) = (
            principal.as_ref().and_then(|p| p.linked_address()),
            t.contract_key(),
        ) {
            match self.reader.resolve_contract(project_id, chain_id).await {
                Ok(contract) => {
                    subscription_end = Some(self.reader.read_single(&contract, &address).await);
                }
                Err(e) => debug!(tenant, error = %e, "contract unresolved for status"),
            }
        }

        Ok(TenantStatus {
            tenant_external_id: t.external_id.clone(),
            project_id: t.project_id.clone(),
            chain_id: t.chain_id,
            privilege_id: t.privilege_id.clone(),
            verified: t.verified,
            syncable: t.syncable,
            last_sync_at: t.last_sync_at,
            wallet: principal.and_then(|p| p.wallet),
            subscription_end,
        })
    }

    async fn sync_after_change(&self, tenant: &str, verified: bool) -> Option<SyncReport> {
        if !verified {
            debug!(tenant, "tenant not verified, sync skipped");
            return None;
        }
        self.coordinator.manual_sync(tenant).await.ok()
    }
}
