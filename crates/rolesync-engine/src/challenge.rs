//! Single-use challenge nonces.

use std::fmt;
use std::sync::Arc;

use rolesync_crypto::{challenge, nonce};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::ports::TenantStore;

/// Who a challenge is issued to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subject<'a> {
    /// Ownership proof for a tenant's contract.
    Tenant(&'a str),
    /// Wallet linking for one user within a tenant.
    Principal { tenant_id: i64, user: &'a str },
}

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Tenant(id) => write!(f, "tenant '{id}'"),
            Subject::Principal { tenant_id, user } => {
                write!(f, "user '{user}' in tenant #{tenant_id}")
            }
        }
    }
}

/// Text the signer is asked to sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose<'a> {
    Link,
    Ownership { project_id: &'a str, chain_id: u64 },
}

/// Issues and consumes nonces through the store.
///
/// One open challenge per subject; issuing again replaces it. Consuming
/// always clears it, whatever the caller then does with the nonce.
#[derive(Clone)]
pub struct NonceChallenge {
    store: Arc<dyn TenantStore>,
    clock: Arc<dyn Clock>,
}

impl NonceChallenge {
    pub fn new(store: Arc<dyn TenantStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn issue(&self, subject: Subject<'_>) -> Result<String> {
        let nonce = nonce::generate();
        let now = self.clock.now();
        match subject {
            Subject::Tenant(id) => self.store.set_tenant_nonce(id, &nonce, now).await?,
            Subject::Principal { tenant_id, user } => {
                self.store
                    .set_principal_nonce(tenant_id, user, &nonce, now)
                    .await?
            }
        }
        debug!(subject = %subject, "challenge issued");
        Ok(nonce)
    }

    /// Deterministic challenge text for `nonce`.
    pub fn message_for(purpose: Purpose<'_>, nonce: &str) -> String {
        match purpose {
            Purpose::Link => challenge::link_message(nonce),
            Purpose::Ownership {
                project_id,
                chain_id,
            } => challenge::ownership_message(project_id, chain_id, nonce),
        }
    }

    /// Take the open nonce, failing with `NoPendingChallenge` if none.
    pub async fn consume(&self, subject: Subject<'_>) -> Result<String> {
        let now = self.clock.now();
        let taken = match subject {
            Subject::Tenant(id) => self.store.take_tenant_nonce(id, now).await?,
            Subject::Principal { tenant_id, user } => {
                self.store.take_principal_nonce(tenant_id, user, now).await?
            }
        };
        taken.ok_or_else(|| EngineError::NoPendingChallenge(subject.to_string()))
    }
}
