//! Tenant (one onboarded chat community).

use serde::{Deserialize, Serialize};

use crate::UnixSeconds;

/// A chat community configured against one subscription contract.
///
/// `verified == true` implies the contract reference and the privilege
/// reference are both present; the store only sets the flag through the
/// ownership-proof path, which checks both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Local row id.
    pub id: i64,
    /// External community id (unique).
    pub external_id: String,
    /// Subscription contract project id (decimal string).
    pub project_id: Option<String>,
    /// Chain the contract lives on.
    pub chain_id: Option<u64>,
    /// Privilege (role) granted to active subscribers.
    pub privilege_id: Option<String>,
    /// Signature accepted by the last successful ownership proof.
    pub verification_signature: Option<String>,
    pub verified: bool,
    /// Cleared when the actuator cannot grant the privilege.
    pub syncable: bool,
    pub last_sync_at: Option<UnixSeconds>,
    /// Open ownership-proof challenge, if any.
    pub nonce: Option<String>,
    pub created_at: UnixSeconds,
    pub updated_at: UnixSeconds,
}

impl Tenant {
    /// The `(project_id, chain_id)` pair if both are set and non-empty.
    pub fn contract_key(&self) -> Option<(&str, u64)> {
        match (self.project_id.as_deref(), self.chain_id) {
            (Some(project), Some(chain)) if !project.is_empty() => Some((project, chain)),
            _ => None,
        }
    }

    /// The privilege id if set and non-empty.
    pub fn privilege(&self) -> Option<&str> {
        self.privilege_id.as_deref().filter(|p| !p.is_empty())
    }

    /// True when both the contract reference and the privilege are set.
    pub fn is_configured(&self) -> bool {
        self.contract_key().is_some() && self.privilege().is_some()
    }
}
