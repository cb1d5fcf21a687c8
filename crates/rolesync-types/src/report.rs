//! Pass-level reconciliation counters.

use serde::{Deserialize, Serialize};

/// How a reconciliation pass ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    /// All principals were evaluated.
    Completed,
    /// The actuator cannot grant the privilege; the tenant was marked unsyncable.
    Infeasible,
}

/// Result of one reconciliation pass over one tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub tenant_external_id: String,
    pub status: PassStatus,
    /// Privileges granted.
    pub grants: u32,
    /// Privileges revoked.
    pub revokes: u32,
    /// Actuation calls that failed; state left unchanged.
    pub failed: u32,
    /// Principals with a malformed or zero wallet.
    pub ignored: u32,
    /// Revocations withheld because the remote snapshot was incomplete.
    pub deferred: u32,
    /// Whether the remote subscriber index was read to the end.
    pub snapshot_complete: bool,
}

impl SyncReport {
    pub fn new(tenant_external_id: impl Into<String>) -> Self {
        Self {
            tenant_external_id: tenant_external_id.into(),
            status: PassStatus::Completed,
            grants: 0,
            revokes: 0,
            failed: 0,
            ignored: 0,
            deferred: 0,
            snapshot_complete: true,
        }
    }

    pub fn infeasible(tenant_external_id: impl Into<String>) -> Self {
        Self {
            status: PassStatus::Infeasible,
            ..Self::new(tenant_external_id)
        }
    }

    /// True when the pass changed nothing on the chat platform.
    pub fn is_noop(&self) -> bool {
        self.grants == 0 && self.revokes == 0
    }
}
