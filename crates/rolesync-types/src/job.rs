//! Queue wire payload.

use serde::{Deserialize, Serialize};

/// Payload of a `"sync"` job: the minimum a worker needs to reconcile one tenant.
///
/// Wire shape: `{"tenantExternalId": "...", "privilegeId": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub tenant_external_id: String,
    pub privilege_id: String,
}

impl SyncJob {
    pub fn new(tenant_external_id: impl Into<String>, privilege_id: impl Into<String>) -> Self {
        Self {
            tenant_external_id: tenant_external_id.into(),
            privilege_id: privilege_id.into(),
        }
    }
}
