//! Subscription state, local and remote.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Address, UnixSeconds};

/// Stored privilege status of a principal within a tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown subscription status '{other}'")),
        }
    }
}

/// Current privilege status of one principal in one tenant.
///
/// Unique per `(principal_id, tenant_id)`. Rows are updated, never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: i64,
    pub principal_id: i64,
    pub tenant_id: i64,
    pub status: SubscriptionStatus,
    /// Privilege granted when the record was last made active. `None` only
    /// for rows written before this was tracked.
    pub privilege_id: Option<String>,
    /// On-chain end time observed when the record was last made active.
    pub expires_at: UnixSeconds,
    pub updated_at: UnixSeconds,
}

impl SubscriptionRecord {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Active and granted under `privilege`. An untracked privilege counts
    /// as current.
    pub fn holds(&self, privilege: &str) -> bool {
        self.is_active()
            && self
                .privilege_id
                .as_deref()
                .map_or(true, |granted| granted == privilege)
    }
}

/// An `(address, end_time)` pair read from the chain or the indexer.
///
/// Ephemeral: consumed once per reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub address: Address,
    pub end_time: UnixSeconds,
}

impl RemoteSubscription {
    /// Whether the subscription is live at `now`. `end_time == now` is expired.
    pub fn is_live_at(&self, now: UnixSeconds) -> bool {
        self.end_time > now
    }
}
