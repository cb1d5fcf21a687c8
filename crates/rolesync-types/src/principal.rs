//! Principal (one chat user scoped to a tenant).

use serde::{Deserialize, Serialize};

use crate::{Address, UnixSeconds};

/// A chat-platform user within one tenant. Unique per `(tenant_id, external_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub tenant_id: i64,
    pub external_id: String,
    /// Linked wallet as stored. May be malformed for legacy rows, see
    /// [`Principal::linked_address`].
    pub wallet: Option<String>,
    /// Open linking challenge, if any.
    pub nonce: Option<String>,
    pub created_at: UnixSeconds,
    pub updated_at: UnixSeconds,
}

impl Principal {
    /// The linked wallet, if present, well-formed and non-zero.
    pub fn linked_address(&self) -> Option<Address> {
        self.wallet
            .as_deref()
            .and_then(|w| Address::parse(w).ok())
            .filter(|a| !a.is_zero())
    }
}
