//! Shapes returned by the chain-read and indexer collaborators.

use serde::{Deserialize, Serialize};

use crate::RemoteSubscription;

/// A resolved subscription contract.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractRef {
    pub project_id: String,
    pub chain_id: u64,
    pub address: crate::Address,
}

/// One page of the remote subscriber index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub items: Vec<RemoteSubscription>,
    pub has_next_page: bool,
    pub next_cursor: Option<String>,
}

impl PageResult {
    /// A final page carrying `items`.
    pub fn last(items: Vec<RemoteSubscription>) -> Self {
        Self {
            items,
            has_next_page: false,
            next_cursor: None,
        }
    }

    /// A page followed by another at `cursor`.
    pub fn with_next(items: Vec<RemoteSubscription>, cursor: impl Into<String>) -> Self {
        Self {
            items,
            has_next_page: true,
            next_cursor: Some(cursor.into()),
        }
    }
}
