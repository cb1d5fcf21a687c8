//! Subscription state reads: contract resolution, point lookups, and the
//! paginated subscriber index.

use std::collections::HashMap;
use std::sync::Arc;

use rolesync_types::{Address, ContractRef, RemoteSubscription};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::ports::{ChainReadPort, IndexerPort};

/// Subscriber end times for one contract, as read from the index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    end_times: HashMap<Address, u64>,
    complete: bool,
    pages: u32,
}

impl RemoteSnapshot {
    /// End time recorded for `address`. Addresses compare case-insensitively
    /// because they are parsed to bytes.
    pub fn end_time(&self, address: &Address) -> Option<u64> {
        self.end_times.get(address).copied()
    }

    /// `false` when paging stopped early (page error, cursor loop, page cap).
    /// Absence from an incomplete snapshot proves nothing.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    pub fn len(&self) -> usize {
        self.end_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.end_times.is_empty()
    }

    fn absorb(&mut self, items: Vec<RemoteSubscription>) {
        for item in items {
            let end = self.end_times.entry(item.address).or_insert(0);
            *end = (*end).max(item.end_time);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PagerState {
    Open,
    Exhausted,
    Truncated,
}

/// Lazy cursor walk over the subscriber index.
///
/// Yields pages until the index reports no further page. A failed fetch
/// ends the walk without an error; [`SubscriberPages::is_complete`] tells
/// the two endings apart.
pub struct SubscriberPages<'a> {
    indexer: &'a dyn IndexerPort,
    contract: &'a ContractRef,
    cursor: Option<String>,
    fetched: u32,
    max_pages: u32,
    state: PagerState,
}

impl<'a> SubscriberPages<'a> {
    pub fn new(indexer: &'a dyn IndexerPort, contract: &'a ContractRef, max_pages: u32) -> Self {
        Self {
            indexer,
            contract,
            cursor: None,
            fetched: 0,
            max_pages,
            state: PagerState::Open,
        }
    }

    /// Fetch the next page. `None` once the walk has ended.
    pub async fn next_page(&mut self) -> Option<Vec<RemoteSubscription>> {
        if self.state != PagerState::Open {
            return None;
        }
        if self.fetched >= self.max_pages {
            warn!(
                contract = %self.contract.address,
                pages = self.fetched,
                "subscriber index page cap reached"
            );
            self.state = PagerState::Truncated;
            return None;
        }

        let page = match self
            .indexer
            .page(self.contract, self.contract.chain_id, self.cursor.as_deref())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    contract = %self.contract.address,
                    page = self.fetched,
                    error = %e,
                    "subscriber index page failed, truncating"
                );
                self.state = PagerState::Truncated;
                return None;
            }
        };
        self.fetched += 1;

        if !page.has_next_page {
            self.state = PagerState::Exhausted;
        } else {
            match page.next_cursor {
                Some(next) if self.cursor.as_deref() != Some(next.as_str()) => {
                    self.cursor = Some(next);
                }
                _ => {
                    warn!(
                        contract = %self.contract.address,
                        page = self.fetched,
                        "subscriber index cursor did not advance, truncating"
                    );
                    self.state = PagerState::Truncated;
                }
            }
        }
        Some(page.items)
    }

    pub fn is_complete(&self) -> bool {
        self.state == PagerState::Exhausted
    }

    pub fn pages_fetched(&self) -> u32 {
        self.fetched
    }
}

/// Reads subscription state through the chain and indexer ports.
pub struct ChainStateReader {
    chain: Arc<dyn ChainReadPort>,
    indexer: Arc<dyn IndexerPort>,
    supported_chains: Vec<u64>,
    max_pages: u32,
}

impl ChainStateReader {
    /// An empty `supported_chains` accepts every chain id.
    pub fn new(
        chain: Arc<dyn ChainReadPort>,
        indexer: Arc<dyn IndexerPort>,
        supported_chains: Vec<u64>,
        max_pages: u32,
    ) -> Self {
        Self {
            chain,
            indexer,
            supported_chains,
            max_pages: max_pages.max(1),
        }
    }

    /// Resolve the subscription contract of a project.
    pub async fn resolve_contract(&self, project_id: &str, chain_id: u64) -> Result<ContractRef> {
        if !self.supported_chains.is_empty() && !self.supported_chains.contains(&chain_id) {
            return Err(EngineError::UnresolvedContract {
                project_id: project_id.to_string(),
                chain_id,
            });
        }
        let address = self
            .chain
            .resolve_contract(project_id, chain_id)
            .await
            .map_err(|e| match EngineError::from(e) {
                EngineError::UnresolvedContract { .. } => EngineError::UnresolvedContract {
                    project_id: project_id.to_string(),
                    chain_id,
                },
                other => other,
            })?;
        if address.is_zero() {
            return Err(EngineError::UnresolvedContract {
                project_id: project_id.to_string(),
                chain_id,
            });
        }
        Ok(ContractRef {
            project_id: project_id.to_string(),
            chain_id,
            address,
        })
    }

    /// End time of one subscriber. Any read failure yields 0.
    pub async fn read_single(&self, contract: &ContractRef, user: &Address) -> u64 {
        match self.chain.subscription_end(contract, user).await {
            Ok(end) => end,
            Err(e) => {
                warn!(
                    contract = %contract.address,
                    user = %user.abbreviated(),
                    error = %e,
                    "subscription read failed, treating as unsubscribed"
                );
                0
            }
        }
    }

    pub async fn owner(&self, contract: &ContractRef) -> Result<Address> {
        Ok(self.chain.owner(contract).await?)
    }

    pub fn pages<'a>(&'a self, contract: &'a ContractRef) -> SubscriberPages<'a> {
        SubscriberPages::new(self.indexer.as_ref(), contract, self.max_pages)
    }

    /// Walk the whole subscriber index for `contract`.
    pub async fn read_all(&self, contract: &ContractRef) -> RemoteSnapshot {
        let mut pages = self.pages(contract);
        let mut snapshot = RemoteSnapshot::default();
        while let Some(items) = pages.next_page().await {
            snapshot.absorb(items);
        }
        snapshot.complete = pages.is_complete();
        snapshot.pages = pages.pages_fetched();
        debug!(
            contract = %contract.address,
            subscribers = snapshot.len(),
            pages = snapshot.pages,
            complete = snapshot.complete,
            "subscriber index read"
        );
        snapshot
    }
}
