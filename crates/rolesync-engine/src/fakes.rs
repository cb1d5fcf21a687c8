//! In-memory collaborators for tests.
//!
//! Each fake records what it was asked to do and can be told to fail.
//! [`TestBed`] wires them into a full [`Engine`] over an in-memory database.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rolesync_types::{
    ActuationOutcome, Address, ContractRef, Feasibility, PageResult, SubscriptionStatus, SyncJob,
    Tenant,
};
use tokio::sync::Semaphore;

use crate::clock::{Clock, ManualClock};
use crate::config::EngineConfig;
use crate::engine::{Engine, Remotes};
use crate::error::{ChainError, IndexerError, QueueError};
use crate::ports::{
    ActuationClient, ChainReadPort, Enqueued, IndexerPort, QueuePort, TenantStore,
};
use crate::sqlite::{shared, Db};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct ChainState {
    contracts: HashMap<(String, u64), Address>,
    owners: HashMap<Address, Address>,
    end_times: HashMap<Address, u64>,
    failing_reads: HashSet<Address>,
    resolution_error: Option<ChainError>,
}

/// Contract factory and subscription contracts.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deploy(&self, project_id: &str, chain_id: u64, contract: Address) {
        lock(&self.state)
            .contracts
            .insert((project_id.to_string(), chain_id), contract);
    }

    pub fn set_owner(&self, contract: Address, owner: Address) {
        lock(&self.state).owners.insert(contract, owner);
    }

    pub fn set_end_time(&self, user: Address, end_time: u64) {
        lock(&self.state).end_times.insert(user, end_time);
    }

    pub fn fail_reads_for(&self, user: Address) {
        lock(&self.state).failing_reads.insert(user);
    }

    pub fn fail_resolution(&self, error: ChainError) {
        lock(&self.state).resolution_error = Some(error);
    }
}

#[async_trait]
impl ChainReadPort for FakeChain {
    async fn resolve_contract(&self, project_id: &str, chain_id: u64) -> Result<Address, ChainError> {
        let state = lock(&self.state);
        if let Some(e) = &state.resolution_error {
            return Err(e.clone());
        }
        state
            .contracts
            .get(&(project_id.to_string(), chain_id))
            .copied()
            .ok_or_else(|| ChainError::ProjectNotFound {
                project_id: project_id.to_string(),
                chain_id,
            })
    }

    async fn subscription_end(&self, _contract: &ContractRef, user: &Address) -> Result<u64, ChainError> {
        let state = lock(&self.state);
        if state.failing_reads.contains(user) {
            return Err(ChainError::Transport("execution reverted".into()));
        }
        Ok(state.end_times.get(user).copied().unwrap_or(0))
    }

    async fn owner(&self, contract: &ContractRef) -> Result<Address, ChainError> {
        lock(&self.state)
            .owners
            .get(&contract.address)
            .copied()
            .ok_or_else(|| ChainError::Transport("owner() reverted".into()))
    }
}

#[derive(Default)]
struct IndexerState {
    pages: Vec<PageResult>,
    failures: HashMap<usize, IndexerError>,
    cursors: Vec<Option<String>>,
}

/// A fixed sequence of index pages, addressed by cursor.
///
/// No cursor returns the first page; cursor `c` returns the page after the
/// one whose `next_cursor` is `c`.
#[derive(Default)]
pub struct FakeIndexer {
    state: Mutex<IndexerState>,
}

impl FakeIndexer {
    pub fn new(pages: Vec<PageResult>) -> Self {
        Self {
            state: Mutex::new(IndexerState {
                pages,
                ..IndexerState::default()
            }),
        }
    }

    pub fn set_pages(&self, pages: Vec<PageResult>) {
        lock(&self.state).pages = pages;
    }

    /// Make the page at `index` fail.
    pub fn fail_page(&self, index: usize, error: IndexerError) {
        lock(&self.state).failures.insert(index, error);
    }

    pub fn heal(&self) {
        lock(&self.state).failures.clear();
    }

    /// Cursors of every call so far, in order.
    pub fn cursors(&self) -> Vec<Option<String>> {
        lock(&self.state).cursors.clone()
    }
}

#[async_trait]
impl IndexerPort for FakeIndexer {
    async fn page(
        &self,
        _contract: &ContractRef,
        _chain_id: u64,
        cursor: Option<&str>,
    ) -> Result<PageResult, IndexerError> {
        let mut state = lock(&self.state);
        state.cursors.push(cursor.map(str::to_string));
        let index = match cursor {
            None => 0,
            Some(c) => state
                .pages
                .iter()
                .position(|p| p.next_cursor.as_deref() == Some(c))
                .map(|i| i + 1)
                .ok_or_else(|| IndexerError::Malformed(format!("unknown cursor {c}")))?,
        };
        if let Some(e) = state.failures.get(&index) {
            return Err(e.clone());
        }
        Ok(state.pages.get(index).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActuationKind {
    Assign,
    Revoke,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActuationCall {
    pub kind: ActuationKind,
    pub tenant: String,
    pub principal: String,
    pub privilege: String,
}

struct ActuatorState {
    feasibility: Feasibility,
    failing: HashSet<String>,
    failing_assign: HashSet<String>,
    calls: Vec<ActuationCall>,
}

/// Chat platform that records grants and revokes.
pub struct FakeActuator {
    state: Mutex<ActuatorState>,
}

impl Default for FakeActuator {
    fn default() -> Self {
        Self {
            state: Mutex::new(ActuatorState {
                feasibility: Feasibility::FEASIBLE,
                failing: HashSet::new(),
                failing_assign: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }
}

impl FakeActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_feasibility(&self, feasibility: Feasibility) {
        lock(&self.state).feasibility = feasibility;
    }

    /// Make every call for `principal` fail.
    pub fn fail_for(&self, principal: &str) {
        lock(&self.state).failing.insert(principal.to_string());
    }

    /// Make only assignments for `principal` fail.
    pub fn fail_assign_for(&self, principal: &str) {
        lock(&self.state).failing_assign.insert(principal.to_string());
    }

    pub fn heal(&self) {
        let mut state = lock(&self.state);
        state.failing.clear();
        state.failing_assign.clear();
    }

    pub fn calls(&self) -> Vec<ActuationCall> {
        lock(&self.state).calls.clone()
    }

    pub fn count(&self, kind: ActuationKind) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        lock(&self.state).calls.clear();
    }

    fn record(&self, kind: ActuationKind, tenant: &str, principal: &str, privilege: &str) -> ActuationOutcome {
        let mut state = lock(&self.state);
        state.calls.push(ActuationCall {
            kind,
            tenant: tenant.to_string(),
            principal: principal.to_string(),
            privilege: privilege.to_string(),
        });
        let failing = state.failing.contains(principal)
            || (kind == ActuationKind::Assign && state.failing_assign.contains(principal));
        if failing {
            ActuationOutcome::failed("missing permissions")
        } else {
            ActuationOutcome::Applied
        }
    }
}

#[async_trait]
impl ActuationClient for FakeActuator {
    async fn assign(&self, tenant: &str, principal: &str, privilege: &str) -> ActuationOutcome {
        self.record(ActuationKind::Assign, tenant, principal, privilege)
    }

    async fn revoke(&self, tenant: &str, principal: &str, privilege: &str) -> ActuationOutcome {
        self.record(ActuationKind::Revoke, tenant, principal, privilege)
    }

    async fn feasibility(&self, _tenant: &str, _privilege: &str) -> Feasibility {
        lock(&self.state).feasibility
    }
}

/// Queue that records every job, optionally blocking each enqueue on a
/// semaphore permit.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<SyncJob>>,
    gate: Option<Arc<Semaphore>>,
    error: Mutex<Option<QueueError>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each enqueue waits for one permit from `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn fail_with(&self, error: QueueError) {
        *lock(&self.error) = Some(error);
    }

    pub fn jobs(&self) -> Vec<SyncJob> {
        lock(&self.jobs).clone()
    }
}

#[async_trait]
impl QueuePort for RecordingQueue {
    async fn enqueue(&self, job: &SyncJob) -> Result<Enqueued, QueueError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?
                .forget();
        }
        if let Some(e) = lock(&self.error).clone() {
            return Err(e);
        }
        lock(&self.jobs).push(job.clone());
        Ok(Enqueued::Queued)
    }
}

/// An engine over in-memory SQLite and the fakes above.
///
/// Helpers panic on store failures; they are for test setup only.
pub struct TestBed {
    pub engine: Engine,
    pub db: Db,
    pub clock: Arc<ManualClock>,
    pub actuator: Arc<FakeActuator>,
    pub chain: Arc<FakeChain>,
    pub indexer: Arc<FakeIndexer>,
}

impl TestBed {
    pub const PROJECT: &'static str = "12";
    pub const CHAIN: u64 = 8453;
    pub const PRIVILEGE: &'static str = "role-1";

    pub async fn new(now: u64) -> Self {
        Self::with_config(now, EngineConfig::default()).await
    }

    pub async fn with_config(now: u64, config: EngineConfig) -> Self {
        let db = shared(rolesync_db::open_memory().expect("open in-memory db"));
        let clock = Arc::new(ManualClock::new(now));
        let actuator = Arc::new(FakeActuator::new());
        let chain = Arc::new(FakeChain::new());
        let indexer = Arc::new(FakeIndexer::new(Vec::new()));
        let engine = Engine::new(
            db.clone(),
            Remotes {
                actuator: actuator.clone(),
                chain: chain.clone(),
                indexer: indexer.clone(),
            },
            config,
            clock.clone(),
        );
        Self {
            engine,
            db,
            clock,
            actuator,
            chain,
            indexer,
        }
    }

    /// Deterministic contract address for a project.
    pub fn contract_address(project_id: &str, chain_id: u64) -> Address {
        let mut bytes = [0xc0; 20];
        bytes[..8].copy_from_slice(&chain_id.to_be_bytes());
        for (i, b) in project_id.bytes().take(12).enumerate() {
            bytes[8 + i] = b;
        }
        Address::from_bytes(bytes)
    }

    /// Deploy a contract for `project_id` owned by `owner`.
    pub fn deploy(&self, project_id: &str, chain_id: u64, owner: Address) -> Address {
        let contract = Self::contract_address(project_id, chain_id);
        self.chain.deploy(project_id, chain_id, contract);
        self.chain.set_owner(contract, owner);
        contract
    }

    /// A configured, verified tenant on the default project.
    pub async fn verified_tenant(&self, external_id: &str) -> Tenant {
        let now = self.clock.now();
        self.deploy(Self::PROJECT, Self::CHAIN, Address::from_bytes([0xaa; 20]));
        self.engine
            .store
            .setup_tenant(external_id, Self::PROJECT, Self::CHAIN, Self::PRIVILEGE, now)
            .await
            .expect("setup tenant");
        self.engine
            .store
            .mark_verified(external_id, "0xsignature", now)
            .await
            .expect("verify tenant");
        self.tenant(external_id).await
    }

    /// Link `address` to `user` directly, without a challenge.
    pub async fn link(&self, tenant: &str, user: &str, address: Address) {
        let t = self.tenant(tenant).await;
        self.engine
            .store
            .link_wallet(t.id, user, &address.to_string(), self.clock.now())
            .await
            .expect("link wallet");
    }

    pub async fn tenant(&self, external_id: &str) -> Tenant {
        self.engine
            .store
            .tenant(external_id)
            .await
            .expect("load tenant")
            .expect("tenant exists")
    }

    /// Stored subscription status of a user, `None` without a record.
    pub async fn status_of(&self, tenant: &str, user: &str) -> Option<SubscriptionStatus> {
        let t = self.tenant(tenant).await;
        let principal = self
            .engine
            .store
            .principal(t.id, user)
            .await
            .expect("load principal")?;
        self.engine
            .store
            .subscription(principal.id, t.id)
            .await
            .expect("load subscription")
            .map(|r| r.status)
    }
}
