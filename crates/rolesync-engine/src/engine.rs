//! Composition root.

use std::sync::Arc;

use crate::chain_reader::ChainStateReader;
use crate::challenge::NonceChallenge;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::coordinator::SyncCoordinator;
use crate::onboarding::Onboarding;
use crate::ports::{ActuationClient, ChainReadPort, IndexerPort};
use crate::reconciler::Reconciler;
use crate::sqlite::{shared, Db, SqliteQueue, SqliteStore};

/// Remote collaborators supplied by the embedding process.
#[derive(Clone)]
pub struct Remotes {
    pub actuator: Arc<dyn ActuationClient>,
    pub chain: Arc<dyn ChainReadPort>,
    pub indexer: Arc<dyn IndexerPort>,
}

/// Every engine component, wired over one database.
pub struct Engine {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<SqliteStore>,
    pub queue: Arc<SqliteQueue>,
    pub reader: Arc<ChainStateReader>,
    pub reconciler: Arc<Reconciler>,
    pub coordinator: Arc<SyncCoordinator>,
    pub onboarding: Onboarding,
}

impl Engine {
    pub fn new(db: Db, remotes: Remotes, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(SqliteStore::new(db.clone()));
        let queue = Arc::new(SqliteQueue::new(
            db,
            config.queue.max_attempts,
            clock.clone(),
        ));
        let reader = Arc::new(ChainStateReader::new(
            remotes.chain,
            remotes.indexer,
            config.chain.supported_chain_ids.clone(),
            config.chain.max_pages,
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            remotes.actuator,
            reader.clone(),
            clock.clone(),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            queue.clone(),
            reconciler.clone(),
            config.scheduler.only_syncable,
        ));
        let onboarding = Onboarding::new(
            store.clone(),
            NonceChallenge::new(store.clone(), clock.clone()),
            reader.clone(),
            coordinator.clone(),
            clock.clone(),
        );

        Self {
            config,
            clock,
            store,
            queue,
            reader,
            reconciler,
            coordinator,
            onboarding,
        }
    }

    /// Open the on-disk database under the configured data directory.
    pub fn open(config: EngineConfig, remotes: Remotes) -> anyhow::Result<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let conn = rolesync_db::open(&config.db_path())?;
        tracing::info!(path = %config.db_path().display(), "database opened");
        Ok(Self::new(shared(conn), remotes, config, Arc::new(SystemClock)))
    }
}
