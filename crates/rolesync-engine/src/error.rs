//! Error taxonomy for the engine and its ports.

use rolesync_db::DbError;

/// Persistence port failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => Self::NotFound(what),
            DbError::Constraint(what) => Self::Conflict(what),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Queue port failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("bad job payload: {0}")]
    Payload(String),
}

impl From<DbError> for QueueError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Serialization(msg) => Self::Payload(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Chain-read port failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("unsupported chain {0}")]
    UnsupportedChain(u64),

    #[error("project {project_id} not found on chain {chain_id}")]
    ProjectNotFound { project_id: String, chain_id: u64 },

    #[error("chain transport: {0}")]
    Transport(String),
}

/// Indexer port failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexerError {
    #[error("indexer transport: {0}")]
    Transport(String),

    #[error("malformed indexer response: {0}")]
    Malformed(String),
}

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("tenant '{0}' is not configured")]
    NotConfigured(String),

    #[error("tenant '{0}' is not verified")]
    NotVerified(String),

    #[error("no contract for project {project_id} on chain {chain_id}")]
    UnresolvedContract { project_id: String, chain_id: u64 },

    #[error("no pending challenge for {0}")]
    NoPendingChallenge(String),

    #[error("signature does not match")]
    InvalidSignature,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("remote call failed: {0}")]
    Remote(String),
}

impl EngineError {
    /// Tenant setup problems. Surfaced to the caller and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::TenantNotFound(_)
                | Self::NotConfigured(_)
                | Self::NotVerified(_)
                | Self::UnresolvedContract { .. }
        )
    }

    /// Failures worth another attempt later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Unavailable(_))
                | Self::Queue(QueueError::Unavailable(_))
                | Self::Remote(_)
        )
    }
}

impl From<ChainError> for EngineError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Transport(msg) => Self::Remote(msg),
            ChainError::UnsupportedChain(chain_id) => Self::UnresolvedContract {
                project_id: String::new(),
                chain_id,
            },
            ChainError::ProjectNotFound {
                project_id,
                chain_id,
            } => Self::UnresolvedContract {
                project_id,
                chain_id,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        for e in [
            EngineError::TenantNotFound("g".into()),
            EngineError::NotConfigured("g".into()),
            EngineError::NotVerified("g".into()),
            EngineError::UnresolvedContract {
                project_id: "1".into(),
                chain_id: 8453,
            },
        ] {
            assert!(e.is_configuration(), "{e}");
            assert!(!e.is_retryable(), "{e}");
        }
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(EngineError::Remote("timeout".into()).is_retryable());
        assert!(EngineError::from(StoreError::Unavailable("locked".into())).is_retryable());
        assert!(!EngineError::from(StoreError::Conflict("dup".into())).is_retryable());
        assert!(!EngineError::InvalidSignature.is_retryable());
    }

    #[test]
    fn test_db_error_mapping() {
        assert!(matches!(
            StoreError::from(DbError::NotFound("x".into())),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            StoreError::from(DbError::Constraint("x".into())),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            StoreError::from(DbError::Migration("x".into())),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_chain_error_mapping() {
        let e = EngineError::from(ChainError::ProjectNotFound {
            project_id: "7".into(),
            chain_id: 1,
        });
        assert!(e.is_configuration());
        assert!(EngineError::from(ChainError::Transport("rpc down".into())).is_retryable());
    }
}
