//! Errors surfaced by the mapping layer

use crate::config::ConfigError;
use crate::graph::{EntityId, GraphError};
use crate::index::IndexError;
use thiserror::Error;

/// Errors from database, entity and index operations
#[derive(Error, Debug)]
pub enum OgmError {
    /// The id was never allocated
    #[error("{0} not found")]
    NotFound(EntityId),

    /// The entity existed but has been deleted
    #[error("{0} has been deleted")]
    AlreadyDeleted(EntityId),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Starting a running database, or using one that is not running
    #[error("Lifecycle misuse: {0}")]
    LifecycleMisuse(String),

    /// A lifecycle listener failed; for commit events the transaction was rolled back
    #[error("{event} listener failed: {source}")]
    ListenerFailure {
        event: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Store error: {0}")]
    Store(#[source] GraphError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OgmError {
    /// True for the two errors that mean "no such entity"
    pub fn is_absent(&self) -> bool {
        matches!(self, OgmError::NotFound(_) | OgmError::AlreadyDeleted(_))
    }
}

impl From<GraphError> for OgmError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::NotFound(id) => OgmError::NotFound(id),
            GraphError::AlreadyDeleted(id) => OgmError::AlreadyDeleted(id),
            // index maintenance vetoes with the backend error itself
            GraphError::CommitVetoed { source, .. } => match source.downcast::<IndexError>() {
                Ok(err) => OgmError::Index(err),
                Err(source) => OgmError::ListenerFailure {
                    event: "commit",
                    source,
                },
            },
            GraphError::Closed => OgmError::LifecycleMisuse("graph store is closed".to_string()),
            other => OgmError::Store(other),
        }
    }
}

pub type OgmResult<T> = Result<T, OgmError>;
