//! Secondary indexing
//!
//! Domain types declare indexed fields through an [`IndexRegistry`]; committed
//! writes to those fields are mirrored into an [`IndexProvider`] backend.
//! Indexes live in memory and are not retroactive: only writes committed after
//! a field is declared are indexed.

pub mod manager;
pub mod property_index;
pub mod registry;

pub use manager::{IndexManager, PropertyIndexKey};
pub use property_index::PropertyIndex;
pub use registry::{IndexRegistry, Indexer, DEFAULT_NODE_CLASS, DEFAULT_RELATIONSHIP_CLASS};

use crate::graph::{EntityId, PropertyValue};
use thiserror::Error;

/// Index errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index {namespace}.{field} does not exist")]
    UnknownIndex { namespace: String, field: String },

    #[error("Index backend error: {0}")]
    Backend(String),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Indexing backend
///
/// A namespace groups the indexes of one domain type; each indexed field of
/// that type is a separate index inside the namespace.
pub trait IndexProvider: Send + Sync {
    /// Declare an index; declaring an existing one keeps its entries
    fn create_index(&self, namespace: &str, field: &str) -> IndexResult<()>;

    fn has_index(&self, namespace: &str, field: &str) -> bool;

    fn index_put(
        &self,
        namespace: &str,
        field: &str,
        value: &PropertyValue,
        entity: EntityId,
    ) -> IndexResult<()>;

    fn index_remove(
        &self,
        namespace: &str,
        field: &str,
        value: &PropertyValue,
        entity: EntityId,
    ) -> IndexResult<()>;

    /// Entities whose `field` equals `value`
    fn query(&self, namespace: &str, field: &str, value: &PropertyValue) -> IndexResult<Vec<EntityId>>;

    /// Drop every entry, keeping the declared indexes
    fn clear(&self) -> IndexResult<()>;
}
