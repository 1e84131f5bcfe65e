//! Embedded graph engine
//!
//! This module implements the property graph the mapping layer sits on:
//! - Nodes and typed, directed relationships carrying properties
//! - Ids that are allocated monotonically and never reused
//! - Per-thread transactions with commit listeners that can veto
//! - Optional RocksDB durability of committed changes

pub mod edge;
pub mod embedded;
pub mod event;
pub mod handle;
pub mod node;
pub mod property;
pub mod store;
pub mod types;

// Re-export main types
pub use edge::EdgeRecord;
pub use embedded::EmbeddedGraphStore;
pub use event::{DeletedNode, DeletedRelationship, PropertyChange, TransactionData};
pub use handle::{NodeHandle, RelationshipHandle};
pub use node::NodeRecord;
pub use property::{PropertyMap, PropertyValue};
pub use store::{
    same_store, GraphError, GraphResult, GraphStore, NodeIds, RelationshipEnds,
    TransactionEventHandler, TxId,
};
pub use types::{Direction, EdgeId, EdgeType, EntityId, EntityKind, NodeId};
