//! The storage engine seam
//!
//! Everything above this module talks to the graph through [`GraphStore`].
//! The engine owns entity identity, property storage, transactions and commit
//! notification; the mapping layer only wraps and interprets what it returns.

use super::event::TransactionData;
use super::property::{PropertyMap, PropertyValue};
use super::types::{Direction, EdgeId, EdgeType, EntityId, NodeId};
use crate::persistence::StorageError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during graph store operations
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("{0} not found")]
    NotFound(EntityId),

    #[error("{0} has been deleted")]
    AlreadyDeleted(EntityId),

    #[error("Invalid relationship: start node {0} does not exist")]
    InvalidEdgeSource(NodeId),

    #[error("Invalid relationship: end node {0} does not exist")]
    InvalidEdgeTarget(NodeId),

    #[error("Node {node} still has {count} relationship(s)")]
    NodeHasRelationships { node: NodeId, count: usize },

    #[error("Transaction {0} is not active on this thread")]
    TransactionNotFound(TxId),

    #[error("Transaction {0} was marked rollback-only and has been rolled back")]
    TransactionRolledBack(TxId),

    #[error("{entity} holds uncommitted writes of transaction {owner}")]
    WriteConflict { entity: EntityId, owner: TxId },

    #[error("Commit of transaction {tx} vetoed by a listener: {source}")]
    CommitVetoed {
        tx: TxId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Graph store is closed")]
    Closed,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Identifier of a store transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

/// The two endpoints and type of a relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipEnds {
    pub start: NodeId,
    pub end: NodeId,
    pub edge_type: EdgeType,
}

/// Lazy sequence of node ids
pub type NodeIds = Box<dyn Iterator<Item = NodeId> + Send>;

/// Receives a store's transaction notifications
///
/// Callbacks run on the committing thread with no store lock held, so they may
/// read the store.
pub trait TransactionEventHandler: Send + Sync {
    /// Called before the changes become final. An error vetoes the commit:
    /// the store rolls the transaction back and `commit` fails.
    fn before_commit(&self, data: &TransactionData) -> anyhow::Result<()>;

    /// Called once the transaction is durable
    fn after_commit(&self, data: &TransactionData);

    /// Called after a rollback, including one caused by a veto
    fn after_rollback(&self, _data: &TransactionData) {}
}

/// Embedded transactional graph engine
///
/// Write operations called outside a transaction run in their own implicit
/// transaction. A write that touches an entity another open transaction created,
/// deleted or wrote the same key of fails with [`GraphError::WriteConflict`]
/// instead of waiting. Lookups of a missing entity fail with [`GraphError::NotFound`]
/// when the id was never allocated and [`GraphError::AlreadyDeleted`] when the
/// entity existed once.
pub trait GraphStore: Send + Sync {
    /// Release the engine. All later calls fail with [`GraphError::Closed`].
    fn close(&self) -> GraphResult<()>;

    fn is_open(&self) -> bool;

    /// Begin a transaction on the calling thread
    fn begin_tx(&self) -> GraphResult<TxId>;

    fn commit(&self, tx: TxId) -> GraphResult<()>;

    fn rollback(&self, tx: TxId) -> GraphResult<()>;

    fn create_node(&self) -> GraphResult<NodeId>;

    /// Atomically create a relationship between two live nodes
    fn create_relationship(&self, from: NodeId, to: NodeId, edge_type: EdgeType) -> GraphResult<EdgeId>;

    /// Succeeds iff the node is live
    fn check_node(&self, id: NodeId) -> GraphResult<()>;

    fn relationship(&self, id: EdgeId) -> GraphResult<RelationshipEnds>;

    fn property(&self, entity: EntityId, key: &str) -> GraphResult<Option<PropertyValue>>;

    /// Write a property, returning the previous value
    fn set_property(
        &self,
        entity: EntityId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<Option<PropertyValue>>;

    fn remove_property(&self, entity: EntityId, key: &str) -> GraphResult<Option<PropertyValue>>;

    fn properties(&self, entity: EntityId) -> GraphResult<PropertyMap>;

    fn relationships_of(&self, node: NodeId, direction: Direction) -> GraphResult<Vec<EdgeId>>;

    /// Delete a node; rejected while it still has relationships
    fn delete_node(&self, id: NodeId) -> GraphResult<()>;

    fn delete_relationship(&self, id: EdgeId) -> GraphResult<()>;

    /// Iterate over every node live at the time of the call
    fn all_nodes(&self) -> GraphResult<NodeIds>;

    fn register_commit_listener(&self, listener: Arc<dyn TransactionEventHandler>);

    /// Returns false if the listener was not registered
    fn unregister_commit_listener(&self, listener: &Arc<dyn TransactionEventHandler>) -> bool;
}

/// True if both references point at the same store instance
pub fn same_store(a: &Arc<dyn GraphStore>, b: &Arc<dyn GraphStore>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
