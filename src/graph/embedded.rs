//! In-process transactional graph store
//!
//! Implements [`GraphStore`] on top of hash maps, with:
//! - per-thread transactions that join when nested
//! - an undo log replayed on rollback or on a vetoed commit
//! - optional RocksDB durability for committed changes
//!
//! Writes are applied to the shared state as they happen, so other threads can
//! observe uncommitted data. Every uncommitted write is owned by its transaction
//! until it finishes: another transaction that tries to build on it, overwrite
//! it or delete under it gets [`GraphError::WriteConflict`], which keeps undo
//! replay and commit batches from mixing in foreign uncommitted state.

use super::edge::EdgeRecord;
use super::event::{DeletedNode, DeletedRelationship, PropertyChange, TransactionData};
use super::node::NodeRecord;
use super::property::{PropertyMap, PropertyValue};
use super::store::{
    GraphError, GraphResult, GraphStore, NodeIds, RelationshipEnds, TransactionEventHandler, TxId,
};
use super::types::{Direction, EdgeId, EdgeType, EntityId, NodeId};
use crate::persistence::{CommitBatch, IdCounters, PersistentStorage, StorageOptions};
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Live graph data
#[derive(Debug, Default)]
struct StoreState {
    nodes: FxHashMap<NodeId, NodeRecord>,
    edges: FxHashMap<EdgeId, EdgeRecord>,
    outgoing: FxHashMap<NodeId, Vec<EdgeId>>,
    incoming: FxHashMap<NodeId, Vec<EdgeId>>,
    counters: IdCounters,
    locks: FxHashMap<EntityId, EntityLock>,
}

/// Claims open transactions hold on one entity
#[derive(Debug, Default)]
struct EntityLock {
    /// Transaction that created or deleted the entity
    owner: Option<TxId>,
    /// Transactions that deleted one of the node's relationships
    pins: Vec<TxId>,
    /// Written keys with their writer and last committed value
    keys: FxHashMap<String, (TxId, Option<PropertyValue>)>,
}

impl EntityLock {
    fn foreign_owner(&self, tx: TxId) -> Option<TxId> {
        self.owner.filter(|owner| *owner != tx)
    }

    /// Any claim held by a transaction other than `tx`
    fn foreign_claim(&self, tx: TxId) -> Option<TxId> {
        self.foreign_owner(tx)
            .or_else(|| self.pins.iter().copied().find(|pin| *pin != tx))
            .or_else(|| self.keys.values().map(|(owner, _)| *owner).find(|owner| *owner != tx))
    }

    fn release(&mut self, tx: TxId) {
        if self.owner == Some(tx) {
            self.owner = None;
        }
        self.pins.retain(|pin| *pin != tx);
        self.keys.retain(|_, (owner, _)| *owner != tx);
    }

    fn is_empty(&self) -> bool {
        self.owner.is_none() && self.pins.is_empty() && self.keys.is_empty()
    }
}

impl StoreState {
    /// Error for a node id that is not live
    fn missing_node(&self, id: NodeId) -> GraphError {
        if id.as_u64() > 0 && id.as_u64() < self.counters.next_node_id {
            GraphError::AlreadyDeleted(EntityId::Node(id))
        } else {
            GraphError::NotFound(EntityId::Node(id))
        }
    }

    fn missing_edge(&self, id: EdgeId) -> GraphError {
        if id.as_u64() > 0 && id.as_u64() < self.counters.next_edge_id {
            GraphError::AlreadyDeleted(EntityId::Relationship(id))
        } else {
            GraphError::NotFound(EntityId::Relationship(id))
        }
    }

    fn insert_node(&mut self, node: NodeRecord) {
        self.outgoing.entry(node.id).or_default();
        self.incoming.entry(node.id).or_default();
        self.nodes.insert(node.id, node);
    }

    fn remove_node(&mut self, id: NodeId) -> Option<NodeRecord> {
        self.outgoing.remove(&id);
        self.incoming.remove(&id);
        self.nodes.remove(&id)
    }

    fn insert_edge(&mut self, edge: EdgeRecord) {
        self.outgoing.entry(edge.source).or_default().push(edge.id);
        self.incoming.entry(edge.target).or_default().push(edge.id);
        self.edges.insert(edge.id, edge);
    }

    fn remove_edge(&mut self, id: EdgeId) -> Option<EdgeRecord> {
        let edge = self.edges.remove(&id)?;
        if let Some(out) = self.outgoing.get_mut(&edge.source) {
            out.retain(|e| *e != id);
        }
        if let Some(inc) = self.incoming.get_mut(&edge.target) {
            inc.retain(|e| *e != id);
        }
        Some(edge)
    }

    fn relationship_ids(&self, node: NodeId, direction: Direction) -> Vec<EdgeId> {
        let outgoing = self.outgoing.get(&node).map(Vec::as_slice).unwrap_or_default();
        let incoming = self.incoming.get(&node).map(Vec::as_slice).unwrap_or_default();
        match direction {
            Direction::Outgoing => outgoing.to_vec(),
            Direction::Incoming => incoming.to_vec(),
            Direction::Both => {
                let mut all: Vec<EdgeId> = outgoing.iter().chain(incoming).copied().collect();
                // self-loops sit in both lists
                all.sort();
                all.dedup();
                all
            }
        }
    }

    fn properties(&self, entity: EntityId) -> GraphResult<&PropertyMap> {
        match entity {
            EntityId::Node(id) => self
                .nodes
                .get(&id)
                .map(|n| &n.properties)
                .ok_or_else(|| self.missing_node(id)),
            EntityId::Relationship(id) => self
                .edges
                .get(&id)
                .map(|e| &e.properties)
                .ok_or_else(|| self.missing_edge(id)),
        }
    }

    fn set_property(
        &mut self,
        entity: EntityId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<Option<PropertyValue>> {
        match entity {
            EntityId::Node(id) => match self.nodes.get_mut(&id) {
                Some(node) => Ok(node.set_property(key, value)),
                None => Err(self.missing_node(id)),
            },
            EntityId::Relationship(id) => match self.edges.get_mut(&id) {
                Some(edge) => Ok(edge.set_property(key, value)),
                None => Err(self.missing_edge(id)),
            },
        }
    }

    fn remove_property(&mut self, entity: EntityId, key: &str) -> GraphResult<Option<PropertyValue>> {
        match entity {
            EntityId::Node(id) => match self.nodes.get_mut(&id) {
                Some(node) => Ok(node.remove_property(key)),
                None => Err(self.missing_node(id)),
            },
            EntityId::Relationship(id) => match self.edges.get_mut(&id) {
                Some(edge) => Ok(edge.remove_property(key)),
                None => Err(self.missing_edge(id)),
            },
        }
    }

    /// Fails if another open transaction created or deleted `entity`
    fn check_owner(&self, tx: TxId, entity: EntityId) -> GraphResult<()> {
        match self.locks.get(&entity).and_then(|lock| lock.foreign_owner(tx)) {
            Some(owner) => Err(GraphError::WriteConflict { entity, owner }),
            None => Ok(()),
        }
    }

    /// Take `entity` for a create or delete by `tx`
    fn claim(&mut self, tx: TxId, entity: EntityId) -> GraphResult<()> {
        if let Some(owner) = self.locks.get(&entity).and_then(|lock| lock.foreign_claim(tx)) {
            return Err(GraphError::WriteConflict { entity, owner });
        }
        self.locks.entry(entity).or_default().owner = Some(tx);
        Ok(())
    }

    /// Keep `node` alive while `tx` may still restore one of its relationships
    fn pin(&mut self, tx: TxId, node: NodeId) -> GraphResult<()> {
        let entity = EntityId::Node(node);
        self.check_owner(tx, entity)?;
        let lock = self.locks.entry(entity).or_default();
        if !lock.pins.contains(&tx) {
            lock.pins.push(tx);
        }
        Ok(())
    }

    /// Take `key` on `entity` for `tx`, remembering the committed value on the
    /// first write
    fn claim_key(&mut self, tx: TxId, entity: EntityId, key: &str) -> GraphResult<()> {
        let committed = self.properties(entity)?.get(key).cloned();
        self.check_owner(tx, entity)?;
        let lock = self.locks.entry(entity).or_default();
        match lock.keys.get(key) {
            Some((owner, _)) if *owner != tx => Err(GraphError::WriteConflict {
                entity,
                owner: *owner,
            }),
            Some(_) => Ok(()),
            None => {
                lock.keys.insert(key.to_string(), (tx, committed));
                Ok(())
            }
        }
    }

    /// Drop every claim of a finished transaction
    fn release(&mut self, tx: TxId) {
        self.locks.retain(|_, lock| {
            lock.release(tx);
            !lock.is_empty()
        });
    }

    /// Put back the committed value of keys other transactions are writing
    fn committed_view(&self, tx: TxId, entity: EntityId, properties: &mut PropertyMap) {
        let Some(lock) = self.locks.get(&entity) else {
            return;
        };
        for (key, (owner, committed)) in &lock.keys {
            if *owner == tx {
                continue;
            }
            match committed {
                Some(value) => {
                    properties.insert(key.clone(), value.clone());
                }
                None => {
                    properties.shift_remove(key);
                }
            }
        }
    }

    /// Records to write for the entities a commit touched
    fn commit_batch(&self, tx: TxId, data: &TransactionData) -> CommitBatch {
        let mut batch = CommitBatch {
            counters: self.counters,
            ..Default::default()
        };
        for entity in data.touched_entities() {
            match entity {
                EntityId::Node(id) => match self.nodes.get(&id) {
                    Some(node) => {
                        let mut node = node.clone();
                        self.committed_view(tx, entity, &mut node.properties);
                        batch.put_nodes.push(node);
                    }
                    None => batch.delete_nodes.push(id),
                },
                EntityId::Relationship(id) => match self.edges.get(&id) {
                    Some(edge) => {
                        let mut edge = edge.clone();
                        self.committed_view(tx, entity, &mut edge.properties);
                        batch.put_edges.push(edge);
                    }
                    None => batch.delete_edges.push(id),
                },
            }
        }
        batch
    }
}

/// Inverse of one applied write
#[derive(Debug)]
enum Undo {
    CreateNode(NodeId),
    CreateEdge(EdgeId),
    DeleteNode(NodeRecord),
    DeleteEdge(EdgeRecord),
    Property {
        entity: EntityId,
        key: String,
        old: Option<PropertyValue>,
    },
}

/// Transaction bound to one thread
#[derive(Debug)]
struct ActiveTx {
    id: TxId,
    /// Number of begin_tx calls not yet matched by commit/rollback
    depth: usize,
    rollback_only: bool,
    undo: Vec<Undo>,
    data: TransactionData,
}

impl ActiveTx {
    fn new(id: TxId) -> Self {
        Self {
            id,
            depth: 1,
            rollback_only: false,
            undo: Vec::new(),
            data: TransactionData::new(),
        }
    }
}

/// Iterates node ids allocated before the iterator was created
///
/// Each step takes the read lock briefly, so the store may change between
/// items: deleted nodes are skipped and nodes created later are not yielded.
struct NodeIdIter {
    state: Arc<RwLock<StoreState>>,
    next: u64,
    end: u64,
}

impl Iterator for NodeIdIter {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while self.next < self.end {
            let id = NodeId::new(self.next);
            self.next += 1;
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.nodes.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }
}

/// Embedded graph store
pub struct EmbeddedGraphStore {
    state: Arc<RwLock<StoreState>>,
    transactions: Mutex<FxHashMap<ThreadId, ActiveTx>>,
    listeners: RwLock<Vec<Arc<dyn TransactionEventHandler>>>,
    storage: RwLock<Option<PersistentStorage>>,
    open: AtomicBool,
    next_tx: AtomicU64,
}

impl EmbeddedGraphStore {
    /// Create a store that keeps everything in memory
    pub fn in_memory() -> Self {
        Self::with_state(StoreState::default(), None)
    }

    /// Open (or create) a durable store at `path`, recovering committed data
    pub fn open(path: impl AsRef<Path>, options: &StorageOptions) -> GraphResult<Self> {
        let storage = PersistentStorage::open(path, options)?;

        let mut state = StoreState::default();
        let nodes = storage.scan_nodes()?;
        let edges = storage.scan_edges()?;
        info!("Recovered {} nodes and {} relationships", nodes.len(), edges.len());

        let max_node = nodes.iter().map(|n| n.id.as_u64()).max().unwrap_or(0);
        let max_edge = edges.iter().map(|e| e.id.as_u64()).max().unwrap_or(0);
        for node in nodes {
            state.insert_node(node);
        }
        for edge in edges {
            state.insert_edge(edge);
        }
        state.counters = storage.counters()?.unwrap_or(IdCounters {
            next_node_id: max_node + 1,
            next_edge_id: max_edge + 1,
        });

        Ok(Self::with_state(state, Some(storage)))
    }

    fn with_state(state: StoreState, storage: Option<PersistentStorage>) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            transactions: Mutex::new(FxHashMap::default()),
            listeners: RwLock::new(Vec::new()),
            storage: RwLock::new(storage),
            open: AtomicBool::new(true),
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.read_state().nodes.len()
    }

    /// Number of live relationships
    pub fn relationship_count(&self) -> usize {
        self.read_state().edges.len()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transactions(&self) -> MutexGuard<'_, FxHashMap<ThreadId, ActiveTx>> {
        self.transactions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn TransactionEventHandler>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_open(&self) -> GraphResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(GraphError::Closed)
        }
    }

    /// Run a write inside the calling thread's transaction, or an implicit one
    fn write<T>(
        &self,
        op: impl FnOnce(&mut StoreState, &mut ActiveTx) -> GraphResult<T>,
    ) -> GraphResult<T> {
        self.ensure_open()?;
        let thread = thread::current().id();

        let has_tx = self.lock_transactions().contains_key(&thread);
        let implicit = if has_tx { None } else { Some(self.begin_tx()?) };

        let result = {
            let mut txs = self.lock_transactions();
            let Some(tx) = txs.get_mut(&thread) else {
                return Err(GraphError::Closed);
            };
            let mut state = self.write_state();
            op(&mut state, tx)
        };

        match implicit {
            None => result,
            Some(tx) => match result {
                Ok(value) => {
                    self.commit(tx)?;
                    Ok(value)
                }
                Err(err) => {
                    self.rollback(tx)?;
                    Err(err)
                }
            },
        }
    }

    /// Detach the calling thread's transaction if this call finishes it
    ///
    /// Returns Ok(None) when the call only unwinds a nested level.
    fn finish(&self, tx: TxId, rollback: bool) -> GraphResult<Option<ActiveTx>> {
        let thread = thread::current().id();
        let mut txs = self.lock_transactions();
        match txs.get_mut(&thread) {
            Some(active) if active.id == tx => {
                if active.depth > 1 {
                    active.depth -= 1;
                    if rollback {
                        active.rollback_only = true;
                    }
                    debug!("Left nested level of transaction {}", tx);
                    return Ok(None);
                }
            }
            _ => return Err(GraphError::TransactionNotFound(tx)),
        }
        Ok(txs.remove(&thread))
    }

    /// Replay the undo log of `tx` and drop its claims
    fn undo(&self, tx: TxId, undo: Vec<Undo>) {
        let mut state = self.write_state();
        for step in undo.into_iter().rev() {
            match step {
                Undo::CreateNode(id) => {
                    state.remove_node(id);
                }
                Undo::CreateEdge(id) => {
                    state.remove_edge(id);
                }
                Undo::DeleteNode(node) => state.insert_node(node),
                Undo::DeleteEdge(edge) => state.insert_edge(edge),
                Undo::Property { entity, key, old } => {
                    let restored = match old {
                        Some(value) => state.set_property(entity, &key, value).map(|_| ()),
                        None => state.remove_property(entity, &key).map(|_| ()),
                    };
                    if let Err(err) = restored {
                        warn!("Could not restore property {} on {}: {}", key, entity, err);
                    }
                }
            }
        }
        state.release(tx);
    }

    fn abort(&self, active: ActiveTx, listeners: &[Arc<dyn TransactionEventHandler>]) {
        self.undo(active.id, active.undo);
        for listener in listeners {
            listener.after_rollback(&active.data);
        }
        debug!("Rolled back transaction {}", active.id);
    }

    fn persist(&self, tx: TxId, data: &TransactionData) -> GraphResult<()> {
        let storage = self.storage.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(storage) = storage.as_ref() {
            let batch = self.read_state().commit_batch(tx, data);
            if !batch.is_empty() {
                storage.apply(&batch)?;
            }
        }
        Ok(())
    }
}

impl GraphStore for EmbeddedGraphStore {
    fn close(&self) -> GraphResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let storage = self
            .storage
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(storage) = storage {
            storage.flush()?;
        }

        let abandoned = {
            let mut txs = self.lock_transactions();
            let count = txs.len();
            txs.clear();
            count
        };
        if abandoned > 0 {
            warn!("Closing graph store with {} open transaction(s)", abandoned);
        }

        *self.write_state() = StoreState::default();
        info!("Graph store closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn begin_tx(&self) -> GraphResult<TxId> {
        self.ensure_open()?;
        let thread = thread::current().id();
        let mut txs = self.lock_transactions();

        if let Some(active) = txs.get_mut(&thread) {
            active.depth += 1;
            debug!("Joined transaction {} (depth {})", active.id, active.depth);
            return Ok(active.id);
        }

        let id = TxId(self.next_tx.fetch_add(1, Ordering::Relaxed));
        txs.insert(thread, ActiveTx::new(id));
        debug!("Began transaction {}", id);
        Ok(id)
    }

    fn commit(&self, tx: TxId) -> GraphResult<()> {
        let Some(active) = self.finish(tx, false)? else {
            return Ok(());
        };
        let listeners = self.listeners_snapshot();

        if !self.is_open() {
            return Err(GraphError::Closed);
        }

        if active.rollback_only {
            self.abort(active, &listeners);
            return Err(GraphError::TransactionRolledBack(tx));
        }

        for listener in &listeners {
            if let Err(source) = listener.before_commit(&active.data) {
                warn!("Commit of transaction {} vetoed: {}", tx, source);
                self.abort(active, &listeners);
                return Err(GraphError::CommitVetoed { tx, source });
            }
        }

        if let Err(err) = self.persist(tx, &active.data) {
            warn!("Persisting transaction {} failed: {}", tx, err);
            self.abort(active, &listeners);
            return Err(err);
        }
        self.write_state().release(tx);

        for listener in &listeners {
            listener.after_commit(&active.data);
        }
        debug!("Committed transaction {} ({} changes)", tx, active.data.len());
        Ok(())
    }

    fn rollback(&self, tx: TxId) -> GraphResult<()> {
        let Some(active) = self.finish(tx, true)? else {
            return Ok(());
        };
        if !self.is_open() {
            return Ok(());
        }
        let listeners = self.listeners_snapshot();
        self.abort(active, &listeners);
        Ok(())
    }

    fn create_node(&self) -> GraphResult<NodeId> {
        self.write(|state, tx| {
            let id = NodeId::new(state.counters.next_node_id);
            state.counters.next_node_id += 1;
            state.insert_node(NodeRecord::new(id));
            state.claim(tx.id, EntityId::Node(id))?;

            tx.undo.push(Undo::CreateNode(id));
            tx.data.created_nodes.push(id);
            debug!("Created node {}", id);
            Ok(id)
        })
    }

    fn create_relationship(&self, from: NodeId, to: NodeId, edge_type: EdgeType) -> GraphResult<EdgeId> {
        self.write(|state, tx| {
            // Validate nodes exist
            if !state.nodes.contains_key(&from) {
                return Err(GraphError::InvalidEdgeSource(from));
            }
            if !state.nodes.contains_key(&to) {
                return Err(GraphError::InvalidEdgeTarget(to));
            }
            state.check_owner(tx.id, EntityId::Node(from))?;
            state.check_owner(tx.id, EntityId::Node(to))?;

            let id = EdgeId::new(state.counters.next_edge_id);
            state.counters.next_edge_id += 1;
            state.insert_edge(EdgeRecord::new(id, from, to, edge_type));
            state.claim(tx.id, EntityId::Relationship(id))?;

            tx.undo.push(Undo::CreateEdge(id));
            tx.data.created_relationships.push(id);
            debug!("Created relationship {} from {} to {}", id, from, to);
            Ok(id)
        })
    }

    fn check_node(&self, id: NodeId) -> GraphResult<()> {
        self.ensure_open()?;
        let state = self.read_state();
        if state.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(state.missing_node(id))
        }
    }

    fn relationship(&self, id: EdgeId) -> GraphResult<RelationshipEnds> {
        self.ensure_open()?;
        let state = self.read_state();
        state
            .edges
            .get(&id)
            .map(|edge| RelationshipEnds {
                start: edge.source,
                end: edge.target,
                edge_type: edge.edge_type.clone(),
            })
            .ok_or_else(|| state.missing_edge(id))
    }

    fn property(&self, entity: EntityId, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.ensure_open()?;
        Ok(self.read_state().properties(entity)?.get(key).cloned())
    }

    fn set_property(
        &self,
        entity: EntityId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<Option<PropertyValue>> {
        self.write(|state, tx| {
            state.claim_key(tx.id, entity, key)?;
            let old = state.set_property(entity, key, value.clone())?;
            tx.undo.push(Undo::Property {
                entity,
                key: key.to_string(),
                old: old.clone(),
            });
            tx.data.property_changes.push(PropertyChange {
                entity,
                key: key.to_string(),
                old: old.clone(),
                new: Some(value),
            });
            Ok(old)
        })
    }

    fn remove_property(&self, entity: EntityId, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.write(|state, tx| {
            state.claim_key(tx.id, entity, key)?;
            let old = state.remove_property(entity, key)?;
            if old.is_some() {
                tx.undo.push(Undo::Property {
                    entity,
                    key: key.to_string(),
                    old: old.clone(),
                });
                tx.data.property_changes.push(PropertyChange {
                    entity,
                    key: key.to_string(),
                    old: old.clone(),
                    new: None,
                });
            }
            Ok(old)
        })
    }

    fn properties(&self, entity: EntityId) -> GraphResult<PropertyMap> {
        self.ensure_open()?;
        Ok(self.read_state().properties(entity)?.clone())
    }

    fn relationships_of(&self, node: NodeId, direction: Direction) -> GraphResult<Vec<EdgeId>> {
        self.ensure_open()?;
        let state = self.read_state();
        if !state.nodes.contains_key(&node) {
            return Err(state.missing_node(node));
        }
        Ok(state.relationship_ids(node, direction))
    }

    fn delete_node(&self, id: NodeId) -> GraphResult<()> {
        self.write(|state, tx| {
            if !state.nodes.contains_key(&id) {
                return Err(state.missing_node(id));
            }
            let count = state.relationship_ids(id, Direction::Both).len();
            if count > 0 {
                return Err(GraphError::NodeHasRelationships { node: id, count });
            }
            state.claim(tx.id, EntityId::Node(id))?;

            let Some(node) = state.remove_node(id) else {
                return Err(state.missing_node(id));
            };
            tx.data.deleted_nodes.push(DeletedNode {
                id,
                properties: node.properties.clone(),
            });
            tx.undo.push(Undo::DeleteNode(node));
            debug!("Deleted node {}", id);
            Ok(())
        })
    }

    fn delete_relationship(&self, id: EdgeId) -> GraphResult<()> {
        self.write(|state, tx| {
            let (source, target) = match state.edges.get(&id) {
                Some(edge) => (edge.source, edge.target),
                None => return Err(state.missing_edge(id)),
            };
            state.claim(tx.id, EntityId::Relationship(id))?;
            state.pin(tx.id, source)?;
            state.pin(tx.id, target)?;

            let Some(edge) = state.remove_edge(id) else {
                return Err(state.missing_edge(id));
            };
            tx.data.deleted_relationships.push(DeletedRelationship {
                id,
                source: edge.source,
                target: edge.target,
                edge_type: edge.edge_type.clone(),
                properties: edge.properties.clone(),
            });
            tx.undo.push(Undo::DeleteEdge(edge));
            debug!("Deleted relationship {}", id);
            Ok(())
        })
    }

    fn all_nodes(&self) -> GraphResult<NodeIds> {
        self.ensure_open()?;
        let end = self.read_state().counters.next_node_id;
        Ok(Box::new(NodeIdIter {
            state: Arc::clone(&self.state),
            next: 1,
            end,
        }))
    }

    fn register_commit_listener(&self, listener: Arc<dyn TransactionEventHandler>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn unregister_commit_listener(&self, listener: &Arc<dyn TransactionEventHandler>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let position = listeners
            .iter()
            .position(|l| std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        match position {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for EmbeddedGraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedGraphStore")
            .field("open", &self.is_open())
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Counts callbacks and optionally vetoes every commit
    #[derive(Default)]
    struct Recorder {
        veto: bool,
        before: AtomicUsize,
        after: AtomicUsize,
        rolled_back: AtomicUsize,
    }

    impl TransactionEventHandler for Recorder {
        fn before_commit(&self, _data: &TransactionData) -> anyhow::Result<()> {
            self.before.fetch_add(1, Ordering::SeqCst);
            if self.veto {
                anyhow::bail!("vetoed by test");
            }
            Ok(())
        }

        fn after_commit(&self, _data: &TransactionData) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }

        fn after_rollback(&self, _data: &TransactionData) {
            self.rolled_back.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_not_found_vs_already_deleted() {
        let store = EmbeddedGraphStore::in_memory();
        let a = store.create_node().unwrap();
        store.delete_node(a).unwrap();

        assert!(matches!(
            store.check_node(a),
            Err(GraphError::AlreadyDeleted(EntityId::Node(id))) if id == a
        ));
        assert!(matches!(
            store.check_node(NodeId::new(1000)),
            Err(GraphError::NotFound(_))
        ));
        assert!(matches!(
            store.relationship(EdgeId::new(1)),
            Err(GraphError::NotFound(_))
        ));
    }

    #[test]
    fn test_relationship_requires_live_endpoints() {
        let store = EmbeddedGraphStore::in_memory();
        let a = store.create_node().unwrap();

        let result = store.create_relationship(a, NodeId::new(42), "friend".into());
        assert!(matches!(result, Err(GraphError::InvalidEdgeTarget(_))));

        let result = store.create_relationship(NodeId::new(42), a, "friend".into());
        assert!(matches!(result, Err(GraphError::InvalidEdgeSource(_))));

        assert_eq!(store.relationship_count(), 0);
    }

    #[test]
    fn test_delete_node_with_relationships_is_rejected() {
        let store = EmbeddedGraphStore::in_memory();
        let a = store.create_node().unwrap();
        let b = store.create_node().unwrap();
        let r = store.create_relationship(a, b, "friend".into()).unwrap();

        let result = store.delete_node(a);
        assert!(matches!(
            result,
            Err(GraphError::NodeHasRelationships { count: 1, .. })
        ));
        assert!(store.check_node(a).is_ok());

        store.delete_relationship(r).unwrap();
        store.delete_node(a).unwrap();
        assert!(store.check_node(b).is_ok());
    }

    #[test]
    fn test_rollback_undoes_everything() {
        let store = EmbeddedGraphStore::in_memory();
        let a = store.create_node().unwrap();
        let b = store.create_node().unwrap();
        store
            .set_property(EntityId::Node(a), "name", "A".into())
            .unwrap();
        let r = store.create_relationship(a, b, "friend".into()).unwrap();

        let tx = store.begin_tx().unwrap();
        let c = store.create_node().unwrap();
        store
            .set_property(EntityId::Node(a), "name", "changed".into())
            .unwrap();
        store.remove_property(EntityId::Node(a), "name").unwrap();
        store.delete_relationship(r).unwrap();
        store.delete_node(b).unwrap();
        store.rollback(tx).unwrap();

        assert!(store.check_node(c).is_err());
        assert!(store.check_node(b).is_ok());
        assert_eq!(store.relationship(r).unwrap().end, b);
        assert_eq!(
            store.property(EntityId::Node(a), "name").unwrap(),
            Some(PropertyValue::from("A"))
        );
        assert_eq!(store.relationships_of(a, Direction::Outgoing).unwrap(), vec![r]);
    }

    #[test]
    fn test_nested_transactions_join_outer() {
        let store = EmbeddedGraphStore::in_memory();

        let outer = store.begin_tx().unwrap();
        let inner = store.begin_tx().unwrap();
        assert_eq!(outer, inner);

        let a = store.create_node().unwrap();
        store.commit(inner).unwrap();
        store.commit(outer).unwrap();
        assert!(store.check_node(a).is_ok());

        // inner rollback poisons the outer transaction
        let outer = store.begin_tx().unwrap();
        let inner = store.begin_tx().unwrap();
        let b = store.create_node().unwrap();
        store.rollback(inner).unwrap();
        let result = store.commit(outer);
        assert!(matches!(result, Err(GraphError::TransactionRolledBack(_))));
        assert!(store.check_node(b).is_err());
    }

    /// Run `$op` on a second thread, outside the caller's transaction
    macro_rules! on_other_thread {
        ($op:expr) => {
            thread::scope(|scope| scope.spawn(|| $op).join().unwrap())
        };
    }

    #[test]
    fn test_uncommitted_node_belongs_to_its_transaction() {
        let store = EmbeddedGraphStore::in_memory();
        let b = store.create_node().unwrap();

        let tx = store.begin_tx().unwrap();
        let x = store.create_node().unwrap();

        let (linked, written) = on_other_thread!({
            (
                store.create_relationship(x, b, "friend".into()),
                store.set_property(EntityId::Node(x), "name", "X".into()),
            )
        });
        assert!(matches!(
            linked,
            Err(GraphError::WriteConflict { entity: EntityId::Node(id), owner }) if id == x && owner == tx
        ));
        assert!(matches!(written, Err(GraphError::WriteConflict { .. })));

        store.rollback(tx).unwrap();
        assert_eq!(store.relationship_count(), 0);
        assert_eq!(store.relationships_of(b, Direction::Both).unwrap(), vec![]);

        // claims end with the transaction
        let y = store.create_node().unwrap();
        on_other_thread!(store.create_relationship(y, b, "friend".into())).unwrap();
    }

    #[test]
    fn test_concurrent_write_to_same_key_is_rejected() {
        let store = EmbeddedGraphStore::in_memory();
        let node = store.create_node().unwrap();
        let a = EntityId::Node(node);
        store.set_property(a, "name", "A".into()).unwrap();

        let tx = store.begin_tx().unwrap();
        store.set_property(a, "name", "mine".into()).unwrap();

        on_other_thread!({
            assert!(matches!(
                store.set_property(a, "name", "theirs".into()),
                Err(GraphError::WriteConflict { .. })
            ));
            assert!(matches!(
                store.remove_property(a, "name"),
                Err(GraphError::WriteConflict { .. })
            ));
            assert!(matches!(
                store.delete_node(node),
                Err(GraphError::WriteConflict { .. })
            ));
            store.set_property(a, "age", 30i64.into()).unwrap();
        });

        store.rollback(tx).unwrap();
        assert_eq!(store.property(a, "name").unwrap(), Some(PropertyValue::from("A")));
        assert_eq!(store.property(a, "age").unwrap(), Some(PropertyValue::Integer(30)));
    }

    #[test]
    fn test_deleted_relationship_pins_its_endpoints() {
        let store = EmbeddedGraphStore::in_memory();
        let a = store.create_node().unwrap();
        let b = store.create_node().unwrap();
        let r = store.create_relationship(a, b, "friend".into()).unwrap();

        let tx = store.begin_tx().unwrap();
        store.delete_relationship(r).unwrap();

        let deleted = on_other_thread!(store.delete_node(a));
        assert!(matches!(deleted, Err(GraphError::WriteConflict { .. })));
        // endpoints stay writable
        on_other_thread!(store.set_property(EntityId::Node(b), "seen", true.into())).unwrap();

        store.rollback(tx).unwrap();
        assert_eq!(store.relationship(r).unwrap().start, a);
        assert!(store.check_node(a).is_ok());
    }

    #[test]
    fn test_commit_writes_only_committed_values() {
        let temp_dir = TempDir::new().unwrap();
        let options = StorageOptions::default();

        let a = {
            let store = EmbeddedGraphStore::open(temp_dir.path(), &options).unwrap();
            let a = EntityId::Node(store.create_node().unwrap());
            store.set_property(a, "name", "A".into()).unwrap();

            let tx = store.begin_tx().unwrap();
            store.set_property(a, "name", "pending".into()).unwrap();
            store.set_property(a, "draft", true.into()).unwrap();
            // this commit rewrites the whole record of `a`
            on_other_thread!(store.set_property(a, "age", 30i64.into())).unwrap();
            store.rollback(tx).unwrap();

            store.close().unwrap();
            a
        };

        let store = EmbeddedGraphStore::open(temp_dir.path(), &options).unwrap();
        assert_eq!(store.property(a, "name").unwrap(), Some(PropertyValue::from("A")));
        assert_eq!(store.property(a, "draft").unwrap(), None);
        assert_eq!(store.property(a, "age").unwrap(), Some(PropertyValue::Integer(30)));
    }

    #[test]
    fn test_commit_listener_callbacks_and_veto() {
        let store = EmbeddedGraphStore::in_memory();
        let recorder = Arc::new(Recorder::default());
        let as_handler: Arc<dyn TransactionEventHandler> = recorder.clone();
        store.register_commit_listener(Arc::clone(&as_handler));

        store.create_node().unwrap();
        assert_eq!(recorder.before.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.after.load(Ordering::SeqCst), 1);

        assert!(store.unregister_commit_listener(&as_handler));
        assert!(!store.unregister_commit_listener(&as_handler));

        let vetoing = Arc::new(Recorder {
            veto: true,
            ..Default::default()
        });
        store.register_commit_listener(vetoing.clone());

        let tx = store.begin_tx().unwrap();
        let n = store.create_node().unwrap();
        let result = store.commit(tx);

        assert!(matches!(result, Err(GraphError::CommitVetoed { .. })));
        assert_eq!(vetoing.rolled_back.load(Ordering::SeqCst), 1);
        assert!(matches!(store.check_node(n), Err(GraphError::AlreadyDeleted(_))));
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn test_commit_from_wrong_transaction_id() {
        let store = EmbeddedGraphStore::in_memory();
        let tx = store.begin_tx().unwrap();
        let result = store.commit(TxId(tx.0 + 100));
        assert!(matches!(result, Err(GraphError::TransactionNotFound(_))));
        store.commit(tx).unwrap();
        assert!(matches!(store.commit(tx), Err(GraphError::TransactionNotFound(_))));
    }

    #[test]
    fn test_all_nodes_is_lazy_and_skips_deleted() {
        let store = EmbeddedGraphStore::in_memory();
        let ids: Vec<NodeId> = (0..4).map(|_| store.create_node().unwrap()).collect();
        store.delete_node(ids[1]).unwrap();

        let mut iter = store.all_nodes().unwrap();
        assert_eq!(iter.next(), Some(ids[0]));

        store.delete_node(ids[2]).unwrap();
        store.create_node().unwrap();

        let rest: Vec<NodeId> = iter.collect();
        assert_eq!(rest, vec![ids[3]]);
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = EmbeddedGraphStore::in_memory();
        let a = store.create_node().unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(!store.is_open());
        assert!(matches!(store.check_node(a), Err(GraphError::Closed)));
        assert!(matches!(store.create_node(), Err(GraphError::Closed)));
        assert!(matches!(store.begin_tx(), Err(GraphError::Closed)));
    }

    #[test]
    fn test_persistent_store_recovers_committed_data_only() {
        let temp_dir = TempDir::new().unwrap();
        let options = StorageOptions::default();

        let (a, b, r, deleted) = {
            let store = EmbeddedGraphStore::open(temp_dir.path(), &options).unwrap();
            let a = store.create_node().unwrap();
            let b = store.create_node().unwrap();
            let r = store.create_relationship(a, b, "friend".into()).unwrap();
            store
                .set_property(EntityId::Relationship(r), "since", 2001i64.into())
                .unwrap();
            let deleted = store.create_node().unwrap();
            store.delete_node(deleted).unwrap();

            let tx = store.begin_tx().unwrap();
            store.create_node().unwrap();
            store.rollback(tx).unwrap();

            store.close().unwrap();
            (a, b, r, deleted)
        };

        let store = EmbeddedGraphStore::open(temp_dir.path(), &options).unwrap();
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.relationship(r).unwrap().start, a);
        assert_eq!(store.relationship(r).unwrap().end, b);
        assert_eq!(
            store.property(EntityId::Relationship(r), "since").unwrap(),
            Some(PropertyValue::Integer(2001))
        );
        assert!(matches!(
            store.check_node(deleted),
            Err(GraphError::AlreadyDeleted(_))
        ));

        let fresh = store.create_node().unwrap();
        assert!(fresh.as_u64() > deleted.as_u64());
    }
}
