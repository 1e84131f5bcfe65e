//! Raw entity handles
//!
//! A handle is an entity id bound to the store that allocated it. It is the
//! stable identity that typed wrappers hold on to: two handles are equal when
//! they name the same id in the same store instance.

use super::property::{PropertyMap, PropertyValue};
use super::store::{same_store, GraphResult, GraphStore};
use super::types::{Direction, EdgeId, EdgeType, EntityId, NodeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Handle to a stored node
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    store: Arc<dyn GraphStore>,
}

impl NodeHandle {
    /// Bind an id returned by `store` to it
    pub fn new(id: NodeId, store: Arc<dyn GraphStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::Node(self.id)
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Check the node is still live
    pub fn check(&self) -> GraphResult<()> {
        self.store.check_node(self.id)
    }

    pub fn property(&self, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.store.property(self.entity_id(), key)
    }

    pub fn set_property(
        &self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<Option<PropertyValue>> {
        self.store.set_property(self.entity_id(), key, value.into())
    }

    pub fn remove_property(&self, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.store.remove_property(self.entity_id(), key)
    }

    pub fn properties(&self) -> GraphResult<PropertyMap> {
        self.store.properties(self.entity_id())
    }

    pub fn relationships(&self, direction: Direction) -> GraphResult<Vec<RelationshipHandle>> {
        Ok(self
            .store
            .relationships_of(self.id, direction)?
            .into_iter()
            .map(|id| RelationshipHandle::new(id, Arc::clone(&self.store)))
            .collect())
    }

    pub fn delete(&self) -> GraphResult<()> {
        self.store.delete_node(self.id)
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && same_store(&self.store, &other.store)
    }
}

impl Eq for NodeHandle {}

impl Hash for NodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeHandle").field(&self.id.0).finish()
    }
}

/// Handle to a stored relationship
#[derive(Clone)]
pub struct RelationshipHandle {
    id: EdgeId,
    store: Arc<dyn GraphStore>,
}

impl RelationshipHandle {
    pub fn new(id: EdgeId, store: Arc<dyn GraphStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::Relationship(self.id)
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn edge_type(&self) -> GraphResult<EdgeType> {
        Ok(self.store.relationship(self.id)?.edge_type)
    }

    pub fn start_node(&self) -> GraphResult<NodeHandle> {
        let ends = self.store.relationship(self.id)?;
        Ok(NodeHandle::new(ends.start, Arc::clone(&self.store)))
    }

    pub fn end_node(&self) -> GraphResult<NodeHandle> {
        let ends = self.store.relationship(self.id)?;
        Ok(NodeHandle::new(ends.end, Arc::clone(&self.store)))
    }

    /// The endpoint opposite `node`; None if `node` is not an endpoint
    pub fn other_node(&self, node: NodeId) -> GraphResult<Option<NodeHandle>> {
        let ends = self.store.relationship(self.id)?;
        let other = if ends.start == node {
            Some(ends.end)
        } else if ends.end == node {
            Some(ends.start)
        } else {
            None
        };
        Ok(other.map(|id| NodeHandle::new(id, Arc::clone(&self.store))))
    }

    pub fn property(&self, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.store.property(self.entity_id(), key)
    }

    pub fn set_property(
        &self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<Option<PropertyValue>> {
        self.store.set_property(self.entity_id(), key, value.into())
    }

    pub fn remove_property(&self, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.store.remove_property(self.entity_id(), key)
    }

    pub fn properties(&self) -> GraphResult<PropertyMap> {
        self.store.properties(self.entity_id())
    }

    pub fn delete(&self) -> GraphResult<()> {
        self.store.delete_relationship(self.id)
    }
}

impl PartialEq for RelationshipHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && same_store(&self.store, &other.store)
    }
}

impl Eq for RelationshipHandle {}

impl Hash for RelationshipHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for RelationshipHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RelationshipHandle").field(&self.id.0).finish()
    }
}
