//! Node facade

use super::wrapper::{NodeLike, NodeWrapper, RelationshipLike, WrapperRegistry, CLASSNAME_PROPERTY};
use crate::database::Database;
use crate::error::{OgmError, OgmResult};
use crate::graph::{
    Direction, EdgeType, GraphError, NodeHandle, NodeId, PropertyMap, PropertyValue,
};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Default node wrapper
///
/// Every typed node wrapper holds one of these; it carries the handle and the
/// registry used to resolve entities reached from this node.
#[derive(Clone)]
pub struct Node {
    handle: NodeHandle,
    wrappers: Arc<WrapperRegistry>,
}

impl Node {
    pub(crate) fn from_handle(handle: NodeHandle, wrappers: Arc<WrapperRegistry>) -> Self {
        Self { handle, wrappers }
    }

    /// Create an empty node
    pub fn create(db: &Database) -> OgmResult<Node> {
        Self::create_with(db, PropertyMap::new())
    }

    /// Create a node and write `props` in the same transaction
    pub fn create_with(db: &Database, props: PropertyMap) -> OgmResult<Node> {
        let store = db.store()?;
        let tx = db.begin_tx()?;

        let handle = NodeHandle::new(store.create_node()?, store);
        for (key, value) in props {
            handle.set_property(&key, value)?;
        }
        tx.commit()?;

        debug!("Created node {}", handle.id());
        Ok(Self::from_handle(handle, Arc::clone(db.wrappers())))
    }

    /// Create a node stamped with `T`'s class marker, so that later loads and
    /// navigation resolve it to `T`
    pub fn create_typed<T: NodeWrapper>(db: &Database, props: Option<PropertyMap>) -> OgmResult<T> {
        let mut all = PropertyMap::new();
        all.insert(CLASSNAME_PROPERTY.to_string(), T::CLASS_NAME.into());
        all.extend(props.unwrap_or_default());
        Ok(T::wrap(Self::create_with(db, all)?))
    }

    /// Load a node by id; None if it never existed or has been deleted
    pub fn load(id: NodeId, db: &Database) -> OgmResult<Option<Box<dyn NodeLike>>> {
        let store = db.store()?;
        match store.check_node(id) {
            Ok(()) => Ok(Some(db.wrappers().wrap_node(NodeHandle::new(id, store)))),
            Err(GraphError::NotFound(_) | GraphError::AlreadyDeleted(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.handle.id()
    }

    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    pub fn get_property(&self, key: &str) -> OgmResult<Option<PropertyValue>> {
        Ok(self.handle.property(key)?)
    }

    /// Write a property, returning the previous value
    pub fn set_property(
        &self,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> OgmResult<Option<PropertyValue>> {
        Ok(self.handle.set_property(key, value)?)
    }

    pub fn remove_property(&self, key: &str) -> OgmResult<Option<PropertyValue>> {
        Ok(self.handle.remove_property(key)?)
    }

    pub fn properties(&self) -> OgmResult<PropertyMap> {
        Ok(self.handle.properties()?)
    }

    /// The stored class marker, if any
    pub fn class_marker(&self) -> OgmResult<Option<String>> {
        Ok(self
            .get_property(CLASSNAME_PROPERTY)?
            .and_then(|value| value.as_string().map(str::to_string)))
    }

    /// Relationships in `direction`, optionally of one type, resolved to wrappers
    pub fn relationships(
        &self,
        direction: Direction,
        edge_type: Option<&EdgeType>,
    ) -> OgmResult<Vec<Box<dyn RelationshipLike>>> {
        let mut result = Vec::new();
        for handle in self.handle.relationships(direction)? {
            if let Some(wanted) = edge_type {
                if &handle.edge_type()? != wanted {
                    continue;
                }
            }
            result.push(self.wrappers.wrap_relationship(handle));
        }
        Ok(result)
    }

    pub fn outgoing(&self, edge_type: Option<&EdgeType>) -> OgmResult<Vec<Box<dyn RelationshipLike>>> {
        self.relationships(Direction::Outgoing, edge_type)
    }

    pub fn incoming(&self, edge_type: Option<&EdgeType>) -> OgmResult<Vec<Box<dyn RelationshipLike>>> {
        self.relationships(Direction::Incoming, edge_type)
    }

    /// Nodes at the other end of this node's relationships
    pub fn neighbours(
        &self,
        direction: Direction,
        edge_type: Option<&EdgeType>,
    ) -> OgmResult<Vec<Box<dyn NodeLike>>> {
        self.relationships(direction, edge_type)?
            .iter()
            .map(|rel| rel.relationship().other_node(self))
            .collect()
    }

    /// Delete the node. Fails while it still has relationships.
    pub fn del(&self) -> OgmResult<()> {
        match self.handle.delete() {
            Ok(()) => {
                debug!("Deleted node {}", self.id());
                Ok(())
            }
            Err(GraphError::NodeHasRelationships { node, count }) => Err(OgmError::InvariantViolation(
                format!("{} still has {} relationship(s); delete them first", node, count),
            )),
            Err(err) => Err(err.into()),
        }
    }
}

impl NodeWrapper for Node {
    const CLASS_NAME: &'static str = "Node";

    fn wrap(node: Node) -> Self {
        node
    }

    fn wrapped(&self) -> &Node {
        self
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Node").field(&self.id().0).finish()
    }
}
