//! Relationship facade
//!
//! A relationship always has two live endpoints: creation validates both
//! before anything is written, and the store refuses to delete a node that
//! still has relationships.

use super::wrapper::{
    NodeLike, RelationshipLike, RelationshipWrapper, WrapperRegistry, CLASSNAME_PROPERTY,
};
use crate::database::Database;
use crate::error::{OgmError, OgmResult};
use crate::graph::{
    same_store, EdgeId, EdgeType, GraphError, GraphStore, PropertyMap, PropertyValue,
    RelationshipHandle,
};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Default relationship wrapper
#[derive(Clone)]
pub struct Relationship {
    handle: RelationshipHandle,
    wrappers: Arc<WrapperRegistry>,
}

impl Relationship {
    pub(crate) fn from_handle(handle: RelationshipHandle, wrappers: Arc<WrapperRegistry>) -> Self {
        Self { handle, wrappers }
    }

    /// Create a relationship of `rel_type` from `from` to `to`
    ///
    /// Both endpoints must be live nodes of `db`'s store, otherwise nothing is
    /// written and the call fails with [`OgmError::InvariantViolation`]. The
    /// relationship and its properties are written in one transaction; the
    /// first failing property write aborts it.
    ///
    /// Returns the raw handle; wrap it through the registry when typed access
    /// is needed.
    pub fn create(
        db: &Database,
        rel_type: impl Into<EdgeType>,
        from: &dyn NodeLike,
        to: &dyn NodeLike,
        props: Option<PropertyMap>,
    ) -> OgmResult<RelationshipHandle> {
        let store = db.store()?;
        let rel_type = rel_type.into();
        check_endpoint(&store, from, "start")?;
        check_endpoint(&store, to, "end")?;

        let tx = db.begin_tx()?;
        let id = match store.create_relationship(from.node().id(), to.node().id(), rel_type.clone()) {
            Ok(id) => id,
            Err(GraphError::InvalidEdgeSource(node) | GraphError::InvalidEdgeTarget(node)) => {
                return Err(OgmError::InvariantViolation(format!(
                    "endpoint {} disappeared while creating {} relationship",
                    node, rel_type
                )));
            }
            Err(err) => return Err(err.into()),
        };

        let handle = RelationshipHandle::new(id, store);
        for (key, value) in props.unwrap_or_default() {
            handle.set_property(&key, value)?;
        }
        tx.commit()?;

        debug!(
            "Created {} relationship {} from {} to {}",
            rel_type,
            id,
            from.node().id(),
            to.node().id()
        );
        Ok(handle)
    }

    /// Create a relationship stamped with `T`'s class marker and wrap it as `T`
    pub fn create_typed<T: RelationshipWrapper>(
        db: &Database,
        rel_type: impl Into<EdgeType>,
        from: &dyn NodeLike,
        to: &dyn NodeLike,
        props: Option<PropertyMap>,
    ) -> OgmResult<T> {
        let mut all = PropertyMap::new();
        all.insert(CLASSNAME_PROPERTY.to_string(), T::CLASS_NAME.into());
        all.extend(props.unwrap_or_default());

        let handle = Self::create(db, rel_type, from, to, Some(all))?;
        Ok(T::wrap(Self::from_handle(handle, Arc::clone(db.wrappers()))))
    }

    /// Load a relationship by id; None if it never existed or has been deleted
    pub fn load(id: EdgeId, db: &Database) -> OgmResult<Option<Box<dyn RelationshipLike>>> {
        let store = db.store()?;
        match store.relationship(id) {
            Ok(_) => Ok(Some(
                db.wrappers()
                    .wrap_relationship(RelationshipHandle::new(id, store)),
            )),
            Err(GraphError::NotFound(_) | GraphError::AlreadyDeleted(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn id(&self) -> EdgeId {
        self.handle.id()
    }

    pub fn handle(&self) -> &RelationshipHandle {
        &self.handle
    }

    pub fn rel_type(&self) -> OgmResult<EdgeType> {
        Ok(self.handle.edge_type()?)
    }

    pub fn start_node(&self) -> OgmResult<Box<dyn NodeLike>> {
        Ok(self.wrappers.wrap_node(self.handle.start_node()?))
    }

    pub fn end_node(&self) -> OgmResult<Box<dyn NodeLike>> {
        Ok(self.wrappers.wrap_node(self.handle.end_node()?))
    }

    /// The endpoint opposite `node`
    ///
    /// For a self-loop this is the node itself. Fails with
    /// [`OgmError::InvariantViolation`] if `node` is not an endpoint.
    pub fn other_node(&self, node: &dyn NodeLike) -> OgmResult<Box<dyn NodeLike>> {
        let given = node.node().handle();
        let other = if same_store(given.store(), self.handle.store()) {
            self.handle.other_node(given.id())?
        } else {
            None
        };
        match other {
            Some(handle) => Ok(self.wrappers.wrap_node(handle)),
            None => Err(OgmError::InvariantViolation(format!(
                "{} is not an endpoint of {}",
                given.id(),
                self.id()
            ))),
        }
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

    /// Delete the relationship. Its endpoints are left alone.
    pub fn del(&self) -> OgmResult<()> {
        self.handle.delete()?;
        debug!("Deleted relationship {}", self.id());
        Ok(())
    }
}

fn check_endpoint(store: &Arc<dyn GraphStore>, node: &dyn NodeLike, end: &str) -> OgmResult<()> {
    let handle = node.node().handle();
    if !same_store(handle.store(), store) {
        return Err(OgmError::InvariantViolation(format!(
            "{} node {} belongs to a different store",
            end,
            handle.id()
        )));
    }
    match handle.check() {
        Ok(()) => Ok(()),
        Err(GraphError::NotFound(_) | GraphError::AlreadyDeleted(_)) => {
            Err(OgmError::InvariantViolation(format!(
                "{} node {} is not live",
                end,
                handle.id()
            )))
        }
        Err(err) => Err(err.into()),
    }
}

impl RelationshipWrapper for Relationship {
    const CLASS_NAME: &'static str = "Relationship";

    fn wrap(relationship: Relationship) -> Self {
        relationship
    }

    fn wrapped(&self) -> &Relationship {
        self
    }
}

impl PartialEq for Relationship {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Relationship {}

impl Hash for Relationship {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Relationship").field(&self.id().0).finish()
    }
}
