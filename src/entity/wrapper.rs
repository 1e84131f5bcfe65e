//! Typed wrapper resolution
//!
//! A wrapper is a transient domain object bound to one entity handle. Domain
//! types implement [`NodeWrapper`] or [`RelationshipWrapper`] and are registered
//! with a [`WrapperRegistry`] under their class name. When an entity is loaded
//! or reached by navigation, the registry reads its `_classname` marker and
//! builds the registered type, or the plain [`Node`] / [`Relationship`] when the
//! marker is missing or names nothing registered.
//!
//! Identity belongs to the handle: two wrappers are equal when their handles
//! are, whatever types the registry chose for them.

use super::node::Node;
use super::relationship::Relationship;
use crate::graph::{NodeHandle, PropertyValue, RelationshipHandle};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Property naming the wrapper type of an entity
pub const CLASSNAME_PROPERTY: &str = "_classname";

/// A domain type backed by a node
///
/// ```
/// use samyama_ogm::{Node, NodeWrapper};
///
/// struct Person(Node);
///
/// impl NodeWrapper for Person {
///     const CLASS_NAME: &'static str = "Person";
///
///     fn wrap(node: Node) -> Self {
///         Person(node)
///     }
///
///     fn wrapped(&self) -> &Node {
///         &self.0
///     }
/// }
/// ```
pub trait NodeWrapper: Send + Sync + 'static {
    /// Value stored in the `_classname` marker
    const CLASS_NAME: &'static str;

    fn wrap(node: Node) -> Self;

    fn wrapped(&self) -> &Node;
}

/// A domain type backed by a relationship
pub trait RelationshipWrapper: Send + Sync + 'static {
    const CLASS_NAME: &'static str;

    fn wrap(relationship: Relationship) -> Self;

    fn wrapped(&self) -> &Relationship;
}

/// Any resolved node wrapper
pub trait NodeLike: Send + Sync {
    /// The bound node
    fn node(&self) -> &Node;

    /// Class name of the concrete wrapper type
    fn class_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

/// Any resolved relationship wrapper
pub trait RelationshipLike: Send + Sync {
    fn relationship(&self) -> &Relationship;

    fn class_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

impl<T: NodeWrapper> NodeLike for T {
    fn node(&self) -> &Node {
        self.wrapped()
    }

    fn class_name(&self) -> &'static str {
        T::CLASS_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: RelationshipWrapper> RelationshipLike for T {
    fn relationship(&self) -> &Relationship {
        self.wrapped()
    }

    fn class_name(&self) -> &'static str {
        T::CLASS_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn NodeLike {
    /// The wrapper as its concrete type, if it is a `T`
    pub fn downcast_ref<T: NodeWrapper>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: NodeWrapper>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl dyn RelationshipLike {
    pub fn downcast_ref<T: RelationshipWrapper>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: RelationshipWrapper>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl PartialEq for dyn NodeLike {
    fn eq(&self, other: &Self) -> bool {
        self.node().handle() == other.node().handle()
    }
}

impl Eq for dyn NodeLike {}

impl Hash for dyn NodeLike {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node().handle().hash(state);
    }
}

impl fmt::Debug for dyn NodeLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.class_name(), self.node().id().0)
    }
}

impl PartialEq for dyn RelationshipLike {
    fn eq(&self, other: &Self) -> bool {
        self.relationship().handle() == other.relationship().handle()
    }
}

impl Eq for dyn RelationshipLike {}

impl Hash for dyn RelationshipLike {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.relationship().handle().hash(state);
    }
}

impl fmt::Debug for dyn RelationshipLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.class_name(), self.relationship().id().0)
    }
}

type NodeFactory = fn(Node) -> Box<dyn NodeLike>;
type RelationshipFactory = fn(Relationship) -> Box<dyn RelationshipLike>;

fn build_node<T: NodeWrapper>(node: Node) -> Box<dyn NodeLike> {
    Box::new(T::wrap(node))
}

fn build_relationship<T: RelationshipWrapper>(relationship: Relationship) -> Box<dyn RelationshipLike> {
    Box::new(T::wrap(relationship))
}

/// Class name to wrapper factory, per capability
#[derive(Default)]
pub struct WrapperRegistry {
    nodes: RwLock<FxHashMap<&'static str, NodeFactory>>,
    relationships: RwLock<FxHashMap<&'static str, RelationshipFactory>>,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve nodes marked `T::CLASS_NAME` to `T`. Re-registering a name replaces it.
    pub fn register_node<T: NodeWrapper>(&self) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(T::CLASS_NAME, build_node::<T>);
        debug!("Registered node wrapper {}", T::CLASS_NAME);
    }

    pub fn register_relationship<T: RelationshipWrapper>(&self) {
        self.relationships
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(T::CLASS_NAME, build_relationship::<T>);
        debug!("Registered relationship wrapper {}", T::CLASS_NAME);
    }

    pub fn has_node_wrapper(&self, class_name: &str) -> bool {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(class_name)
    }

    pub fn has_relationship_wrapper(&self, class_name: &str) -> bool {
        self.relationships
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(class_name)
    }

    /// Wrap a node handle in its registered type, or in a plain [`Node`]
    ///
    /// Never fails: a missing, non-string or unregistered marker, or a marker
    /// that cannot be read, all resolve to the default wrapper.
    pub fn wrap_node(self: &Arc<Self>, handle: NodeHandle) -> Box<dyn NodeLike> {
        let marker = handle.property(CLASSNAME_PROPERTY).ok().flatten();
        let node = Node::from_handle(handle, Arc::clone(self));

        let factory = marker.as_ref().and_then(PropertyValue::as_string).and_then(|class| {
            self.nodes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(class)
                .copied()
        });
        match factory {
            Some(factory) => factory(node),
            None => Box::new(node),
        }
    }

    /// Wrap a relationship handle in its registered type, or in a plain [`Relationship`]
    pub fn wrap_relationship(self: &Arc<Self>, handle: RelationshipHandle) -> Box<dyn RelationshipLike> {
        let marker = handle.property(CLASSNAME_PROPERTY).ok().flatten();
        let relationship = Relationship::from_handle(handle, Arc::clone(self));

        let factory = marker.as_ref().and_then(PropertyValue::as_string).and_then(|class| {
            self.relationships
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(class)
                .copied()
        });
        match factory {
            Some(factory) => factory(relationship),
            None => Box::new(relationship),
        }
    }
}

impl fmt::Debug for WrapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<&str> = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        nodes.sort_unstable();
        let mut relationships: Vec<&str> = self
            .relationships
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        relationships.sort_unstable();

        f.debug_struct("WrapperRegistry")
            .field("nodes", &nodes)
            .field("relationships", &relationships)
            .finish()
    }
}
