//! Object mapping over graph entities
//!
//! - [`Node`] and [`Relationship`]: default wrappers and the typed facades for
//!   creating, loading, navigating and deleting entities
//! - [`WrapperRegistry`]: resolves raw handles to registered domain types

pub mod node;
pub mod relationship;
pub mod wrapper;

pub use node::Node;
pub use relationship::Relationship;
pub use wrapper::{
    NodeLike, NodeWrapper, RelationshipLike, RelationshipWrapper, WrapperRegistry,
    CLASSNAME_PROPERTY,
};
