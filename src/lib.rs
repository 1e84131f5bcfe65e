//! Samyama OGM
//!
//! An object-graph mapping layer over an embedded, transactional graph store.
//! Application code works with typed domain objects instead of raw nodes and
//! relationships, declares secondary indexes on their fields, and observes
//! database and commit lifecycle events.
//!
//! # Architecture
//!
//! - [`graph`]: the embedded store behind the [`GraphStore`] trait, with
//!   per-thread transactions, commit listeners and entity handles
//! - [`persistence`]: RocksDB storage of committed records
//! - [`entity`]: [`Node`] and [`Relationship`] facades and the
//!   [`WrapperRegistry`] that resolves the `_classname` marker to domain types
//! - [`index`]: [`IndexRegistry`] and the [`IndexProvider`] backend trait
//! - [`database`]: [`Database`] lifecycle, [`EventHandler`] and transactions
//!
//! ## Example Usage
//!
//! ```rust
//! use samyama_ogm::{Database, Node, PropertyMap, Relationship};
//!
//! let db = Database::in_memory();
//! db.start().unwrap();
//!
//! let a = Node::create(&db).unwrap();
//! let b = Node::create(&db).unwrap();
//!
//! let mut props = PropertyMap::new();
//! props.insert("since".to_string(), 2001i64.into());
//! let handle = Relationship::create(&db, "friend", &a, &b, Some(props)).unwrap();
//!
//! let r = Relationship::load(handle.id(), &db).unwrap().unwrap();
//! assert_eq!(r.relationship().start_node().unwrap().node(), &a);
//! assert_eq!(r.relationship().end_node().unwrap().node(), &b);
//!
//! r.relationship().del().unwrap();
//! assert!(Relationship::load(handle.id(), &db).unwrap().is_none());
//!
//! db.shutdown().unwrap();
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod graph;
pub mod index;
pub mod persistence;

// Re-export main types for convenience
pub use config::{Config, ConfigError};

pub use database::{
    Database, EventHandler, LifecycleEvent, LifecycleListener, StoreFactory, Transaction,
};

pub use entity::{
    Node, NodeLike, NodeWrapper, Relationship, RelationshipLike, RelationshipWrapper,
    WrapperRegistry, CLASSNAME_PROPERTY,
};

pub use error::{OgmError, OgmResult};

pub use graph::{
    Direction, EdgeId, EdgeType, EmbeddedGraphStore, EntityId, EntityKind, GraphError,
    GraphResult, GraphStore, NodeHandle, NodeId, PropertyMap, PropertyValue,
    RelationshipHandle, TransactionData, TxId,
};

pub use index::{IndexError, IndexManager, IndexProvider, IndexRegistry, IndexResult, Indexer};

pub use persistence::{StorageError, StorageOptions};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
