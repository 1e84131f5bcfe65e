//! Lifecycle event dispatch
//!
//! The [`EventHandler`] fans lifecycle notifications out to registered
//! listeners, synchronously and in registration order, on the thread that
//! caused them. It is installed as the store's commit listener while the
//! database runs, so every commit is replayed as entity-level events.

use super::Database;
use crate::error::{OgmError, OgmResult};
use crate::graph::{
    DeletedNode, DeletedRelationship, EdgeId, NodeId, PropertyChange, TransactionData,
    TransactionEventHandler,
};
use anyhow::Context;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Something that happened to the database or inside a committing transaction
#[derive(Debug)]
pub enum LifecycleEvent<'a> {
    /// The database finished starting
    Started(&'a Database),
    /// The database is about to close its store; entities are still readable
    Shutdown(&'a Database),
    NodeCreated(NodeId),
    RelationshipCreated(EdgeId),
    PropertyChanged(&'a PropertyChange),
    NodeDeleted(&'a DeletedNode),
    RelationshipDeleted(&'a DeletedRelationship),
}

impl LifecycleEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Started(_) => "started",
            LifecycleEvent::Shutdown(_) => "shutdown",
            LifecycleEvent::NodeCreated(_) => "node_created",
            LifecycleEvent::RelationshipCreated(_) => "relationship_created",
            LifecycleEvent::PropertyChanged(_) => "property_changed",
            LifecycleEvent::NodeDeleted(_) => "node_deleted",
            LifecycleEvent::RelationshipDeleted(_) => "relationship_deleted",
        }
    }
}

/// Receives lifecycle events
///
/// Every method defaults to doing nothing, so a listener implements only what
/// it cares about.
pub trait LifecycleListener: Send + Sync {
    /// Called for start and shutdown, and for each change of a committing
    /// transaction before it becomes final. An error from a change event vetoes
    /// the commit; an error from start or shutdown fails that call.
    fn on_event(&self, _event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once every listener accepted the change events, before the commit
    /// is written. An error vetoes the commit.
    fn on_prepare(&self, _data: &TransactionData) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once a transaction has committed
    fn on_commit(&self, _data: &TransactionData) {}

    /// Called after a transaction rolled back, whether or not it got as far as
    /// `on_prepare`
    fn on_rollback(&self, _data: &TransactionData) {}
}

/// Ordered set of lifecycle listeners
#[derive(Default)]
pub struct EventHandler {
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
}

impl EventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. There is no removal.
    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn notify_started(&self, db: &Database) -> OgmResult<()> {
        self.dispatch(&LifecycleEvent::Started(db))
    }

    pub fn notify_shutdown(&self, db: &Database) -> OgmResult<()> {
        self.dispatch(&LifecycleEvent::Shutdown(db))
    }

    /// Snapshot, so listeners may register others without deadlocking
    fn listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver `event` to every listener; the first failure stops delivery
    fn dispatch(&self, event: &LifecycleEvent<'_>) -> OgmResult<()> {
        debug!("Dispatching {} event", event.name());
        for listener in self.listeners() {
            listener
                .on_event(event)
                .map_err(|source| OgmError::ListenerFailure {
                    event: event.name(),
                    source,
                })?;
        }
        Ok(())
    }

    fn dispatch_changes(&self, data: &TransactionData) -> anyhow::Result<()> {
        let listeners = self.listeners();
        let events = data
            .created_nodes
            .iter()
            .map(|id| LifecycleEvent::NodeCreated(*id))
            .chain(
                data.created_relationships
                    .iter()
                    .map(|id| LifecycleEvent::RelationshipCreated(*id)),
            )
            .chain(data.property_changes.iter().map(LifecycleEvent::PropertyChanged))
            .chain(
                data.deleted_relationships
                    .iter()
                    .map(LifecycleEvent::RelationshipDeleted),
            )
            .chain(data.deleted_nodes.iter().map(LifecycleEvent::NodeDeleted));

        for event in events {
            for listener in &listeners {
                listener
                    .on_event(&event)
                    .with_context(|| format!("{} listener failed", event.name()))?;
            }
        }
        Ok(())
    }
}

impl TransactionEventHandler for EventHandler {
    fn before_commit(&self, data: &TransactionData) -> anyhow::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.dispatch_changes(data)?;
        for listener in self.listeners() {
            listener.on_prepare(data)?;
        }
        Ok(())
    }

    fn after_commit(&self, data: &TransactionData) {
        for listener in self.listeners() {
            listener.on_commit(data);
        }
    }

    fn after_rollback(&self, data: &TransactionData) {
        for listener in self.listeners() {
            listener.on_rollback(data);
        }
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
