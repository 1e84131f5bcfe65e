//! Index registration for domain types
//!
//! An [`Indexer`] ties one domain type to a namespace in the backend. The
//! registry keeps the backend in step with committing transactions: for every
//! property write on an entity whose type has an indexer covering that field,
//! the old value is removed and the new one added.
//!
//! Backend writes happen while the commit can still be vetoed. A failing write
//! reverts the ones before it and vetoes the commit with the [`IndexError`](super::IndexError);
//! a commit rolled back after its writes went through has them reverted too.
//!
//! The type of an entity is resolved like wrapper resolution: the `_classname`
//! marker if an indexer is declared under it, then (relationships only) the
//! relationship type, then the default `Node` / `Relationship` indexer.

use super::{IndexManager, IndexProvider, IndexResult};
use crate::database::LifecycleListener;
use crate::entity::CLASSNAME_PROPERTY;
use crate::graph::{
    EdgeType, EntityId, EntityKind, GraphResult, GraphStore, PropertyValue, TransactionData,
};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

pub const DEFAULT_NODE_CLASS: &str = "Node";
pub const DEFAULT_RELATIONSHIP_CLASS: &str = "Relationship";

fn default_class(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Node => DEFAULT_NODE_CLASS,
        EntityKind::Relationship => DEFAULT_RELATIONSHIP_CLASS,
    }
}

/// Indexed fields of one domain type
pub struct Indexer {
    kind: EntityKind,
    class_name: String,
    namespace: String,
    fields: RwLock<BTreeSet<String>>,
    provider: Arc<dyn IndexProvider>,
}

impl Indexer {
    fn new(kind: EntityKind, class_name: &str, provider: Arc<dyn IndexProvider>) -> Self {
        Self {
            kind,
            class_name: class_name.to_string(),
            namespace: format!("{}:{}", kind, class_name),
            fields: RwLock::new(BTreeSet::new()),
            provider,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Backend namespace, `<kind>:<class name>`
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Declare `field` as indexed. Returns `self` so declarations can be chained.
    pub fn index(&self, field: &str) -> IndexResult<&Self> {
        let mut fields = self.fields.write().unwrap_or_else(PoisonError::into_inner);
        if !fields.contains(field) {
            self.provider.create_index(&self.namespace, field)?;
            fields.insert(field.to_string());
            debug!("Indexing {} on {}", field, self.namespace);
        }
        Ok(self)
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(field)
    }

    pub fn fields(&self) -> Vec<String> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Entities of this type whose committed `field` equals `value`
    pub fn find(&self, field: &str, value: impl Into<PropertyValue>) -> IndexResult<Vec<EntityId>> {
        self.provider.query(&self.namespace, field, &value.into())
    }
}

impl fmt::Debug for Indexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("namespace", &self.namespace)
            .field("fields", &self.fields())
            .finish()
    }
}

type Indexers = RwLock<FxHashMap<String, Arc<Indexer>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Put,
    Remove,
}

/// One backend write derived from a transaction
#[derive(Debug, Clone)]
struct IndexWrite {
    kind: WriteKind,
    namespace: String,
    field: String,
    value: PropertyValue,
    entity: EntityId,
}

impl IndexWrite {
    fn new(kind: WriteKind, indexer: &Indexer, field: &str, value: &PropertyValue, entity: EntityId) -> Self {
        Self {
            kind,
            namespace: indexer.namespace().to_string(),
            field: field.to_string(),
            value: value.clone(),
            entity,
        }
    }

    fn inverse(&self) -> Self {
        let kind = match self.kind {
            WriteKind::Put => WriteKind::Remove,
            WriteKind::Remove => WriteKind::Put,
        };
        Self { kind, ..self.clone() }
    }

    fn run(&self, provider: &dyn IndexProvider) -> IndexResult<()> {
        match self.kind {
            WriteKind::Put => provider.index_put(&self.namespace, &self.field, &self.value, self.entity),
            WriteKind::Remove => {
                provider.index_remove(&self.namespace, &self.field, &self.value, self.entity)
            }
        }
    }
}

/// All indexers of a database
pub struct IndexRegistry {
    provider: Arc<dyn IndexProvider>,
    node_indexers: Indexers,
    relationship_indexers: Indexers,
    store: RwLock<Option<Arc<dyn GraphStore>>>,
    /// Writes of commits still in flight, by committing thread
    in_flight: Mutex<FxHashMap<ThreadId, Vec<IndexWrite>>>,
}

impl IndexRegistry {
    /// Create a registry over `provider` with the default indexers declared
    pub fn new(provider: Arc<dyn IndexProvider>) -> Self {
        let registry = Self {
            provider,
            node_indexers: RwLock::new(FxHashMap::default()),
            relationship_indexers: RwLock::new(FxHashMap::default()),
            store: RwLock::new(None),
            in_flight: Mutex::new(FxHashMap::default()),
        };
        registry.node_indexer(DEFAULT_NODE_CLASS);
        registry.rel_indexer(DEFAULT_RELATIONSHIP_CLASS);
        registry
    }

    /// Registry backed by an [`IndexManager`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(IndexManager::new()))
    }

    pub fn provider(&self) -> &Arc<dyn IndexProvider> {
        &self.provider
    }

    /// Indexer for node type `class_name`, declared on first use
    pub fn node_indexer(&self, class_name: &str) -> Arc<Indexer> {
        self.declare(EntityKind::Node, class_name)
    }

    /// Indexer for relationship type `class_name`, declared on first use
    ///
    /// `class_name` matches either a relationship wrapper's class marker or a
    /// relationship type such as `friend`.
    pub fn rel_indexer(&self, class_name: &str) -> Arc<Indexer> {
        self.declare(EntityKind::Relationship, class_name)
    }

    /// Declared indexer, without declaring one
    pub fn indexer(&self, kind: EntityKind, class_name: &str) -> Option<Arc<Indexer>> {
        self.indexers(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class_name)
            .cloned()
    }

    /// Attach to a freshly opened store. Entries left from an earlier store are dropped.
    pub(crate) fn bind(&self, store: Arc<dyn GraphStore>) -> IndexResult<()> {
        self.provider.clear()?;
        *self.store.write().unwrap_or_else(PoisonError::into_inner) = Some(store);
        Ok(())
    }

    pub(crate) fn unbind(&self) {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_bound(&self) -> bool {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn indexers(&self, kind: EntityKind) -> &Indexers {
        match kind {
            EntityKind::Node => &self.node_indexers,
            EntityKind::Relationship => &self.relationship_indexers,
        }
    }

    fn declare(&self, kind: EntityKind, class_name: &str) -> Arc<Indexer> {
        let mut indexers = self.indexers(kind).write().unwrap_or_else(PoisonError::into_inner);
        let indexer = indexers.entry(class_name.to_string()).or_insert_with(|| {
            debug!("Declared {} indexer {}", kind, class_name);
            Arc::new(Indexer::new(kind, class_name, Arc::clone(&self.provider)))
        });
        Arc::clone(indexer)
    }

    fn resolve(
        &self,
        kind: EntityKind,
        marker: Option<&PropertyValue>,
        edge_type: Option<&EdgeType>,
    ) -> Option<Arc<Indexer>> {
        marker
            .and_then(PropertyValue::as_string)
            .and_then(|class| self.indexer(kind, class))
            .or_else(|| edge_type.and_then(|t| self.indexer(kind, t.as_str())))
            .or_else(|| self.indexer(kind, default_class(kind)))
    }

    /// Indexer for an entity that is live in `store`
    fn resolve_live(&self, store: &dyn GraphStore, entity: EntityId) -> GraphResult<Option<Arc<Indexer>>> {
        let marker = store.property(entity, CLASSNAME_PROPERTY)?;
        let edge_type = match entity {
            EntityId::Node(_) => None,
            EntityId::Relationship(id) => Some(store.relationship(id)?.edge_type),
        };
        Ok(self.resolve(entity.kind(), marker.as_ref(), edge_type.as_ref()))
    }

    /// Indexer for an entity deleted in `data`
    fn resolve_deleted(&self, data: &TransactionData, entity: EntityId) -> Option<Arc<Indexer>> {
        let marker = data.deleted_properties(entity)?.get(CLASSNAME_PROPERTY);
        let edge_type = match entity {
            EntityId::Node(_) => None,
            EntityId::Relationship(id) => data
                .deleted_relationships
                .iter()
                .find(|r| r.id == id)
                .map(|r| &r.edge_type),
        };
        self.resolve(entity.kind(), marker, edge_type)
    }

    fn remove_entity(&self, writes: &mut Vec<IndexWrite>, data: &TransactionData, entity: EntityId) {
        let Some(indexer) = self.resolve_deleted(data, entity) else {
            return;
        };
        let Some(properties) = data.deleted_properties(entity) else {
            return;
        };
        for field in indexer.fields() {
            if let Some(value) = properties.get(&field) {
                writes.push(IndexWrite::new(WriteKind::Remove, &indexer, &field, value, entity));
            }
        }
    }

    /// Backend writes that mirror `data`, in order
    fn plan(&self, data: &TransactionData) -> Vec<IndexWrite> {
        let store = self
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(store) = store else {
            return Vec::new();
        };

        let mut writes = Vec::new();
        let mut resolved: FxHashMap<EntityId, Option<Arc<Indexer>>> = FxHashMap::default();

        for change in &data.property_changes {
            let indexer = match resolved.get(&change.entity) {
                Some(indexer) => indexer.clone(),
                None => {
                    let indexer = if data.was_deleted(change.entity) {
                        self.resolve_deleted(data, change.entity)
                    } else {
                        match self.resolve_live(store.as_ref(), change.entity) {
                            Ok(indexer) => indexer,
                            Err(err) => {
                                debug!("Skipping index update for {}: {}", change.entity, err);
                                None
                            }
                        }
                    };
                    resolved.insert(change.entity, indexer.clone());
                    indexer
                }
            };

            let Some(indexer) = indexer else { continue };
            if !indexer.is_indexed(&change.key) {
                continue;
            }
            let entity = change.entity;
            if let Some(old) = &change.old {
                writes.push(IndexWrite::new(WriteKind::Remove, &indexer, &change.key, old, entity));
            }
            if let Some(new) = &change.new {
                writes.push(IndexWrite::new(WriteKind::Put, &indexer, &change.key, new, entity));
            }
        }

        for deleted in &data.deleted_relationships {
            self.remove_entity(&mut writes, data, EntityId::Relationship(deleted.id));
        }
        for deleted in &data.deleted_nodes {
            self.remove_entity(&mut writes, data, EntityId::Node(deleted.id));
        }
        writes
    }

    /// Run `writes` in order; on failure undo the ones that went through
    fn execute(&self, writes: &[IndexWrite]) -> IndexResult<()> {
        for (done, write) in writes.iter().enumerate() {
            if let Err(err) = write.run(self.provider.as_ref()) {
                warn!("Index write on {} failed: {}", write.entity, err);
                self.revert(&writes[..done]);
                return Err(err);
            }
        }
        Ok(())
    }

    fn revert(&self, writes: &[IndexWrite]) {
        for write in writes.iter().rev() {
            if let Err(err) = write.inverse().run(self.provider.as_ref()) {
                warn!("Could not revert index write on {}: {}", write.entity, err);
            }
        }
    }

    /// Mirror one transaction into the backend, all or nothing
    pub fn apply(&self, data: &TransactionData) -> IndexResult<()> {
        self.execute(&self.plan(data))
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, FxHashMap<ThreadId, Vec<IndexWrite>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LifecycleListener for IndexRegistry {
    fn on_prepare(&self, data: &TransactionData) -> anyhow::Result<()> {
        let writes = self.plan(data);
        self.execute(&writes)?;
        if !writes.is_empty() {
            self.lock_in_flight().insert(thread::current().id(), writes);
        }
        Ok(())
    }

    fn on_commit(&self, _data: &TransactionData) {
        self.lock_in_flight().remove(&thread::current().id());
    }

    fn on_rollback(&self, _data: &TransactionData) {
        let writes = self.lock_in_flight().remove(&thread::current().id());
        if let Some(writes) = writes {
            debug!("Reverting {} index write(s) of a rolled back commit", writes.len());
            self.revert(&writes);
        }
    }
}

impl fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |indexers: &Indexers| -> Vec<String> {
            let mut names: Vec<String> = indexers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect();
            names.sort();
            names
        };
        f.debug_struct("IndexRegistry")
            .field("node_indexers", &names(&self.node_indexers))
            .field("relationship_indexers", &names(&self.relationship_indexers))
            .field("bound", &self.is_bound())
            .finish()
    }
}
