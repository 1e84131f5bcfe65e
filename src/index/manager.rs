//! In-process index backend
//!
//! Keeps one [`PropertyIndex`] per (namespace, field) pair.

use super::property_index::PropertyIndex;
use super::{IndexError, IndexProvider, IndexResult};
use crate::graph::{EntityId, PropertyValue};
use rustc_hash::FxHashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Key for identifying a property index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyIndexKey {
    pub namespace: String,
    pub field: String,
}

impl PropertyIndexKey {
    fn new(namespace: &str, field: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            field: field.to_string(),
        }
    }
}

/// Manager for all property indices
#[derive(Debug, Default)]
pub struct IndexManager {
    indices: RwLock<FxHashMap<PropertyIndexKey, Arc<RwLock<PropertyIndex>>>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of declared indexes
    pub fn index_count(&self) -> usize {
        self.indices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn get_index(&self, namespace: &str, field: &str) -> IndexResult<Arc<RwLock<PropertyIndex>>> {
        self.indices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&PropertyIndexKey::new(namespace, field))
            .cloned()
            .ok_or_else(|| IndexError::UnknownIndex {
                namespace: namespace.to_string(),
                field: field.to_string(),
            })
    }
}

impl IndexProvider for IndexManager {
    fn create_index(&self, namespace: &str, field: &str) -> IndexResult<()> {
        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        indices
            .entry(PropertyIndexKey::new(namespace, field))
            .or_insert_with(|| {
                debug!("Created index {}.{}", namespace, field);
                Arc::new(RwLock::new(PropertyIndex::new()))
            });
        Ok(())
    }

    fn has_index(&self, namespace: &str, field: &str) -> bool {
        self.indices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&PropertyIndexKey::new(namespace, field))
    }

    fn index_put(
        &self,
        namespace: &str,
        field: &str,
        value: &PropertyValue,
        entity: EntityId,
    ) -> IndexResult<()> {
        let index = self.get_index(namespace, field)?;
        index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value.clone(), entity);
        Ok(())
    }

    fn index_remove(
        &self,
        namespace: &str,
        field: &str,
        value: &PropertyValue,
        entity: EntityId,
    ) -> IndexResult<()> {
        let index = self.get_index(namespace, field)?;
        index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(value, entity);
        Ok(())
    }

    fn query(&self, namespace: &str, field: &str, value: &PropertyValue) -> IndexResult<Vec<EntityId>> {
        let index = self.get_index(namespace, field)?;
        let entities = index.read().unwrap_or_else(PoisonError::into_inner).get(value);
        Ok(entities)
    }

    fn clear(&self) -> IndexResult<()> {
        let indices = self.indices.read().unwrap_or_else(PoisonError::into_inner);
        for index in indices.values() {
            index.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
        Ok(())
    }
}
