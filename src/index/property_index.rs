//! B-Tree based property index for fast lookups

use crate::graph::{EntityId, PropertyValue};
use std::collections::{BTreeMap, BTreeSet};

/// Index for one field in one namespace
#[derive(Debug, Clone)]
pub struct PropertyIndex {
    /// Value -> set of entities holding it
    index: BTreeMap<PropertyValue, BTreeSet<EntityId>>,
}

impl PropertyIndex {
    pub fn new() -> Self {
        Self {
            index: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, value: PropertyValue, entity: EntityId) {
        self.index.entry(value).or_default().insert(entity);
    }

    pub fn remove(&mut self, value: &PropertyValue, entity: EntityId) {
        if let Some(entities) = self.index.get_mut(value) {
            entities.remove(&entity);
            if entities.is_empty() {
                self.index.remove(value);
            }
        }
    }

    /// Entities holding exactly `value`, in id order
    pub fn get(&self, value: &PropertyValue) -> Vec<EntityId> {
        self.index
            .get(value)
            .map(|entities| entities.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }

    /// Number of distinct indexed values
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for PropertyIndex {
    fn default() -> Self {
        Self::new()
    }
}
