//! Transaction change sets
//!
//! Captures what a transaction did to the graph so that commit listeners can
//! react to it (lifecycle events, index maintenance, persistence).

use super::property::{PropertyMap, PropertyValue};
use super::types::{EdgeId, EdgeType, EntityId, NodeId};

/// One property write or removal
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub entity: EntityId,
    pub key: String,
    /// Value before the write, None if the key was unset
    pub old: Option<PropertyValue>,
    /// Value after the write, None for a removal
    pub new: Option<PropertyValue>,
}

/// Final state of a node deleted in the transaction
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedNode {
    pub id: NodeId,
    pub properties: PropertyMap,
}

/// Final state of a relationship deleted in the transaction
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedRelationship {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    pub properties: PropertyMap,
}

/// Everything a transaction changed, in the order it happened per category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionData {
    pub created_nodes: Vec<NodeId>,
    pub created_relationships: Vec<EdgeId>,
    pub property_changes: Vec<PropertyChange>,
    pub deleted_nodes: Vec<DeletedNode>,
    pub deleted_relationships: Vec<DeletedRelationship>,
}

impl TransactionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.created_relationships.is_empty()
            && self.property_changes.is_empty()
            && self.deleted_nodes.is_empty()
            && self.deleted_relationships.is_empty()
    }

    /// Number of recorded changes across all categories
    pub fn len(&self) -> usize {
        self.created_nodes.len()
            + self.created_relationships.len()
            + self.property_changes.len()
            + self.deleted_nodes.len()
            + self.deleted_relationships.len()
    }

    pub fn was_deleted(&self, entity: EntityId) -> bool {
        match entity {
            EntityId::Node(id) => self.deleted_nodes.iter().any(|n| n.id == id),
            EntityId::Relationship(id) => self.deleted_relationships.iter().any(|r| r.id == id),
        }
    }

    /// Properties an entity had when it was deleted in this transaction
    pub fn deleted_properties(&self, entity: EntityId) -> Option<&PropertyMap> {
        match entity {
            EntityId::Node(id) => self
                .deleted_nodes
                .iter()
                .find(|n| n.id == id)
                .map(|n| &n.properties),
            EntityId::Relationship(id) => self
                .deleted_relationships
                .iter()
                .find(|r| r.id == id)
                .map(|r| &r.properties),
        }
    }

    /// Every entity whose stored record this transaction touched
    pub fn touched_entities(&self) -> Vec<EntityId> {
        let mut touched: Vec<EntityId> = Vec::with_capacity(self.len());
        touched.extend(self.created_nodes.iter().map(|id| EntityId::Node(*id)));
        touched.extend(
            self.created_relationships
                .iter()
                .map(|id| EntityId::Relationship(*id)),
        );
        touched.extend(self.property_changes.iter().map(|c| c.entity));
        touched.extend(self.deleted_nodes.iter().map(|n| EntityId::Node(n.id)));
        touched.extend(
            self.deleted_relationships
                .iter()
                .map(|r| EntityId::Relationship(r.id)),
        );
        touched.sort();
        touched.dedup();
        touched
    }
}
