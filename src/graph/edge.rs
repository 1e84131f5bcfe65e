//! Stored relationship record
//!
//! A relationship is directed: it goes FROM `source` TO `target`. Both ends and
//! the type are fixed at creation.

use super::property::{PropertyMap, PropertyValue};
use super::types::{EdgeId, EdgeType, NodeId};
use serde::{Deserialize, Serialize};

/// A directed relationship as held by the embedded store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Unique identifier for this relationship
    pub id: EdgeId,

    /// Start node (relationship goes FROM this node)
    pub source: NodeId,

    /// End node (relationship goes TO this node)
    pub target: NodeId,

    /// Type of relationship (e.g., "friend")
    pub edge_type: EdgeType,

    /// Properties associated with this relationship
    pub properties: PropertyMap,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl EdgeRecord {
    pub fn new(id: EdgeId, source: NodeId, target: NodeId, edge_type: impl Into<EdgeType>) -> Self {
        EdgeRecord {
            id,
            source,
            target,
            edge_type: edge_type.into(),
            properties: PropertyMap::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn set_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.shift_remove(key)
    }

    /// The endpoint opposite `node`, or None if `node` is not an endpoint
    ///
    /// For a self-loop both ends are the same node, so that node is returned.
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if self.source == node {
            Some(self.target)
        } else if self.target == node {
            Some(self.source)
        } else {
            None
        }
    }

    /// Check if this relationship goes FROM a specific node
    pub fn starts_from(&self, node: NodeId) -> bool {
        self.source == node
    }

    /// Check if this relationship goes TO a specific node
    pub fn ends_at(&self, node: NodeId) -> bool {
        self.target == node
    }
}

impl PartialEq for EdgeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EdgeRecord {}
