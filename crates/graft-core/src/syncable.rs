//! The syncable capability and the owned snapshots it produces.
//!
//! Any domain entity that wants to take part in replication implements
//! [`Syncable`]. The engine never holds on to the entity itself; it takes a
//! [`SyncableRef`] snapshot (id, type, properties and, for relationships,
//! endpoints) and asks for the entity's sync neighbours.

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, PropertyMap};

/// Snapshot of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    /// Source-instance identifier.
    pub id: EntityId,
    pub type_name: String,
    pub properties: PropertyMap,
    /// Content size in bytes; `Some` marks a file node whose content is
    /// transferred as chunks.
    pub file_size: Option<u64>,
}

impl NodeRef {
    /// A plain node with no properties.
    pub fn new(id: impl Into<EntityId>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            properties: PropertyMap::new(),
            file_size: None,
        }
    }

    /// Replace the property map.
    pub fn with_properties(mut self, properties: PropertyMap) -> Self {
        self.properties = properties;
        self
    }

    /// Mark this node as a file of `size` bytes.
    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    pub fn is_file(&self) -> bool {
        self.file_size.is_some()
    }
}

/// Snapshot of a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRef {
    /// Source-instance identifier.
    pub id: EntityId,
    pub type_name: String,
    pub properties: PropertyMap,
    /// Source-instance id of the start node.
    pub source_id: EntityId,
    /// Source-instance id of the end node.
    pub target_id: EntityId,
}

impl RelationshipRef {
    pub fn new(
        id: impl Into<EntityId>,
        type_name: impl Into<String>,
        source_id: impl Into<EntityId>,
        target_id: impl Into<EntityId>,
    ) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            properties: PropertyMap::new(),
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }

    pub fn with_properties(mut self, properties: PropertyMap) -> Self {
        self.properties = properties;
        self
    }
}

/// Either kind of syncable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncableRef {
    Node(NodeRef),
    Relationship(RelationshipRef),
}

impl SyncableRef {
    pub fn id(&self) -> &EntityId {
        match self {
            SyncableRef::Node(n) => &n.id,
            SyncableRef::Relationship(r) => &r.id,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            SyncableRef::Node(n) => &n.type_name,
            SyncableRef::Relationship(r) => &r.type_name,
        }
    }

    pub fn properties(&self) -> &PropertyMap {
        match self {
            SyncableRef::Node(n) => &n.properties,
            SyncableRef::Relationship(r) => &r.properties,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, SyncableRef::Node(_))
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self, SyncableRef::Relationship(_))
    }
}

/// Capability implemented by entities that can be replicated.
///
/// Implementors are usually cheap handles (an id plus a borrow of the
/// owning graph), since [`sync_data`](Syncable::sync_data) returns owned
/// neighbours.
pub trait Syncable: Sized {
    /// Snapshot as a node, or `None` if this entity is a relationship.
    fn sync_node(&self) -> Option<NodeRef>;

    /// Snapshot as a relationship, or `None` if this entity is a node.
    fn sync_relationship(&self) -> Option<RelationshipRef>;

    /// Directly reachable sync neighbours, in enumeration order.
    fn sync_data(&self) -> Vec<Self>;

    fn is_node(&self) -> bool {
        self.sync_node().is_some()
    }

    fn is_relationship(&self) -> bool {
        self.sync_relationship().is_some()
    }

    /// Snapshot of whichever kind this entity is.
    fn sync_ref(&self) -> Option<SyncableRef> {
        self.sync_node()
            .map(SyncableRef::Node)
            .or_else(|| self.sync_relationship().map(SyncableRef::Relationship))
    }
}

/// Lightweight descriptor returned by list-syncables. Carries no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableInfo {
    pub id: EntityId,
    pub type_name: String,
    pub name: Option<String>,
    pub is_node: bool,
}
