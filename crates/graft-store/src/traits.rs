//! GraphStore trait: the boundary between the sync engine and a graph database.
//!
//! The engine only ever talks to storage through this trait. Implementations
//! include SQLite (persistent) and in-memory (for tests).

use async_trait::async_trait;
use graft_core::{EntityId, PropertyMap, PropertyValue};

use crate::error::Result;

/// Which nodes a lookup may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Only nodes that are neither hidden nor soft-deleted.
    Visible,
    /// Every node, including hidden and soft-deleted ones.
    All,
}

impl Visibility {
    pub(crate) fn admits(self, hidden: bool, deleted: bool) -> bool {
        match self {
            Visibility::Visible => !hidden && !deleted,
            Visibility::All => true,
        }
    }
}

/// A node as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    /// Destination-instance identifier.
    pub id: EntityId,
    /// Source-instance id this node was replicated from, if any.
    pub origin_id: Option<EntityId>,
    pub type_name: String,
    pub properties: PropertyMap,
    pub hidden: bool,
    pub deleted: bool,
}

impl StoredNode {
    pub fn name(&self) -> Option<&str> {
        self.properties.name()
    }

    /// True if `id` is either this node's own id or its recorded origin.
    pub fn answers_to(&self, id: &EntityId) -> bool {
        &self.id == id || self.origin_id.as_ref() == Some(id)
    }
}

/// A relationship as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRelationship {
    pub id: EntityId,
    pub origin_id: Option<EntityId>,
    pub type_name: String,
    pub properties: PropertyMap,
    /// Destination id of the start node.
    pub start_id: EntityId,
    /// Destination id of the end node.
    pub end_id: EntityId,
}

impl StoredRelationship {
    pub fn name(&self) -> Option<&str> {
        self.properties.name()
    }

    pub fn answers_to(&self, id: &EntityId) -> bool {
        &self.id == id || self.origin_id.as_ref() == Some(id)
    }
}

/// Async interface to a transactional property graph.
///
/// Every lookup by id matches either the entity's own id or the origin id it
/// was created with, so an entity replicated in an earlier session is found
/// again by its source id.
///
/// Transactions are connection-wide: between `begin_transaction` and
/// `commit_transaction`/`rollback_transaction` every mutation belongs to the
/// open batch.
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    /// Find a node by id or origin id.
    async fn find_node(&self, id: &EntityId, visibility: Visibility) -> Result<Option<StoredNode>>;

    /// Find a relationship by id or origin id.
    async fn find_relationship(&self, id: &EntityId) -> Result<Option<StoredRelationship>>;

    /// Find a visible node of `type_name` whose `name` property equals `name`.
    async fn find_node_by_type_and_name(
        &self,
        type_name: &str,
        name: &str,
    ) -> Result<Option<StoredNode>>;

    /// All visible nodes whose type is one of `types`, in creation order.
    async fn list_nodes(&self, types: &[String]) -> Result<Vec<StoredNode>>;

    /// All relationships whose type is one of `types`, in creation order.
    async fn list_relationships(&self, types: &[String]) -> Result<Vec<StoredRelationship>>;

    /// Relationships starting at `node`, in creation order.
    async fn outgoing_relationships(&self, node: &EntityId) -> Result<Vec<StoredRelationship>>;

    /// Read one property of a node or relationship.
    async fn get_property(&self, id: &EntityId, key: &str) -> Result<Option<PropertyValue>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a node and return its newly allocated id.
    async fn create_node(
        &self,
        type_name: &str,
        properties: &PropertyMap,
        origin: Option<&EntityId>,
    ) -> Result<EntityId>;

    /// Create a relationship between two existing nodes (destination ids).
    async fn create_relationship(
        &self,
        type_name: &str,
        start: &EntityId,
        end: &EntityId,
        properties: &PropertyMap,
        origin: Option<&EntityId>,
    ) -> Result<EntityId>;

    /// Overwrite the given properties on a node, keeping the others.
    async fn set_node_properties(&self, id: &EntityId, properties: &PropertyMap) -> Result<()>;

    /// Overwrite the given properties on a relationship, keeping the others.
    async fn set_relationship_properties(
        &self,
        id: &EntityId,
        properties: &PropertyMap,
    ) -> Result<()>;

    /// Hide or unhide a node.
    async fn set_node_hidden(&self, id: &EntityId, hidden: bool) -> Result<()>;

    /// Mark a node deleted without removing it.
    async fn soft_delete_node(&self, id: &EntityId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    async fn begin_transaction(&self) -> Result<()>;

    async fn commit_transaction(&self) -> Result<()>;

    async fn rollback_transaction(&self) -> Result<()>;

    /// Whether a transaction is currently open.
    async fn in_transaction(&self) -> Result<bool>;
}
