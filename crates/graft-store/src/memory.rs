//! In-memory implementation of the GraphStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence. A transaction is a
//! copy of the committed graph; commit swaps it in, rollback drops it.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use graft_core::{EntityId, PropertyMap, PropertyValue};

use crate::error::{Result, StoreError};
use crate::traits::{GraphStore, StoredNode, StoredRelationship, Visibility};

/// In-memory graph store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryGraphStore {
    inner: RwLock<MemoryGraphInner>,
}

#[derive(Default)]
struct MemoryGraphInner {
    committed: Graph,
    /// Working copy while a transaction is open.
    pending: Option<Graph>,
}

impl MemoryGraphInner {
    fn graph(&self) -> &Graph {
        self.pending.as_ref().unwrap_or(&self.committed)
    }

    fn graph_mut(&mut self) -> &mut Graph {
        match self.pending {
            Some(ref mut graph) => graph,
            None => &mut self.committed,
        }
    }
}

#[derive(Clone, Default)]
struct Graph {
    /// Nodes in creation order.
    nodes: Vec<StoredNode>,
    node_index: HashMap<EntityId, usize>,
    relationships: Vec<StoredRelationship>,
    relationship_index: HashMap<EntityId, usize>,
}

impl Graph {
    fn node(&self, id: &EntityId) -> Option<&StoredNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    fn node_mut(&mut self, id: &EntityId) -> Result<&mut StoredNode> {
        match self.node_index.get(id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn relationship(&self, id: &EntityId) -> Option<&StoredRelationship> {
        self.relationship_index
            .get(id)
            .map(|&i| &self.relationships[i])
    }

    fn find_node(&self, id: &EntityId, visibility: Visibility) -> Option<&StoredNode> {
        self.node(id)
            .or_else(|| self.nodes.iter().find(|n| n.answers_to(id)))
            .filter(|n| visibility.admits(n.hidden, n.deleted))
    }
}

impl MemoryGraphStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryGraphInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryGraphInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryGraphInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }

    /// Number of nodes in the current view, hidden and deleted included.
    pub fn node_count(&self) -> Result<usize> {
        Ok(self.read()?.graph().nodes.len())
    }

    /// Number of relationships in the current view.
    pub fn relationship_count(&self) -> Result<usize> {
        Ok(self.read()?.graph().relationships.len())
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn type_matches(types: &[String], type_name: &str) -> bool {
    types.iter().any(|t| t == type_name)
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn find_node(&self, id: &EntityId, visibility: Visibility) -> Result<Option<StoredNode>> {
        let inner = self.read()?;
        Ok(inner.graph().find_node(id, visibility).cloned())
    }

    async fn find_relationship(&self, id: &EntityId) -> Result<Option<StoredRelationship>> {
        let inner = self.read()?;
        let graph = inner.graph();
        Ok(graph
            .relationship(id)
            .or_else(|| graph.relationships.iter().find(|r| r.answers_to(id)))
            .cloned())
    }

    async fn find_node_by_type_and_name(
        &self,
        type_name: &str,
        name: &str,
    ) -> Result<Option<StoredNode>> {
        let inner = self.read()?;
        Ok(inner
            .graph()
            .nodes
            .iter()
            .find(|n| {
                !n.hidden && !n.deleted && n.type_name == type_name && n.name() == Some(name)
            })
            .cloned())
    }

    async fn list_nodes(&self, types: &[String]) -> Result<Vec<StoredNode>> {
        let inner = self.read()?;
        Ok(inner
            .graph()
            .nodes
            .iter()
            .filter(|n| !n.hidden && !n.deleted && type_matches(types, &n.type_name))
            .cloned()
            .collect())
    }

    async fn list_relationships(&self, types: &[String]) -> Result<Vec<StoredRelationship>> {
        let inner = self.read()?;
        Ok(inner
            .graph()
            .relationships
            .iter()
            .filter(|r| type_matches(types, &r.type_name))
            .cloned()
            .collect())
    }

    async fn outgoing_relationships(&self, node: &EntityId) -> Result<Vec<StoredRelationship>> {
        let inner = self.read()?;
        Ok(inner
            .graph()
            .relationships
            .iter()
            .filter(|r| &r.start_id == node)
            .cloned()
            .collect())
    }

    async fn get_property(&self, id: &EntityId, key: &str) -> Result<Option<PropertyValue>> {
        let inner = self.read()?;
        let graph = inner.graph();
        if let Some(node) = graph.node(id) {
            return Ok(node.properties.get(key).cloned());
        }
        match graph.relationship(id) {
            Some(rel) => Ok(rel.properties.get(key).cloned()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn create_node(
        &self,
        type_name: &str,
        properties: &PropertyMap,
        origin: Option<&EntityId>,
    ) -> Result<EntityId> {
        let mut inner = self.write()?;
        let graph = inner.graph_mut();

        let id = EntityId::generate();
        graph.node_index.insert(id.clone(), graph.nodes.len());
        graph.nodes.push(StoredNode {
            id: id.clone(),
            origin_id: origin.cloned(),
            type_name: type_name.to_string(),
            properties: properties.clone(),
            hidden: false,
            deleted: false,
        });

        Ok(id)
    }

    async fn create_relationship(
        &self,
        type_name: &str,
        start: &EntityId,
        end: &EntityId,
        properties: &PropertyMap,
        origin: Option<&EntityId>,
    ) -> Result<EntityId> {
        let mut inner = self.write()?;
        let graph = inner.graph_mut();

        for endpoint in [start, end] {
            if graph.node(endpoint).is_none() {
                return Err(StoreError::NotFound(endpoint.to_string()));
            }
        }

        let id = EntityId::generate();
        graph
            .relationship_index
            .insert(id.clone(), graph.relationships.len());
        graph.relationships.push(StoredRelationship {
            id: id.clone(),
            origin_id: origin.cloned(),
            type_name: type_name.to_string(),
            properties: properties.clone(),
            start_id: start.clone(),
            end_id: end.clone(),
        });

        Ok(id)
    }

    async fn set_node_properties(&self, id: &EntityId, properties: &PropertyMap) -> Result<()> {
        let mut inner = self.write()?;
        inner.graph_mut().node_mut(id)?.properties.merge(properties);
        Ok(())
    }

    async fn set_relationship_properties(
        &self,
        id: &EntityId,
        properties: &PropertyMap,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let graph = inner.graph_mut();
        match graph.relationship_index.get(id) {
            Some(&i) => {
                graph.relationships[i].properties.merge(properties);
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn set_node_hidden(&self, id: &EntityId, hidden: bool) -> Result<()> {
        let mut inner = self.write()?;
        inner.graph_mut().node_mut(id)?.hidden = hidden;
        Ok(())
    }

    async fn soft_delete_node(&self, id: &EntityId) -> Result<()> {
        let mut inner = self.write()?;
        inner.graph_mut().node_mut(id)?.deleted = true;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.write()?;
        if inner.pending.is_some() {
            return Err(StoreError::Transaction(
                "transaction already open".to_string(),
            ));
        }
        inner.pending = Some(inner.committed.clone());
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        let mut inner = self.write()?;
        match inner.pending.take() {
            Some(graph) => {
                inner.committed = graph;
                Ok(())
            }
            None => Err(StoreError::Transaction("no open transaction".to_string())),
        }
    }

    async fn rollback_transaction(&self) -> Result<()> {
        let mut inner = self.write()?;
        match inner.pending.take() {
            Some(_) => Ok(()),
            None => Err(StoreError::Transaction("no open transaction".to_string())),
        }
    }

    async fn in_transaction(&self) -> Result<bool> {
        Ok(self.read()?.pending.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(name: &str) -> PropertyMap {
        PropertyMap::new().with("name", name)
    }

    #[tokio::test]
    async fn test_create_and_find_by_origin() {
        let store = MemoryGraphStore::new();
        let origin = EntityId::new("remote-1");
        let id = store
            .create_node("Page", &page("home"), Some(&origin))
            .await
            .unwrap();

        let by_id = store.find_node(&id, Visibility::Visible).await.unwrap();
        let by_origin = store.find_node(&origin, Visibility::Visible).await.unwrap();
        assert_eq!(by_id, by_origin);
        assert_eq!(by_id.unwrap().name(), Some("home"));
    }

    #[tokio::test]
    async fn test_deleted_nodes_need_all_visibility() {
        let store = MemoryGraphStore::new();
        let id = store.create_node("Page", &page("old"), None).await.unwrap();
        store.soft_delete_node(&id).await.unwrap();

        assert!(store
            .find_node(&id, Visibility::Visible)
            .await
            .unwrap()
            .is_none());
        assert!(store.find_node(&id, Visibility::All).await.unwrap().is_some());
        assert!(store.list_nodes(&["Page".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_discards_batch() {
        let store = MemoryGraphStore::new();
        store.create_node("Page", &page("kept"), None).await.unwrap();

        store.begin_transaction().await.unwrap();
        store.create_node("Page", &page("dropped"), None).await.unwrap();
        assert_eq!(store.node_count().unwrap(), 2);
        store.rollback_transaction().await.unwrap();

        assert_eq!(store.node_count().unwrap(), 1);
        assert!(store
            .find_node_by_type_and_name("Page", "dropped")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_commit_keeps_batch() {
        let store = MemoryGraphStore::new();
        store.begin_transaction().await.unwrap();
        store.create_node("Page", &page("a"), None).await.unwrap();
        store.commit_transaction().await.unwrap();

        assert_eq!(store.node_count().unwrap(), 1);
        assert!(!store.in_transaction().await.unwrap());
    }

    #[tokio::test]
    async fn test_transaction_misuse() {
        let store = MemoryGraphStore::new();
        assert!(matches!(
            store.commit_transaction().await,
            Err(StoreError::Transaction(_))
        ));

        store.begin_transaction().await.unwrap();
        assert!(matches!(
            store.begin_transaction().await,
            Err(StoreError::Transaction(_))
        ));
    }

    #[tokio::test]
    async fn test_relationship_requires_endpoints() {
        let store = MemoryGraphStore::new();
        let a = store.create_node("Page", &page("a"), None).await.unwrap();

        let result = store
            .create_relationship("LINK", &a, &EntityId::new("missing"), &PropertyMap::new(), None)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_outgoing_in_creation_order() {
        let store = MemoryGraphStore::new();
        let a = store.create_node("Page", &page("a"), None).await.unwrap();
        let b = store.create_node("Page", &page("b"), None).await.unwrap();
        let c = store.create_node("Page", &page("c"), None).await.unwrap();

        let empty = PropertyMap::new();
        store.create_relationship("LINK", &a, &c, &empty, None).await.unwrap();
        store.create_relationship("LINK", &a, &b, &empty, None).await.unwrap();

        let ends: Vec<_> = store
            .outgoing_relationships(&a)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.end_id)
            .collect();
        assert_eq!(ends, vec![c, b]);
    }

    #[tokio::test]
    async fn test_set_properties_merges() {
        let store = MemoryGraphStore::new();
        let id = store
            .create_node("Page", &page("a").with("title", "A"), None)
            .await
            .unwrap();

        store
            .set_node_properties(&id, &PropertyMap::new().with("title", "B"))
            .await
            .unwrap();

        assert_eq!(
            store.get_property(&id, "title").await.unwrap(),
            Some(PropertyValue::from("B"))
        );
        assert_eq!(
            store.get_property(&id, "name").await.unwrap(),
            Some(PropertyValue::from("a"))
        );
    }
}
