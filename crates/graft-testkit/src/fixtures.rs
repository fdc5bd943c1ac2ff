//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: synthetic syncable graphs,
//! populated stores with file storage in a temporary directory, and pairs
//! of sessions joined by an in-memory duplex stream.

use std::path::Path;
use std::sync::Arc;

use graft_core::{
    keys, EntityId, NodeRef, PropertyMap, RelationshipRef, Syncable, TypeRegistry,
};
use graft_store::{
    FileStorage, GraphStore, MemoryGraphStore, Result, SqliteGraphStore, StoreError,
};
use graft_sync::{SyncConfig, SyncContext, SyncSession};

/// Buffer size of the duplex stream joining a session pair.
pub const DUPLEX_BUFFER: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Synthetic graphs
// ─────────────────────────────────────────────────────────────────────────────

/// An in-memory graph implementing [`Syncable`] through [`GraphHandle`].
///
/// A node's neighbours are the end nodes of its outgoing relationships
/// followed by those relationships, the same order the store walker uses.
#[derive(Debug, Clone, Default)]
pub struct SyntheticGraph {
    nodes: Vec<NodeRef>,
    relationships: Vec<RelationshipRef>,
}

impl SyntheticGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ring of `len` pages, `p0 -> p1 -> ... -> p0`.
    pub fn cycle(len: usize) -> Self {
        let mut graph = Self::new();
        for i in 0..len {
            graph.add_page(&format!("p{}", i));
        }
        for i in 0..len {
            graph.link(&format!("p{}", i), &format!("p{}", (i + 1) % len));
        }
        graph
    }

    /// Add a `Page` node named after its id.
    pub fn add_page(&mut self, id: &str) -> &mut Self {
        self.add_node(
            NodeRef::new(id, "Page").with_properties(PropertyMap::new().with(keys::NAME, id)),
        )
    }

    pub fn add_node(&mut self, node: NodeRef) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Add a `LINK` relationship with id `start->end`.
    pub fn link(&mut self, start: &str, end: &str) -> &mut Self {
        self.relationships.push(RelationshipRef::new(
            format!("{}->{}", start, end),
            "LINK",
            start,
            end,
        ));
        self
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[RelationshipRef] {
        &self.relationships
    }

    /// Handle to the node with `id`.
    pub fn node(&self, id: &str) -> Option<GraphHandle<'_>> {
        self.node_index(id).map(|i| GraphHandle::Node(self, i))
    }

    /// Handle to the relationship with `id`.
    pub fn relationship(&self, id: &str) -> Option<GraphHandle<'_>> {
        self.relationships
            .iter()
            .position(|r| r.id.as_str() == id)
            .map(|i| GraphHandle::Relationship(self, i))
    }

    fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id.as_str() == id)
    }
}

/// Borrowing handle to an entity of a [`SyntheticGraph`].
#[derive(Debug, Clone, Copy)]
pub enum GraphHandle<'g> {
    Node(&'g SyntheticGraph, usize),
    Relationship(&'g SyntheticGraph, usize),
}

impl<'g> Syncable for GraphHandle<'g> {
    fn sync_node(&self) -> Option<NodeRef> {
        match self {
            GraphHandle::Node(graph, i) => Some(graph.nodes[*i].clone()),
            GraphHandle::Relationship(..) => None,
        }
    }

    fn sync_relationship(&self) -> Option<RelationshipRef> {
        match self {
            GraphHandle::Relationship(graph, i) => Some(graph.relationships[*i].clone()),
            GraphHandle::Node(..) => None,
        }
    }

    fn sync_data(&self) -> Vec<Self> {
        match *self {
            GraphHandle::Node(graph, i) => {
                let id = &graph.nodes[i].id;
                let mut ends = Vec::new();
                let mut links = Vec::new();
                for (r, rel) in graph.relationships.iter().enumerate() {
                    if &rel.source_id != id {
                        continue;
                    }
                    if let Some(end) = graph.node_index(rel.target_id.as_str()) {
                        ends.push(GraphHandle::Node(graph, end));
                        links.push(GraphHandle::Relationship(graph, r));
                    }
                }
                ends.extend(links);
                ends
            }
            GraphHandle::Relationship(graph, r) => {
                let rel = &graph.relationships[r];
                [&rel.source_id, &rel.target_id]
                    .into_iter()
                    .filter_map(|id| graph.node_index(id.as_str()))
                    .map(|n| GraphHandle::Node(graph, n))
                    .collect()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Populated stores
// ─────────────────────────────────────────────────────────────────────────────

/// A graph store plus file storage rooted in a temporary directory.
pub struct StoreFixture<S: GraphStore> {
    dir: tempfile::TempDir,
    pub store: Arc<S>,
    pub files: FileStorage,
    pub registry: Arc<TypeRegistry>,
}

impl StoreFixture<MemoryGraphStore> {
    /// In-memory store with the standard type registry.
    pub fn memory() -> Result<Self> {
        Self::with_store(|_| Ok(MemoryGraphStore::new()))
    }
}

impl StoreFixture<SqliteGraphStore> {
    /// SQLite database file inside the fixture directory.
    pub fn sqlite() -> Result<Self> {
        Self::with_store(|dir| SqliteGraphStore::open(dir.join("graph.db")))
    }
}

impl<S: GraphStore> StoreFixture<S> {
    fn with_store<F>(open: F) -> Result<Self>
    where
        F: FnOnce(&Path) -> Result<S>,
    {
        let dir = tempfile::tempdir().map_err(StoreError::Io)?;
        let store = open(dir.path())?;
        let files = FileStorage::new(dir.path().join("files"));
        Ok(Self {
            dir,
            store: Arc::new(store),
            files,
            registry: Arc::new(TypeRegistry::standard()),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh apply context over this fixture's store.
    pub fn context(&self, config: SyncConfig) -> SyncContext<S> {
        SyncContext::new(
            self.store.clone(),
            self.files.clone(),
            self.registry.clone(),
            config,
        )
    }

    pub async fn create_page(&self, name: &str) -> Result<EntityId> {
        self.store
            .create_node("Page", &PropertyMap::new().with(keys::NAME, name), None)
            .await
    }

    pub async fn link(&self, start: &EntityId, end: &EntityId) -> Result<EntityId> {
        self.store
            .create_relationship("LINK", start, end, &PropertyMap::new(), None)
            .await
    }

    /// Pages `name0 .. name{len-1}` linked into a ring.
    pub async fn page_cycle(&self, prefix: &str, len: usize) -> Result<Vec<EntityId>> {
        let mut ids = Vec::with_capacity(len);
        for i in 0..len {
            ids.push(self.create_page(&format!("{}{}", prefix, i)).await?);
        }
        for i in 0..len {
            self.link(&ids[i], &ids[(i + 1) % len]).await?;
        }
        Ok(ids)
    }

    /// Write `contents` to file storage and create the `File` node that
    /// describes it.
    pub async fn create_file(&self, name: &str, contents: &[u8]) -> Result<EntityId> {
        let relative = format!("uploads/{}", name);
        let path = self.files.final_path(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;

        let props = PropertyMap::new()
            .with(keys::NAME, name)
            .with(keys::RELATIVE_FILE_PATH, relative)
            .with(keys::SIZE, contents.len() as i64);
        self.store.create_node("File", &props, None).await
    }

    /// Contents of a stored file, if present.
    pub async fn read_file(&self, relative: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.files.final_path(relative)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Two sessions joined by an in-memory duplex stream.
pub fn session_pair<A, B>(
    left: &StoreFixture<A>,
    right: &StoreFixture<B>,
    config: SyncConfig,
) -> graft_sync::Result<(SyncSession<A>, SyncSession<B>)>
where
    A: GraphStore,
    B: GraphStore,
{
    let (a, b) = tokio::io::duplex(DUPLEX_BUFFER);
    let left = SyncSession::from_stream(a, left.context(config.clone()))?;
    let right = SyncSession::from_stream(b, right.context(config))?;
    Ok((left, right))
}

/// Deterministic, non-repeating-looking file contents of `len` bytes.
pub fn file_contents(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}
