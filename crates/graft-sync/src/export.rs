//! Export sets built from a graph store, and streaming them to a peer.
//!
//! The walk matches [`ExportSet::build`]: depth-first, neighbours in
//! enumeration order, descend only into entities that `add` accepted.
//! A node's neighbours are the end nodes of its outgoing relationships
//! followed by those relationships; a relationship's neighbours are its
//! two endpoints. Hidden and deleted nodes are not exported, and neither
//! is any entity whose snapshot fails validation.

use std::collections::HashSet;

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use graft_core::{
    keys, validate_node, validate_relationship, ChecksumBuilder, EntityId, ExportSet, NodeRef,
    RelationshipRef, SyncableRef, TypeRegistry,
};
use graft_store::{FileStorage, GraphStore, StoredNode, StoredRelationship, Visibility};

use crate::connection::Connection;
use crate::error::{Result, SyncError};
use crate::messages::{Message, PullRoot};

/// A store entity during the walk.
#[derive(Debug, Clone)]
pub enum StoreEntity {
    Node(StoredNode),
    Relationship(StoredRelationship),
}

impl StoreEntity {
    pub fn id(&self) -> &EntityId {
        match self {
            StoreEntity::Node(node) => &node.id,
            StoreEntity::Relationship(rel) => &rel.id,
        }
    }

    fn in_set(&self, set: &ExportSet) -> bool {
        match self {
            StoreEntity::Node(node) => set.contains_node(&node.id),
            StoreEntity::Relationship(rel) => set.contains_relationship(&rel.id),
        }
    }

    async fn to_ref(&self, registry: &TypeRegistry, files: &FileStorage) -> SyncableRef {
        match self {
            StoreEntity::Node(node) => SyncableRef::Node(node_ref(registry, files, node).await),
            StoreEntity::Relationship(rel) => SyncableRef::Relationship(relationship_ref(rel)),
        }
    }
}

/// Snapshot of a stored node.
///
/// Nodes of a file type carry their content size: the `size` property when
/// present, otherwise the size of the stored content. A file node with no
/// content on disk is exported as a plain node.
pub async fn node_ref(registry: &TypeRegistry, files: &FileStorage, node: &StoredNode) -> NodeRef {
    let snapshot = NodeRef::new(node.id.clone(), node.type_name.clone())
        .with_properties(node.properties.clone());

    if !registry.is_file_type(&node.type_name) {
        return snapshot;
    }
    if let Some(size) = node
        .properties
        .get(keys::SIZE)
        .and_then(|v| v.as_integer())
        .filter(|size| *size >= 0)
    {
        return snapshot.with_file_size(size as u64);
    }

    let Some(relative) = node
        .properties
        .get(keys::RELATIVE_FILE_PATH)
        .and_then(|v| v.as_str())
    else {
        tracing::warn!(file = %node.id, "file node has no relativeFilePath, exporting node only");
        return snapshot;
    };
    match files.size(relative).await {
        Ok(Some(size)) => snapshot.with_file_size(size),
        Ok(None) => {
            tracing::warn!(file = %node.id, relative, "file content missing, exporting node only");
            snapshot
        }
        Err(e) => {
            tracing::warn!(file = %node.id, error = %e, "file content unreadable, exporting node only");
            snapshot
        }
    }
}

pub fn relationship_ref(rel: &StoredRelationship) -> RelationshipRef {
    RelationshipRef::new(
        rel.id.clone(),
        rel.type_name.clone(),
        rel.start_id.clone(),
        rel.end_id.clone(),
    )
    .with_properties(rel.properties.clone())
}

/// Snapshot `entity`, or `None` if the snapshot fails validation.
async fn checked_ref(
    registry: &TypeRegistry,
    files: &FileStorage,
    entity: &StoreEntity,
) -> Option<SyncableRef> {
    let snapshot = entity.to_ref(registry, files).await;
    let checked = match &snapshot {
        SyncableRef::Node(node) => validate_node(node),
        SyncableRef::Relationship(rel) => validate_relationship(rel),
    };
    match checked {
        Ok(()) => Some(snapshot),
        Err(e) => {
            tracing::warn!(id = %entity.id(), error = %e, "invalid entity left out of export set");
            None
        }
    }
}

/// Look up a pull root: a visible node, or else a relationship.
pub async fn resolve_root<S>(store: &S, root: &PullRoot) -> Result<Option<StoreEntity>>
where
    S: GraphStore + ?Sized,
{
    match root {
        PullRoot::ById(id) => {
            if let Some(node) = store.find_node(id, Visibility::Visible).await? {
                return Ok(Some(StoreEntity::Node(node)));
            }
            Ok(store
                .find_relationship(id)
                .await?
                .map(StoreEntity::Relationship))
        }
        PullRoot::ByName { type_name, name } => Ok(store
            .find_node_by_type_and_name(type_name, name)
            .await?
            .map(StoreEntity::Node)),
    }
}

async fn neighbours<S>(store: &S, entity: &StoreEntity) -> Result<Vec<StoreEntity>>
where
    S: GraphStore + ?Sized,
{
    match entity {
        StoreEntity::Node(node) => {
            let outgoing = store.outgoing_relationships(&node.id).await?;
            let mut out = Vec::with_capacity(outgoing.len() * 2);
            let mut reachable = Vec::with_capacity(outgoing.len());

            for rel in outgoing {
                if let Some(end) = store.find_node(&rel.end_id, Visibility::Visible).await? {
                    out.push(StoreEntity::Node(end));
                    reachable.push(rel);
                }
            }
            out.extend(reachable.into_iter().map(StoreEntity::Relationship));
            Ok(out)
        }
        StoreEntity::Relationship(rel) => {
            let mut out = Vec::with_capacity(2);
            for id in [&rel.start_id, &rel.end_id] {
                if let Some(node) = store.find_node(id, Visibility::Visible).await? {
                    out.push(StoreEntity::Node(node));
                }
            }
            Ok(out)
        }
    }
}

/// Compute the export set of `root` from the store.
///
/// Invalid entities are logged and left out together with everything that
/// is reachable only through them. An invalid root yields an empty set.
pub async fn build_export_set<S>(
    store: &S,
    registry: &TypeRegistry,
    files: &FileStorage,
    root: &StoreEntity,
    recursive: bool,
    chunk_size: u64,
) -> Result<ExportSet>
where
    S: GraphStore + ?Sized,
{
    let mut set = ExportSet::new(chunk_size);
    let Some(snapshot) = checked_ref(registry, files, root).await else {
        return Ok(set);
    };
    set.add(snapshot);

    if !recursive {
        return Ok(set);
    }

    let mut skipped: HashSet<EntityId> = HashSet::new();
    let mut stack = vec![neighbours(store, root).await?.into_iter()];
    while let Some(frontier) = stack.last_mut() {
        let Some(child) = frontier.next() else {
            stack.pop();
            continue;
        };
        if child.in_set(&set) || skipped.contains(child.id()) {
            continue;
        }
        if let StoreEntity::Relationship(rel) = &child {
            if skipped.contains(&rel.start_id) || skipped.contains(&rel.end_id) {
                skipped.insert(rel.id.clone());
                continue;
            }
        }
        match checked_ref(registry, files, &child).await {
            Some(snapshot) => {
                if set.add(snapshot) {
                    let next = neighbours(store, &child).await?;
                    stack.push(next.into_iter());
                }
            }
            None => {
                skipped.insert(child.id().clone());
            }
        }
    }

    tracing::debug!(
        nodes = set.nodes().len(),
        relationships = set.relationships().len(),
        skipped = skipped.len(),
        total = set.total_size(),
        "export set built"
    );
    Ok(set)
}

/// Stream an export set as one transfer: `Begin`, every node (file nodes as
/// begin/chunks/end), every relationship, `Finish`. All frames are requests.
///
/// Only stream failures end the transfer. A file whose local content cannot
/// be read is logged and skipped.
pub async fn send_export_set(
    conn: &mut Connection,
    files: &FileStorage,
    chunk_size: u64,
    set: &ExportSet,
) -> Result<()> {
    conn.request(Message::Begin).await?;

    for node in set.nodes() {
        if !node.is_file() {
            conn.request(Message::NodeData(node.clone())).await?;
            continue;
        }
        if let Err(e) = send_file(conn, files, chunk_size, node).await {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!(file = %node.id, error = %e, "file transfer abandoned");
        }
    }

    for rel in set.relationships() {
        conn.request(Message::RelationshipData(rel.clone())).await?;
    }

    conn.request(Message::Finish).await
}

/// Open the content of a file node for sending, with its length.
async fn open_content(files: &FileStorage, node: &NodeRef) -> Result<(tokio::fs::File, u64)> {
    let relative = node
        .properties
        .get(keys::RELATIVE_FILE_PATH)
        .and_then(|v| v.as_str())
        .ok_or_else(|| SyncError::apply(&node.id, "file node has no relativeFilePath"))?;

    let file = files
        .open(relative)
        .await
        .map_err(|e| SyncError::apply(&node.id, e.to_string()))?;
    let meta = file
        .metadata()
        .await
        .map_err(|e| SyncError::apply(&node.id, e.to_string()))?;
    if !meta.is_file() {
        return Err(SyncError::apply(
            &node.id,
            format!("{} is not a regular file", relative),
        ));
    }
    Ok((file, meta.len()))
}

/// Send one file node as begin/chunks/end.
///
/// Content that cannot be opened is replaced by the bare node. A read that
/// fails part way still closes the file with `FileEnd`, which the receiver
/// rejects, and returns a non-fatal error.
async fn send_file(
    conn: &mut Connection,
    files: &FileStorage,
    chunk_size: u64,
    node: &NodeRef,
) -> Result<()> {
    let (mut file, size) = match open_content(files, node).await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::warn!(file = %node.id, error = %e, "file content unavailable, sending node only");
            return conn.request(Message::NodeData(node.clone())).await;
        }
    };

    conn.request(Message::FileBegin {
        node: node.clone(),
        size,
    })
    .await?;

    let mut buf = vec![0u8; chunk_size.max(1) as usize];
    let mut checksum = ChecksumBuilder::new();
    let mut sequence = 0u64;
    let mut sent = 0u64;
    let mut failure = None;

    while sent < size {
        let n = match read_up_to(&mut file, &mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                failure = Some(e.to_string());
                break;
            }
        };
        checksum.update(&buf[..n]);
        conn.request(Message::FileChunk {
            container_id: node.id.clone(),
            sequence,
            data: Bytes::copy_from_slice(&buf[..n]),
        })
        .await?;
        sequence += 1;
        sent += n as u64;
    }

    if failure.is_none() && sent != size {
        failure = Some(format!("file changed while sending: {} of {} bytes", sent, size));
    }

    conn.request(Message::FileEnd {
        container_id: node.id.clone(),
        chunk_count: sequence,
        checksum: checksum.finalize(),
    })
    .await?;

    match failure {
        Some(reason) => Err(SyncError::apply(&node.id, reason)),
        None => Ok(()),
    }
}

/// Fill `buf` as far as the reader allows; short only at end of file.
async fn read_up_to<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
