//! Apply-side session state.
//!
//! A [`SyncContext`] lives for one session and is owned by the processing
//! loop. It applies received snapshots to the local store, remembers where
//! each source id ended up, reassembles file content and brackets everything
//! in a transaction scope opened by `Begin` and closed by `Finish`.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;

use graft_core::{
    keys, validate_node, validate_relationship, Checksum, ChecksumBuilder, EntityId, IdentityMap,
    NodeRef, RelationshipRef, SyncableInfo, TypeRegistry,
};
use graft_store::{FileStorage, GraphStore, Visibility};

use crate::config::{EndpointFallback, SyncConfig};
use crate::error::{Result, SyncError};
use crate::messages::SyncErrorCode;

/// Payload slot key under which list-syncables responses are stored.
pub const SYNCABLES_KEY: &str = "syncables";

/// Values parked in the per-session payload slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    Syncables(Vec<SyncableInfo>),
}

/// Counters for what a session applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub relationships_created: u64,
    pub relationships_updated: u64,
    pub relationships_dropped: u64,
    pub files_stored: u64,
    /// Transaction scopes that could not be opened or closed.
    pub transactions_failed: u64,
}

/// A batch of apply operations that commits only if marked successful.
#[derive(Debug, Default)]
pub struct TransactionScope {
    success: bool,
}

impl TransactionScope {
    pub fn mark_success(&mut self) {
        self.success = true;
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Reassembly buffer for one incoming file.
#[derive(Debug)]
pub struct FileAssembly {
    node: NodeRef,
    declared_size: u64,
    spool: NamedTempFile,
    next_sequence: u64,
    written: u64,
    checksum: ChecksumBuilder,
}

/// Session state shared by all message hooks on one side of a connection.
pub struct SyncContext<S: GraphStore> {
    store: Arc<S>,
    files: FileStorage,
    registry: Arc<TypeRegistry>,
    config: SyncConfig,
    identity: IdentityMap,
    assemblies: HashMap<EntityId, FileAssembly>,
    scope: Option<TransactionScope>,
    values: HashMap<String, SessionValue>,
    stats: ApplyStats,
    peer_ready: bool,
    outgoing_finished: bool,
    incoming_committed: bool,
    incoming_finished: bool,
    expected_total: Option<u64>,
    last_peer_error: Option<(SyncErrorCode, String)>,
}

impl<S: GraphStore> SyncContext<S> {
    pub fn new(
        store: Arc<S>,
        files: FileStorage,
        registry: Arc<TypeRegistry>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            files,
            registry,
            config,
            identity: IdentityMap::new(),
            assemblies: HashMap::new(),
            scope: None,
            values: HashMap::new(),
            stats: ApplyStats::default(),
            peer_ready: false,
            outgoing_finished: false,
            incoming_committed: false,
            incoming_finished: false,
            expected_total: None,
            last_peer_error: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn files(&self) -> &FileStorage {
        &self.files
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    pub fn stats(&self) -> &ApplyStats {
        &self.stats
    }

    pub fn pending_files(&self) -> usize {
        self.assemblies.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entity apply
    // ─────────────────────────────────────────────────────────────────────────

    /// Create or merge a node and record where its source id landed.
    ///
    /// The lookup includes hidden and soft-deleted nodes, so a node that
    /// exists in any state is updated rather than duplicated.
    pub async fn store_node(&mut self, node: &NodeRef) -> Result<EntityId> {
        validate_node(node)?;

        let existing = self.store.find_node(&node.id, Visibility::All).await?;
        let destination = match existing {
            Some(found) => {
                self.store
                    .set_node_properties(&found.id, &node.properties)
                    .await?;
                self.stats.nodes_updated += 1;
                tracing::trace!(source = %node.id, destination = %found.id, "merged node");
                found.id
            }
            None => {
                let id = self
                    .store
                    .create_node(&node.type_name, &node.properties, Some(&node.id))
                    .await?;
                self.stats.nodes_created += 1;
                tracing::trace!(source = %node.id, destination = %id, "created node");
                id
            }
        };

        self.identity.insert(node.id.clone(), destination.clone());
        Ok(destination)
    }

    /// Create or merge a relationship between remapped endpoints.
    ///
    /// Returns [`SyncError::UnresolvedEndpoint`] if either endpoint has no
    /// destination node; the relationship is then dropped.
    pub async fn store_relationship(&mut self, rel: &RelationshipRef) -> Result<EntityId> {
        validate_relationship(rel)?;

        let start = self.resolve_endpoint(rel, &rel.source_id).await;
        let end = self.resolve_endpoint(rel, &rel.target_id).await;
        let (start, end) = match (start, end) {
            (Ok(start), Ok(end)) => (start, end),
            (Err(e), _) | (_, Err(e)) => {
                if matches!(e, SyncError::UnresolvedEndpoint { .. }) {
                    self.stats.relationships_dropped += 1;
                }
                return Err(e);
            }
        };

        let destination = match self.store.find_relationship(&rel.id).await? {
            Some(found) => {
                self.store
                    .set_relationship_properties(&found.id, &rel.properties)
                    .await?;
                self.stats.relationships_updated += 1;
                found.id
            }
            None => {
                let id = self
                    .store
                    .create_relationship(&rel.type_name, &start, &end, &rel.properties, Some(&rel.id))
                    .await?;
                self.stats.relationships_created += 1;
                id
            }
        };

        self.identity.insert(rel.id.clone(), destination.clone());
        Ok(destination)
    }

    async fn resolve_endpoint(&self, rel: &RelationshipRef, source: &EntityId) -> Result<EntityId> {
        let resolved = self.identity.resolve(source);
        if !resolved.is_mapped() && self.config.endpoint_fallback == EndpointFallback::Reject {
            return Err(unresolved(rel, source));
        }

        match self.store.find_node(resolved.id(), Visibility::All).await? {
            Some(node) => Ok(node.id),
            None => Err(unresolved(rel, source)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // File reassembly
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a reassembly buffer for a file node.
    pub fn begin_file(&mut self, node: NodeRef, size: u64) -> Result<()> {
        validate_node(&node)?;

        let spool = self
            .files
            .spool()
            .map_err(|e| SyncError::apply(&node.id, e))?;

        let id = node.id.clone();
        let assembly = FileAssembly {
            node,
            declared_size: size,
            spool,
            next_sequence: 0,
            written: 0,
            checksum: ChecksumBuilder::new(),
        };

        if self.assemblies.insert(id.clone(), assembly).is_some() {
            tracing::warn!(file = %id, "file restarted, previous chunks discarded");
        }
        Ok(())
    }

    /// Append one chunk to its file's spool.
    ///
    /// Chunks must arrive in sequence. A gap or overflow discards the whole
    /// assembly.
    pub fn file_chunk(&mut self, container_id: &EntityId, sequence: u64, data: &[u8]) -> Result<()> {
        let Some(assembly) = self.assemblies.get_mut(container_id) else {
            return Err(SyncError::apply(container_id, "chunk for a file that was not begun"));
        };

        let failure = if sequence != assembly.next_sequence {
            Some(format!(
                "chunk {} arrived, expected {}",
                sequence, assembly.next_sequence
            ))
        } else if assembly.written + data.len() as u64 > assembly.declared_size {
            Some(format!(
                "content exceeds declared size of {} bytes",
                assembly.declared_size
            ))
        } else {
            assembly
                .spool
                .write_all(data)
                .err()
                .map(|e| format!("spool write failed: {}", e))
        };

        if let Some(reason) = failure {
            self.assemblies.remove(container_id);
            return Err(SyncError::apply(container_id, reason));
        }

        assembly.checksum.update(data);
        assembly.written += data.len() as u64;
        assembly.next_sequence += 1;
        Ok(())
    }

    /// Verify a finished file, apply its node and move the content into
    /// place under the file storage base path.
    pub async fn finish_file(
        &mut self,
        container_id: &EntityId,
        chunk_count: u64,
        checksum: &Checksum,
    ) -> Result<EntityId> {
        let Some(mut assembly) = self.assemblies.remove(container_id) else {
            return Err(SyncError::apply(container_id, "end of a file that was not begun"));
        };

        if assembly.next_sequence != chunk_count {
            return Err(SyncError::apply(
                container_id,
                format!(
                    "received {} chunks, sender announced {}",
                    assembly.next_sequence, chunk_count
                ),
            ));
        }
        if assembly.written != assembly.declared_size {
            return Err(SyncError::apply(
                container_id,
                format!(
                    "received {} bytes, expected {}",
                    assembly.written, assembly.declared_size
                ),
            ));
        }
        if assembly.checksum.finalize() != *checksum {
            return Err(SyncError::apply(container_id, "checksum mismatch"));
        }
        assembly
            .spool
            .flush()
            .map_err(|e| SyncError::apply(container_id, e))?;

        let destination = self.store_node(&assembly.node).await?;

        let relative = match self.store.get_property(&destination, keys::RELATIVE_FILE_PATH).await? {
            Some(value) => value.as_str().map(str::to_string),
            None => None,
        };
        let Some(relative) = relative else {
            return Err(SyncError::apply(
                container_id,
                "file node has no relativeFilePath",
            ));
        };

        let path = self
            .files
            .persist(assembly.spool, &relative)
            .map_err(|e| SyncError::apply(container_id, e))?;
        self.stats.files_stored += 1;
        tracing::debug!(file = %container_id, path = %path.display(), bytes = assembly.written, "file stored");

        Ok(destination)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a transaction scope. A scope still open from an earlier
    /// transfer is closed first.
    pub async fn begin_transaction(&mut self) {
        if self.scope.is_some() {
            tracing::warn!("transaction scope already open, closing it first");
            self.end_transaction().await;
        }

        match self.store.begin_transaction().await {
            Ok(()) => self.scope = Some(TransactionScope::default()),
            Err(e) => {
                let e = SyncError::Transaction(e.to_string());
                tracing::error!(error = %e, "could not open transaction, applying without one");
                self.stats.transactions_failed += 1;
            }
        }
        self.incoming_committed = false;
        self.incoming_finished = false;
    }

    /// Mark the open scope for commit.
    pub fn mark_success(&mut self) {
        match self.scope.as_mut() {
            Some(scope) => scope.mark_success(),
            None => tracing::debug!("success marked without an open transaction"),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.scope.is_some()
    }

    /// Close the open scope: commit if marked successful, otherwise roll
    /// back. Failures are logged and never returned. The payload slot is
    /// cleared either way.
    pub async fn end_transaction(&mut self) {
        if let Some(scope) = self.scope.take() {
            let (action, result) = if scope.is_success() {
                ("commit", self.store.commit_transaction().await)
            } else {
                ("rollback", self.store.rollback_transaction().await)
            };

            match result {
                Ok(()) => {
                    tracing::debug!(action, "transaction closed");
                    if scope.is_success() {
                        self.incoming_committed = true;
                    }
                }
                Err(e) => {
                    let e = SyncError::Transaction(e.to_string());
                    tracing::error!(action, error = %e, "transaction close failed");
                    self.stats.transactions_failed += 1;
                }
            }
        }
        self.values.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Descriptors of every entity whose type matches the filter.
    pub async fn list_syncables(&self, filter: &[String]) -> Result<Vec<SyncableInfo>> {
        let selection = self.registry.resolve_filter(filter);
        let mut syncables = Vec::new();

        for node in self.store.list_nodes(&selection.node_types).await? {
            syncables.push(SyncableInfo {
                name: node.name().map(str::to_string),
                id: node.id,
                type_name: node.type_name,
                is_node: true,
            });
        }
        for rel in self
            .store
            .list_relationships(&selection.relationship_types)
            .await?
        {
            syncables.push(SyncableInfo {
                name: rel.name().map(str::to_string),
                id: rel.id,
                type_name: rel.type_name,
                is_node: false,
            });
        }

        Ok(syncables)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Payload slot and protocol flags
    // ─────────────────────────────────────────────────────────────────────────

    pub fn store_value(&mut self, key: impl Into<String>, value: SessionValue) {
        self.values.insert(key.into(), value);
    }

    pub fn value(&self, key: &str) -> Option<&SessionValue> {
        self.values.get(key)
    }

    pub fn remove_value(&mut self, key: &str) -> Option<SessionValue> {
        self.values.remove(key)
    }

    pub(crate) fn set_peer_ready(&mut self) {
        self.peer_ready = true;
    }

    /// The peer acknowledged `Begin` of our outgoing transfer.
    pub fn peer_ready(&self) -> bool {
        self.peer_ready
    }

    pub(crate) fn set_outgoing_finished(&mut self) {
        self.outgoing_finished = true;
    }

    /// The peer acknowledged `Finish` of our outgoing transfer.
    pub fn outgoing_finished(&self) -> bool {
        self.outgoing_finished
    }

    /// An incoming transfer was committed.
    pub fn incoming_committed(&self) -> bool {
        self.incoming_committed
    }

    pub(crate) fn set_incoming_finished(&mut self) {
        self.incoming_finished = true;
    }

    /// The peer's `Finish` was handled, whether or not the commit held.
    pub fn incoming_finished(&self) -> bool {
        self.incoming_finished
    }

    pub(crate) fn set_expected_total(&mut self, total: u64) {
        self.expected_total = Some(total);
    }

    pub fn expected_total(&self) -> Option<u64> {
        self.expected_total
    }

    pub(crate) fn record_peer_error(&mut self, code: SyncErrorCode, message: String) {
        self.last_peer_error = Some((code, message));
    }

    pub fn last_peer_error(&self) -> Option<&(SyncErrorCode, String)> {
        self.last_peer_error.as_ref()
    }

    pub(crate) fn take_peer_error(&mut self) -> Option<(SyncErrorCode, String)> {
        self.last_peer_error.take()
    }

    pub(crate) fn reset_transfer_flags(&mut self) {
        self.peer_ready = false;
        self.outgoing_finished = false;
        self.incoming_committed = false;
        self.incoming_finished = false;
        self.expected_total = None;
    }

    /// Release everything the session holds: roll back an unsuccessful
    /// scope, discard pending file spools and forget the identity map.
    pub async fn teardown(&mut self) {
        if self.scope.is_some() {
            self.end_transaction().await;
        }
        if !self.assemblies.is_empty() {
            tracing::warn!(
                pending = self.assemblies.len(),
                "discarding incomplete file transfers"
            );
            self.assemblies.clear();
        }
        self.identity.clear();
        self.values.clear();
    }
}

fn unresolved(rel: &RelationshipRef, endpoint: &EntityId) -> SyncError {
    SyncError::UnresolvedEndpoint {
        relationship: rel.id.to_string(),
        endpoint: endpoint.to_string(),
    }
}

impl<S: GraphStore> std::fmt::Debug for SyncContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("identity", &self.identity.len())
            .field("pending_files", &self.assemblies.len())
            .field("in_transaction", &self.scope.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}
