//! The Replicator: one local graph, replicated over sessions.
//!
//! A `Replicator` bundles the store, the file storage, the type registry
//! and configuration. Each network operation takes an already-established
//! stream, runs one session over it and closes it.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use graft_core::{ExportSet, SyncableInfo, TypeRegistry};
use graft_store::{FileStorage, GraphStore};
use graft_sync::{
    build_export_set, resolve_root, PullRoot, SessionReport, SyncConfig, SyncContext,
    SyncSession,
};

use crate::error::{GraftError, Result};

/// Configuration for the Replicator.
#[derive(Debug, Clone)]
pub struct GraftConfig {
    /// Sync configuration.
    pub sync: SyncConfig,
    /// Base directory of stored file content.
    pub files_path: PathBuf,
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            files_path: PathBuf::from("files"),
        }
    }
}

/// The main Replicator struct.
///
/// Provides:
/// - Computing export sets from the local store
/// - Pushing a subgraph to a peer
/// - Pulling a subgraph from a peer
/// - Listing local and remote syncables
/// - Serving a peer's requests
pub struct Replicator<S: GraphStore> {
    store: Arc<S>,
    files: FileStorage,
    registry: Arc<TypeRegistry>,
    config: GraftConfig,
}

impl<S: GraphStore> Replicator<S> {
    /// Create a replicator over a store.
    pub fn new(store: S, registry: TypeRegistry, config: GraftConfig) -> Self {
        Self::from_shared(Arc::new(store), registry, config)
    }

    /// Create a replicator over a store that is also used elsewhere.
    pub fn from_shared(store: Arc<S>, registry: TypeRegistry, config: GraftConfig) -> Self {
        Self {
            store,
            files: FileStorage::new(config.files_path.clone()),
            registry: Arc::new(registry),
            config,
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

    pub fn config(&self) -> &GraftConfig {
        &self.config
    }

    /// A fresh apply context. Every session gets its own.
    pub fn context(&self) -> SyncContext<S> {
        SyncContext::new(
            self.store.clone(),
            self.files.clone(),
            self.registry.clone(),
            self.config.sync.clone(),
        )
    }

    /// Start a session over `stream` without running it.
    pub fn session<T>(&self, stream: T) -> Result<SyncSession<S>>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Ok(SyncSession::from_stream(stream, self.context())?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Compute the export set of `root`.
    ///
    /// Entities that fail validation are logged and left out; they never
    /// abort the export.
    pub async fn export_set(&self, root: &PullRoot, recursive: bool) -> Result<ExportSet> {
        let entity = resolve_root(self.store.as_ref(), root)
            .await?
            .ok_or_else(|| GraftError::RootNotFound(root.clone()))?;

        Ok(build_export_set(
            self.store.as_ref(),
            &self.registry,
            &self.files,
            &entity,
            recursive,
            self.config.sync.chunk_size,
        )
        .await?)
    }

    /// Descriptors of local syncables matching the category or type filter.
    pub async fn list_local(&self, types: &[String]) -> Result<Vec<SyncableInfo>> {
        Ok(self.context().list_syncables(types).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Network operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Push the closure of `root` to the peer on `stream`.
    pub async fn push<T>(&self, stream: T, root: &PullRoot, recursive: bool) -> Result<SessionReport>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let set = self.export_set(root, recursive).await?;
        tracing::info!(%root, total = set.total_size(), "pushing");

        let mut session = self.session(stream)?;
        let outcome = session.push(&set).await;
        finish(session, outcome).await
    }

    /// Pull the closure of `root` from the peer on `stream`.
    pub async fn pull<T>(&self, stream: T, root: PullRoot, recursive: bool) -> Result<SessionReport>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        tracing::info!(%root, recursive, "pulling");

        let mut session = self.session(stream)?;
        let outcome = session.pull(root, recursive).await;
        finish(session, outcome).await
    }

    /// Ask the peer on `stream` which syncables it has.
    pub async fn list_remote<T>(&self, stream: T, types: Vec<String>) -> Result<Vec<SyncableInfo>>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut session = self.session(stream)?;
        let outcome = session.list_syncables(types).await;
        session.close().await;
        Ok(outcome?)
    }

    /// Answer the peer on `stream` until it closes the connection.
    pub async fn serve<T>(&self, stream: T) -> Result<SessionReport>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut session = self.session(stream)?;
        let outcome = session.serve().await;
        let report = finish(session, outcome).await?;
        tracing::info!(
            processed = report.messages_processed,
            failed = report.messages_failed,
            "peer session closed"
        );
        Ok(report)
    }
}

/// Close the session whatever the outcome, then report.
async fn finish<S: GraphStore>(
    session: SyncSession<S>,
    outcome: graft_sync::Result<()>,
) -> Result<SessionReport> {
    let report = session.close().await;
    outcome?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{keys, PropertyMap, PropertyValue, MAX_PROPERTIES};
    use graft_store::MemoryGraphStore;

    fn replicator(dir: &tempfile::TempDir) -> Replicator<MemoryGraphStore> {
        let config = GraftConfig {
            files_path: dir.path().to_path_buf(),
            ..GraftConfig::default()
        };
        Replicator::new(MemoryGraphStore::new(), TypeRegistry::standard(), config)
    }

    #[tokio::test]
    async fn test_export_set_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let replicator = replicator(&dir);

        let err = replicator
            .export_set(&PullRoot::ById("nope".into()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, GraftError::RootNotFound(_)));
    }

    #[tokio::test]
    async fn test_export_set_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let replicator = replicator(&dir);
        let home = replicator
            .store()
            .create_node("Page", &PropertyMap::new().with(keys::NAME, "home"), None)
            .await
            .unwrap();

        let set = replicator
            .export_set(
                &PullRoot::ByName {
                    type_name: "Page".into(),
                    name: "home".into(),
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(set.nodes()[0].id, home);
    }

    #[tokio::test]
    async fn test_export_set_leaves_out_invalid_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let replicator = replicator(&dir);
        let store = replicator.store();
        let home = store
            .create_node("Page", &PropertyMap::new().with(keys::NAME, "home"), None)
            .await
            .unwrap();
        let crowded: PropertyMap = (0..=MAX_PROPERTIES)
            .map(|i| (format!("k{}", i), PropertyValue::Integer(i as i64)))
            .collect();
        let bad = store.create_node("Page", &crowded, None).await.unwrap();
        store
            .create_relationship("LINK", &home, &bad, &PropertyMap::new(), None)
            .await
            .unwrap();

        let set = replicator
            .export_set(&PullRoot::ById(home.clone()), true)
            .await
            .unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains_node(&home));
    }

    #[tokio::test]
    async fn test_list_local_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let replicator = replicator(&dir);
        let store = replicator.store();
        store
            .create_node("Page", &PropertyMap::new().with(keys::NAME, "home"), None)
            .await
            .unwrap();
        store
            .create_node("Folder", &PropertyMap::new().with(keys::NAME, "docs"), None)
            .await
            .unwrap();

        let pages = replicator.list_local(&["pages".to_string()]).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].name.as_deref(), Some("home"));
    }
}
