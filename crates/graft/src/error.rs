//! Error types for the replicator.

use graft_store::StoreError;
use graft_sync::{PullRoot, SyncError};
use thiserror::Error;

/// Errors that can occur during replicator operations.
#[derive(Debug, Error)]
pub enum GraftError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Export root not found in the local store.
    #[error("export root not found: {0}")]
    RootNotFound(PullRoot),
}

/// Result type for replicator operations.
pub type Result<T> = std::result::Result<T, GraftError>;
