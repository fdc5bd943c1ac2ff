//! Error types for the sync module.

use thiserror::Error;

use crate::messages::SyncErrorCode;

/// Errors that can occur during a sync session.
///
/// Only stream-level failures are fatal. Everything raised while applying a
/// single message is logged by the session loop and the loop moves on to
/// the next message.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The stream is unusable (closed, truncated, or in the wrong state).
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O failure on the stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A frame exceeded the configured maximum size.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A relationship endpoint has no destination.
    #[error("unresolved endpoint {endpoint} of relationship {relationship}")]
    UnresolvedEndpoint {
        relationship: String,
        endpoint: String,
    },

    /// A single entity or file could not be applied.
    #[error("apply failed for {id}: {reason}")]
    Apply { id: String, reason: String },

    /// Begin, commit or rollback failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] graft_store::StoreError),

    /// Received entity failed structural validation.
    #[error("validation error: {0}")]
    Validation(#[from] graft_core::ValidationError),

    /// Message violated a size limit or arrived out of place.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Peer sent an error message.
    #[error("peer error ({code:?}): {message}")]
    Peer { code: SyncErrorCode, message: String },
}

impl SyncError {
    /// Whether the session loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Connection(_)
                | SyncError::Io(_)
                | SyncError::Codec(_)
                | SyncError::FrameTooLarge { .. }
        )
    }

    pub(crate) fn apply(id: impl ToString, reason: impl ToString) -> Self {
        SyncError::Apply {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(SyncError::Connection("eof".into()).is_fatal());
        assert!(SyncError::FrameTooLarge { size: 10, max: 5 }.is_fatal());
        assert!(!SyncError::apply("n1", "boom").is_fatal());
        assert!(!SyncError::UnresolvedEndpoint {
            relationship: "r".into(),
            endpoint: "x".into()
        }
        .is_fatal());
        assert!(!SyncError::Store(graft_store::StoreError::NotFound("x".into())).is_fatal());
    }
}
