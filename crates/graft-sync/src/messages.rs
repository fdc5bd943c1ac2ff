//! Sync protocol message types.
//!
//! Every frame on the wire carries one [`Message`] plus a [`Direction`]
//! flag. The same message type travels as a request and, for the variants
//! that expect one, comes back as the paired response.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use graft_core::{Checksum, EntityId, NodeRef, RelationshipRef, SyncableInfo, MAX_PROPERTIES};

/// Message size limits, checked on receipt.
pub mod limits {
    /// Max payload bytes in one file chunk.
    pub const MAX_CHUNK_BYTES: usize = 8 * 1024 * 1024;
    /// Max entries in a list-syncables type filter.
    pub const MAX_TYPE_FILTERS: usize = 64;
    /// Max length of an error message text.
    pub const MAX_ERROR_MESSAGE_LEN: usize = 4096;
}

/// Which hook the receiving side runs for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Request,
    Response,
}

/// One unit on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub direction: Direction,
    pub message: Message,
}

impl Frame {
    pub fn request(message: Message) -> Self {
        Self {
            direction: Direction::Request,
            message,
        }
    }

    pub fn response(message: Message) -> Self {
        Self {
            direction: Direction::Response,
            message,
        }
    }
}

/// How a pull request names its root entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullRoot {
    /// Id (or origin id) of a node or relationship on the serving side.
    ById(EntityId),
    /// A node found by type and `name` property.
    ByName { type_name: String, name: String },
}

impl std::fmt::Display for PullRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullRoot::ById(id) => write!(f, "{}", id),
            PullRoot::ByName { type_name, name } => write!(f, "{}:{}", type_name, name),
        }
    }
}

/// Sync protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Opens a transfer; the receiver opens its transaction scope.
    Begin,

    /// Closes a transfer; the receiver commits its transaction scope.
    Finish,

    /// Ask the peer for descriptors of its syncable entities.
    ListSyncables {
        /// Category names or raw type names.
        types: Vec<String>,
        /// Filled in by the response.
        syncables: Option<Vec<SyncableInfo>>,
    },

    /// Ask the peer to send the closure of one of its entities.
    PullRequest {
        root: PullRoot,
        recursive: bool,
        /// Size of the export set, filled in by the response.
        total: Option<u64>,
    },

    /// A node snapshot.
    NodeData(NodeRef),

    /// A relationship snapshot.
    RelationshipData(RelationshipRef),

    /// Announces a file node whose content follows as chunks.
    FileBegin {
        node: NodeRef,
        /// Exact content size in bytes.
        size: u64,
    },

    /// One slice of file content.
    FileChunk {
        /// Source id of the file node.
        container_id: EntityId,
        /// Zero-based position of this chunk.
        sequence: u64,
        data: Bytes,
    },

    /// Completes a file.
    FileEnd {
        container_id: EntityId,
        chunk_count: u64,
        checksum: Checksum,
    },

    /// Error condition.
    Error {
        /// Error code for programmatic handling.
        code: SyncErrorCode,
        /// Human-readable description.
        message: String,
    },
}

impl Message {
    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Begin => "begin",
            Message::Finish => "finish",
            Message::ListSyncables { .. } => "list_syncables",
            Message::PullRequest { .. } => "pull_request",
            Message::NodeData(_) => "node_data",
            Message::RelationshipData(_) => "relationship_data",
            Message::FileBegin { .. } => "file_begin",
            Message::FileChunk { .. } => "file_chunk",
            Message::FileEnd { .. } => "file_end",
            Message::Error { .. } => "error",
        }
    }

    /// Build an error message from a code and any displayable reason.
    pub fn error(code: SyncErrorCode, message: impl ToString) -> Self {
        let mut message = message.to_string();
        if message.len() > limits::MAX_ERROR_MESSAGE_LEN {
            let mut cut = limits::MAX_ERROR_MESSAGE_LEN;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        Message::Error { code, message }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            Message::ListSyncables { types, .. } => {
                if types.len() > limits::MAX_TYPE_FILTERS {
                    return Err("too many type filters");
                }
            }
            Message::NodeData(node) | Message::FileBegin { node, .. } => {
                if node.properties.len() > MAX_PROPERTIES {
                    return Err("too many properties");
                }
            }
            Message::RelationshipData(rel) => {
                if rel.properties.len() > MAX_PROPERTIES {
                    return Err("too many properties");
                }
            }
            Message::FileChunk { data, .. } => {
                if data.len() > limits::MAX_CHUNK_BYTES {
                    return Err("file chunk too large");
                }
            }
            Message::Error { message, .. } => {
                if message.len() > limits::MAX_ERROR_MESSAGE_LEN {
                    return Err("error message too long");
                }
            }
            Message::Begin
            | Message::Finish
            | Message::PullRequest { .. }
            | Message::FileEnd { .. } => {}
        }
        Ok(())
    }
}

/// Error codes for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum SyncErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Message too large.
    MessageTooLarge = 1,
    /// Invalid message format or out-of-place message.
    InvalidMessage = 2,
    /// Requested root entity not found.
    NotFound = 3,
    /// Internal error on peer.
    InternalError = 4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_limits_valid() {
        let msg = Message::ListSyncables {
            types: vec!["pages".into(), "files".into()],
            syncables: None,
        };
        assert!(msg.validate_limits().is_ok());
    }

    #[test]
    fn test_message_limits_exceeded() {
        let msg = Message::ListSyncables {
            types: vec!["Page".into(); limits::MAX_TYPE_FILTERS + 1],
            syncables: None,
        };
        assert!(msg.validate_limits().is_err());

        let chunk = Message::FileChunk {
            container_id: EntityId::new("f"),
            sequence: 0,
            data: Bytes::from(vec![0u8; limits::MAX_CHUNK_BYTES + 1]),
        };
        assert!(chunk.validate_limits().is_err());
    }

    #[test]
    fn test_error_message_truncated() {
        let long = "é".repeat(limits::MAX_ERROR_MESSAGE_LEN);
        let msg = Message::error(SyncErrorCode::Unknown, long);
        assert!(msg.validate_limits().is_ok());
    }

    #[test]
    fn test_pull_root_display() {
        let root = PullRoot::ByName {
            type_name: "Page".into(),
            name: "home".into(),
        };
        assert_eq!(root.to_string(), "Page:home");
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_message_truncated_on_char_boundary(text in "\\PC{0,6000}") {
                let Message::Error { message, .. } =
                    Message::error(SyncErrorCode::InternalError, &text)
                else {
                    unreachable!()
                };
                prop_assert!(message.len() <= limits::MAX_ERROR_MESSAGE_LEN);
                prop_assert!(text.starts_with(&message));
            }
        }
    }
}
