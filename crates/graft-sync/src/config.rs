//! Session configuration.

use graft_core::DEFAULT_CHUNK_SIZE;

/// Default capacity of the inbound message queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default maximum encoded frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// What to do with a relationship endpoint that was not created or merged
/// earlier in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointFallback {
    /// Treat the source id as a destination id and look it up (matching own
    /// id or recorded origin id).
    #[default]
    LiteralId,
    /// Drop the relationship.
    Reject,
}

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bound of the inbound queue; a full queue stalls the receiver.
    pub queue_capacity: usize,
    /// Bytes per file chunk on the wire.
    pub chunk_size: u64,
    /// Largest frame accepted or sent.
    pub max_frame_size: usize,
    pub endpoint_fallback: EndpointFallback,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            endpoint_fallback: EndpointFallback::default(),
        }
    }
}
