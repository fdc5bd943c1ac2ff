//! # Graft Sync
//!
//! Wire protocol, connection handling and the apply side of replication.
//!
//! ## Overview
//!
//! A session runs over any byte stream. Outgoing frames are written by the
//! [`Connection`]; incoming frames are read by a background [`Receiver`]
//! into a bounded queue and handed, one at a time, to the message's
//! lifecycle hook. Hooks write into a [`SyncContext`], which owns the
//! transaction scope, the identity map and partially received files.
//!
//! Each frame is a 4-byte big-endian length followed by a CBOR body
//! carrying the direction (request or response) and the message.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use graft_core::TypeRegistry;
//! use graft_store::{FileStorage, MemoryGraphStore};
//! use graft_sync::{PullRoot, SyncConfig, SyncContext, SyncSession};
//!
//! async fn example(stream: tokio::io::DuplexStream) -> graft_sync::Result<()> {
//!     let ctx = SyncContext::new(
//!         Arc::new(MemoryGraphStore::new()),
//!         FileStorage::new("files"),
//!         Arc::new(TypeRegistry::standard()),
//!         SyncConfig::default(),
//!     );
//!     let mut session = SyncSession::from_stream(stream, ctx)?;
//!     session.pull(PullRoot::ById("home".into()), true).await?;
//!     let report = session.close().await;
//!     println!("created {} nodes", report.stats.nodes_created);
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Pusher                                  Receiver
//!   |-------- Begin (request) ----------->|  open transaction
//!   |<------- Begin (response) -----------|
//!   |-------- NodeData ------------------>|  store node
//!   |-------- FileBegin ----------------->|  open spool file
//!   |-------- FileChunk x n ------------->|  append in sequence
//!   |-------- FileEnd ------------------->|  verify, store node, persist
//!   |-------- RelationshipData ---------->|  resolve endpoints, store
//!   |-------- Finish (request) ---------->|  commit
//!   |<------- Finish (response) ----------|
//!
//! Puller                                  Server
//!   |-------- PullRequest --------------->|  build export set
//!   |<------- PullRequest (total) --------|
//!   |<------- Begin ... Finish -----------|  same transfer, reversed
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod export;
pub mod messages;
pub mod protocol;
pub mod receiver;
pub mod session;

pub use config::{EndpointFallback, SyncConfig, DEFAULT_MAX_FRAME_SIZE, DEFAULT_QUEUE_CAPACITY};
pub use connection::{Connection, ConnectionState};
pub use context::{ApplyStats, SessionValue, SyncContext, SYNCABLES_KEY};
pub use error::{Result, SyncError};
pub use export::{build_export_set, resolve_root, send_export_set, StoreEntity};
pub use messages::{limits, Direction, Frame, Message, PullRoot, SyncErrorCode};
pub use receiver::{Inbound, Receiver};
pub use session::{Progress, ProgressCallback, SessionReport, SyncSession};
