//! # Graft
//!
//! Replication of closed subgraphs between two instances of a graph-backed
//! application over one byte stream.
//!
//! ## Overview
//!
//! Graft provides:
//!
//! - **Export sets**: the deduplicated, cycle-safe closure of the entities
//!   reachable from a root
//! - **Transfers**: nodes, relationships and chunked file content streamed as
//!   one transaction and applied on the other side
//! - **Identity remapping**: relationship endpoints resolved against the ids
//!   created earlier in the same session
//! - **Listing**: lightweight descriptors of local or remote syncables
//!
//! ## Key Concepts
//!
//! - **Source id**: the id an entity has on the instance that sent it.
//! - **Origin id**: the source id recorded on the destination copy, so a
//!   repeated transfer updates instead of duplicating.
//! - **Transaction scope**: opened by `Begin`, committed by `Finish`, rolled
//!   back if the session closes in between.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use graft::{GraftConfig, PullRoot, Replicator};
//! use graft::core::TypeRegistry;
//! use graft::store::SqliteGraphStore;
//!
//! async fn example(stream: tokio::io::DuplexStream) -> graft::Result<()> {
//!     let store = SqliteGraphStore::open("graph.db")?;
//!     let replicator = Replicator::new(store, TypeRegistry::standard(), GraftConfig::default());
//!
//!     let report = replicator
//!         .pull(stream, PullRoot::ById("home".into()), true)
//!         .await?;
//!     println!("created {} nodes", report.stats.nodes_created);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `graft::core` - Snapshots, export sets, identity map, type registry
//! - `graft::store` - Graph store trait, memory and SQLite stores, file storage
//! - `graft::sync` - Wire protocol, connection and sessions

pub mod error;
pub mod replicator;

// Re-export component crates
pub use graft_core as core;
pub use graft_store as store;
pub use graft_sync as sync;

pub use error::{GraftError, Result};
pub use replicator::{GraftConfig, Replicator};

// Re-export commonly used types
pub use graft_core::{EntityId, ExportSet, NodeRef, RelationshipRef, SyncableInfo};
pub use graft_sync::{EndpointFallback, PullRoot, SessionReport, SyncConfig};
