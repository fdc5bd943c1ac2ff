//! # Graft Store
//!
//! Storage boundary for the Graft replication engine. The engine applies
//! incoming entities through the [`GraphStore`] trait and reads/writes file
//! content through [`FileStorage`].
//!
//! ## Key Types
//!
//! - [`GraphStore`] - The async trait for graph lookups, mutations and transactions
//! - [`SqliteGraphStore`] - SQLite-based persistent storage
//! - [`MemoryGraphStore`] - In-memory storage for tests
//! - [`FileStorage`] - Base-path rooted file content with spool-then-persist writes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use graft_core::PropertyMap;
//! use graft_store::{GraphStore, SqliteGraphStore, Visibility};
//!
//! async fn example() -> graft_store::Result<()> {
//!     let store = SqliteGraphStore::open("graph.db")?;
//!
//!     let props = PropertyMap::new().with("name", "home");
//!     let id = store.create_node("Page", &props, None).await?;
//!     let node = store.find_node(&id, Visibility::Visible).await?;
//!     assert!(node.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Origin tracking**: Entities created by replication remember their
//!   source id; lookups by id also match it.
//! - **Soft state**: Hidden and soft-deleted nodes stay in the store and are
//!   reachable with [`Visibility::All`].
//! - **Connection-wide transactions**: One open batch at a time per store.

pub mod error;
pub mod files;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use files::FileStorage;
pub use memory::MemoryGraphStore;
pub use sqlite::SqliteGraphStore;
pub use traits::{GraphStore, StoredNode, StoredRelationship, Visibility};
