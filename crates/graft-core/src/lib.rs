//! # Graft Core
//!
//! Pure primitives for graph replication: entity identifiers, portable
//! property values, the syncable capability, and export sets.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over the entity graph a caller hands it.
//!
//! ## Key Types
//!
//! - [`EntityId`] - Instance-local identifier of a node or relationship
//! - [`PropertyValue`] / [`PropertyMap`] - The portable property model
//! - [`Syncable`] - Capability an entity implements to take part in sync
//! - [`SyncableRef`] - Owned snapshot of a node or relationship
//! - [`ExportSet`] - Deduplicated, cycle-safe closure reachable from a root
//! - [`IdentityMap`] - Session-scoped source id to destination id table
//! - [`TypeRegistry`] - Explicit registry of syncable types and categories
//!
//! ## Closure
//!
//! ```rust
//! use graft_core::{ExportSet, NodeRef, SyncableRef, DEFAULT_CHUNK_SIZE};
//!
//! let mut set = ExportSet::new(DEFAULT_CHUNK_SIZE);
//! let page = NodeRef::new("a1", "Page");
//!
//! assert!(set.add(SyncableRef::Node(page.clone())));
//! assert!(!set.add(SyncableRef::Node(page)));
//! assert_eq!(set.total_size(), 1);
//! ```

pub mod checksum;
pub mod error;
pub mod export;
pub mod identity;
pub mod registry;
pub mod syncable;
pub mod types;
pub mod validation;

pub use checksum::{Checksum, ChecksumBuilder};
pub use error::ValidationError;
pub use export::{chunk_units, ExportSet, DEFAULT_CHUNK_SIZE};
pub use identity::{IdentityMap, Resolved};
pub use registry::{EntityKind, SyncCategory, TypeEntry, TypeRegistry, TypeSelection};
pub use syncable::{NodeRef, RelationshipRef, Syncable, SyncableInfo, SyncableRef};
pub use types::{keys, EntityId, Primitive, PropertyMap, PropertyValue};
pub use validation::{validate_node, validate_relationship, MAX_PROPERTIES, MAX_TYPE_NAME_LEN};
