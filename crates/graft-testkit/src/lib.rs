//! # Graft Testkit
//!
//! Testing utilities for Graft.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: synthetic syncable graphs, stores with file storage in a
//!   temporary directory, and session pairs over an in-memory stream
//! - **Generators**: Proptest strategies for property values, snapshots and
//!   random graph shapes
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use graft_core::ExportSet;
//! use graft_testkit::generators::graph_shape;
//!
//! proptest! {
//!     #[test]
//!     fn closure_contains_root(shape in graph_shape(10)) {
//!         let graph = shape.build();
//!         let set = ExportSet::build(&graph.node("n0").unwrap(), true, 1024);
//!         prop_assert_eq!(set.nodes()[0].id.as_str(), "n0");
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use graft_sync::SyncConfig;
//! use graft_testkit::fixtures::{session_pair, StoreFixture};
//!
//! async fn example() {
//!     let source = StoreFixture::memory().unwrap();
//!     let target = StoreFixture::sqlite().unwrap();
//!     source.page_cycle("page", 3).await.unwrap();
//!     let (_pusher, _server) = session_pair(&source, &target, SyncConfig::default()).unwrap();
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    file_contents, session_pair, GraphHandle, StoreFixture, SyntheticGraph, DUPLEX_BUFFER,
};
pub use generators::{graph_shape, GraphShape};
