//! # DStore Testkit
//!
//! Testing utilities for DStore.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Byte-exact wire inputs with the tree they must produce
//! - **Generators**: Proptest strategies for random node trees and wire text
//! - **Fixtures**: The sample tree, connected pairs over an in-memory pipe, and
//!   a reader that splits input at arbitrary points
//!
//! ## Golden Vectors
//!
//! ```rust
//! use dstore_testkit::vectors::{all_vectors, verify_vector};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! for vector in all_vectors() {
//!     verify_vector(&vector).await.unwrap();
//! }
//! # });
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use dstore_testkit::generators::{build_tree, node_spec};
//!
//! proptest! {
//!     #[test]
//!     fn tree_survives_the_wire(spec in node_spec(3, 3)) {
//!         // build, generate, parse, compare
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use dstore_testkit::fixtures::{connected_pair, sample_tree};
//!
//! let (client, server) = connected_pair(ConnectionConfig::default()).await;
//! let sample = sample_tree(&client.store);
//! client.connection.send_document(&[sample.root]).await?;
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{connected_pair, init_tracing, sample_tree, ChunkedReader, Peer, SampleTree};
pub use generators::{build_tree, node_spec, NodeSpec};
pub use vectors::{all_vectors, verify_all_vectors, verify_vector, WireVector};
