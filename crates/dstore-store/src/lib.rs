//! # DStore Store
//!
//! The in-memory tree behind a DStore connection.
//!
//! ## Overview
//!
//! A [`Tree`] is an arena of [`Node`](dstore_core::Node)s keyed by id, created
//! with a fixed set of well-known roots (temp, log, host, status, schema).
//! A [`DataStore`] wraps one tree behind a single lock so exactly one writer
//! mutates it at a time, and lets callers wait on command status nodes.
//!
//! ## Usage
//!
//! ```rust
//! use dstore_store::{DataStore, StoreConfig};
//!
//! let store = DataStore::new(StoreConfig::default());
//! let id = store
//!     .modify(|tree| {
//!         let host = tree.host_root().clone();
//!         tree.create(Some(&host), "directory", "/tmp")
//!     })
//!     .unwrap();
//! assert!(store.find(id.as_str()).is_some());
//! ```
//!
//! ## Design Notes
//!
//! - **Ids, not pointers**: parents, children and reference targets are ids
//! - **Soft deletion**: deleted nodes stay until purged so the deletion can propagate
//! - **Spirits**: released nodes lose their children after an expiry window

pub mod error;
pub mod spirit;
pub mod store;
pub mod tree;

pub use error::{Result, StoreError};
pub use spirit::{CountingMetrics, NoopMetrics, RemovalCounts, RemovalMetrics, SpiritRemover};
pub use store::{DataStore, StoreConfig};
pub use tree::{Roots, Tree};
