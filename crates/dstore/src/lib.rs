//! # DStore
//!
//! Keeps a tree of typed nodes in step between two processes over one byte
//! stream, and carries files, class bytes and commands alongside.
//!
//! ## Overview
//!
//! Each process holds a [`DataStore`](store::DataStore). A [`Connection`]
//! sends local subtrees to the peer, merges what the peer sends, and lets
//! either side issue commands and wait for their status.
//!
//! - **Nodes**: typed records with an id, name, value, text buffer and children
//! - **References**: nodes that point at another node by id
//! - **Spirits**: released nodes that keep their attributes but lose their children
//! - **Commands**: descriptor, subject and arguments plus a status the caller waits on
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dstore::{ChannelHandler, Connection, ConnectionConfig};
//!
//! async fn example() -> dstore::Result<()> {
//!     let config = ConnectionConfig::from_env()?;
//!     let store = config.build_store();
//!     let (handler, _events) = ChannelHandler::channel();
//!
//!     let connection = Connection::connect("127.0.0.1:4033", store.clone(), config, handler).await?;
//!
//!     let (descriptor, subject) = store.modify(|tree| {
//!         let descriptor = tree.create_command_descriptor("C_QUERY", "Query")?;
//!         let host = tree.host_root().clone();
//!         let subject = tree.create(Some(&host), "directory", "/home")?;
//!         Ok::<_, dstore::store::StoreError>((descriptor, subject))
//!     })?;
//!
//!     let status = connection.command(&descriptor, &[], &subject, false).await?;
//!     connection.wait_for_status(&status).await?;
//!     connection.close().await
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `dstore::core` - Data model (Node, NodeId, StatusState, escaping)
//! - `dstore::store` - The tree and its single-writer store
//! - `dstore::sync` - Wire protocol, sender and receiver

pub mod config;
pub mod connection;
pub mod error;
pub mod persist;

pub use dstore_core as core;
pub use dstore_store as store;
pub use dstore_sync as sync;

pub use config::ConnectionConfig;
pub use connection::{ChannelHandler, Connection, Event};
pub use error::{DStoreError, Result};
pub use persist::{load_tree, save_tree};

pub use dstore_core::{Attributes, Node, NodeId, StatusState};
