//! # DStore Sync
//!
//! The wire protocol that keeps two DStore trees in step over one byte
//! stream.
//!
//! ## Overview
//!
//! Each side of a connection has a [`Sender`] and a [`Receiver`]. The sender
//! serializes subtrees with the [`Generator`], skipping nodes the peer
//! already holds, and interleaves raw file and class payloads on the same
//! stream. The receiver frames records with the [`RecordReader`] and merges
//! them into the local store with the [`Parser`].
//!
//! ## Key Properties
//!
//! - **Incremental**: only nodes changed since their last transfer are sent
//! - **Ordered**: all writes of a connection go through one lock
//! - **Best effort**: malformed records are skipped, the stream goes on
//! - **Live**: an idle peer is probed and dropped if it stays silent
//!
//! ## Message Flow
//!
//! ```text
//! Client                                Server
//!   |-------- KeepAlive ----------------->|
//!   |<------- KeepAliveConfirm -----------|
//!   |-------- DOCUMENT (command) -------->|
//!   |<------- RequestClass ---------------|
//!   |-------- Class ---------------------->|
//!   |<------- File / File.Append ---------|
//!   |<------- DOCUMENT (status done) -----|
//!   |<------- DOCUMENT (status done) -----|
//! ```
//!
//! ## Wire Grammar
//!
//! ```text
//! <DataElement type=".." id=".." name=".." value=".." source=".." sourceLocation=".." refType=".." depth="..">
//! <Buffer>
//! escaped text
//! </Buffer>
//!   ...nested records...
//! </DataElement>
//!
//! <File ... depth="N">
//! N raw bytes
//! </File>
//! ```
//!
//! Attributes are decoded by position, not by name.

pub mod command;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod keepalive;
pub mod ledger;
pub mod parser;
pub mod reader;
pub mod receiver;
pub mod sender;
pub mod state;
pub mod tags;

pub use command::CommandGenerator;
pub use error::{Result, SyncError};
pub use generator::{Generator, GeneratorConfig};
pub use handlers::{
    class_resource_path, ByteStreamHandler, ClassByteStreamHandler, ClassLoader,
    ClassLoaderRegistry, DirectoryClassLoader, FileSystemHandler, HandlerRegistry,
    MemoryClassLoader, MemoryHandler,
};
pub use keepalive::{KeepAliveConfig, KeepAliveMode, Outbound, Watchdog};
pub use ledger::{TransferLedger, TransferState};
pub use parser::{Parsed, Parser, Payload};
pub use reader::RecordReader;
pub use receiver::{DocumentHandler, Receiver};
pub use sender::Sender;
pub use state::{ConnectionState, Phase};
pub use tags::{close_tag, PeerState, Tag, TagLine};
