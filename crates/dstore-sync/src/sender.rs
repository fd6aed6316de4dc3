//! The sending side of a connection.
//!
//! All writes go through one lock, so records from concurrent callers never
//! interleave. Serialization happens under the store's read guard; the
//! guard is dropped before the first byte is written.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use dstore_core::{tokens, Attributes, NodeId};
use dstore_store::DataStore;

use crate::error::{Result, SyncError};
use crate::generator::Generator;
use crate::handlers::{ByteStreamHandler, ClassByteStreamHandler, ClassLoaderRegistry};
use crate::keepalive::Outbound;
use crate::ledger::TransferLedger;
use crate::state::ConnectionState;
use crate::tags::{PeerState, Tag};

struct Output<W> {
    writer: W,
    generator: Generator,
}

/// Serializes and writes records for one connection.
pub struct Sender<W> {
    output: Mutex<Output<W>>,
    store: Arc<DataStore>,
    peer: Arc<PeerState>,
    loaders: Arc<ClassLoaderRegistry>,
    ledger: Arc<TransferLedger>,
    /// Id of the wrapper every document from this side is sent in.
    document_id: NodeId,
    state: Arc<ConnectionState>,
}

impl<W: AsyncWrite + Unpin + Send> Sender<W> {
    pub fn new(
        writer: W,
        generator: Generator,
        store: Arc<DataStore>,
        peer: Arc<PeerState>,
        loaders: Arc<ClassLoaderRegistry>,
        state: Arc<ConnectionState>,
    ) -> Self {
        let ledger = Arc::clone(generator.ledger());
        Self {
            output: Mutex::new(Output { writer, generator }),
            store,
            peer,
            loaders,
            ledger,
            document_id: NodeId::random(),
            state,
        }
    }

    pub fn ledger(&self) -> &Arc<TransferLedger> {
        &self.ledger
    }

    pub fn document_id(&self) -> &NodeId {
        &self.document_id
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    // ─────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────

    /// Send `roots` and up to `depth` levels below each, skipping whatever
    /// the peer already holds at its current revision.
    pub async fn send_document(&self, roots: &[NodeId], depth: u32) -> Result<()> {
        self.emit(|generator, store| {
            let tree = store.read();
            generator.generate_document(&tree, &self.document_id, roots, depth);
        })
        .await?;
        debug!("sent document with {} roots", roots.len());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Payloads
    // ─────────────────────────────────────────────────────────────────────

    /// Replace `remote_path` on the peer, using its handler named like
    /// `handler`.
    pub async fn send_file(
        &self,
        handler: &dyn ByteStreamHandler,
        remote_path: &str,
        bytes: &[u8],
        binary: bool,
    ) -> Result<()> {
        self.send_file_envelope(Tag::file(false, binary), handler.id(), remote_path, bytes)
            .await
    }

    /// Append to `remote_path` on the peer.
    pub async fn send_append_file(
        &self,
        handler: &dyn ByteStreamHandler,
        remote_path: &str,
        bytes: &[u8],
        binary: bool,
    ) -> Result<()> {
        self.send_file_envelope(Tag::file(true, binary), handler.id(), remote_path, bytes)
            .await
    }

    async fn send_file_envelope(
        &self,
        tag: Tag,
        handler_id: &str,
        remote_path: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let header = Attributes::new(tokens::FILE, NodeId::random(), remote_path)
            .with_source(handler_id);
        self.send_envelope(tag, header, bytes).await
    }

    /// Send the bytes of `class_name`, or an empty payload if no loader has
    /// it.
    pub async fn send_class_bytes(&self, class_name: &str) -> Result<()> {
        let bytes = match self.loaders.find_class(class_name).await {
            Some(bytes) => bytes,
            None => Bytes::new(),
        };
        let header = Attributes::new(Tag::Class.as_str(), NodeId::random(), class_name);
        self.send_envelope(Tag::Class, header, &bytes).await
    }

    /// Ask the peer for the bytes of `class_name`.
    pub async fn request_class(&self, class_name: &str) -> Result<()> {
        let header = Attributes::new(Tag::RequestClass.as_str(), NodeId::random(), class_name);
        self.send_envelope(Tag::RequestClass, header, &[]).await
    }

    /// Send a serialized class instance to the peer's handler named like
    /// `handler`.
    pub async fn send_class_instance(
        &self,
        handler: &dyn ClassByteStreamHandler,
        name: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let header = Attributes::new(Tag::Serialized.as_str(), NodeId::random(), name)
            .with_source(handler.id());
        self.send_envelope(Tag::Serialized, header, bytes).await
    }

    async fn send_envelope(&self, tag: Tag, header: Attributes, payload: &[u8]) -> Result<()> {
        self.emit(|generator, _| generator.generate_envelope(tag, &header, payload))
            .await?;
        debug!("sent {} envelope with {} bytes", tag, payload.len());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Liveness
    // ─────────────────────────────────────────────────────────────────────

    pub async fn keep_alive(&self, confirm: bool) -> Result<()> {
        self.emit(|generator, _| generator.generate_keep_alive(confirm))
            .await
    }

    /// Flush and shut down the write half. Later sends fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.state.begin_close();
        let mut output = self.output.lock().await;
        let pending = output.generator.take_output();
        for chunk in pending {
            output.writer.write_all(&chunk).await?;
        }
        output.writer.flush().await?;
        if let Err(e) = output.writer.shutdown().await {
            debug!("shutdown of write half failed: {}", e);
        }
        Ok(())
    }

    /// Generate under the write lock, then write every chunk produced.
    async fn emit(&self, generate: impl FnOnce(&mut Generator, &DataStore)) -> Result<()> {
        if self.state.is_closed() {
            return Err(SyncError::Closed);
        }
        let mut output = self.output.lock().await;
        let ref_tag = self
            .peer
            .ref_tag()
            .unwrap_or_else(|| output.generator.default_ref_tag());
        output.generator.set_ref_tag(ref_tag);

        generate(&mut output.generator, &self.store);
        let chunks = output.generator.take_output();

        for chunk in chunks {
            if let Err(e) = output.writer.write_all(&chunk).await {
                warn!("write failed: {}", e);
                return Err(e.into());
            }
        }
        output.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Outbound for Sender<W> {
    async fn send_keep_alive_request(&self) -> Result<()> {
        self.keep_alive(false).await
    }

    async fn send_keep_alive_confirmation(&self) -> Result<()> {
        self.keep_alive(true).await
    }

    async fn send_class(&self, class_name: &str) -> Result<()> {
        self.send_class_bytes(class_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratorConfig;
    use crate::handlers::{MemoryClassLoader, MemoryHandler};
    use dstore_store::StoreConfig;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn sender(store: Arc<DataStore>) -> (Sender<DuplexStream>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(1 << 16);
        let generator = Generator::new(GeneratorConfig::default(), Arc::new(TransferLedger::new()));
        let sender = Sender::new(
            local,
            generator,
            store,
            Arc::new(PeerState::new()),
            Arc::new(ClassLoaderRegistry::new()),
            Arc::new(ConnectionState::new()),
        );
        (sender, remote)
    }

    async fn drain(sender: Sender<DuplexStream>, mut remote: DuplexStream) -> String {
        sender.shutdown().await.unwrap();
        drop(sender);
        let mut out = String::new();
        remote.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_document_sent_once() {
        let store = Arc::new(DataStore::default());
        let id = store.modify(|tree| tree.create(None, "file", "a").unwrap());
        let (sender, remote) = sender(store.clone());

        sender.send_document(&[id.clone()], 2).await.unwrap();
        sender.send_document(&[id.clone()], 2).await.unwrap();
        let out = drain(sender, remote).await;

        assert_eq!(out.matches(&format!("id=\"{}\"", id)).count(), 1);
        assert_eq!(out.matches("type=\"DOCUMENT\"").count(), 2);
    }

    #[tokio::test]
    async fn test_file_envelope_header() {
        let (sender, remote) = sender(Arc::new(DataStore::new(StoreConfig::default())));
        let handler = MemoryHandler::new("fs");
        sender
            .send_file(&handler, "/tmp/out.txt", b"hello", false)
            .await
            .unwrap();
        let out = drain(sender, remote).await;

        assert!(out.starts_with("<File type=\"FILE\""));
        assert!(out.contains("name=\"/tmp/out.txt\""));
        assert!(out.contains("source=\"fs\""));
        assert!(out.contains("depth=\"5\">\nhello\n</File>\n"));
    }

    #[tokio::test]
    async fn test_unknown_class_sends_empty_payload() {
        let (sender, remote) = sender(Arc::new(DataStore::default()));
        sender.send_class_bytes("a.b.Missing").await.unwrap();
        let out = drain(sender, remote).await;
        assert!(out.contains("depth=\"0\">\n\n</Class>\n"));
    }

    #[tokio::test]
    async fn test_known_class_sends_bytes() {
        let (local, mut remote) = tokio::io::duplex(1 << 16);
        let loaders = Arc::new(ClassLoaderRegistry::new());
        let memory = Arc::new(MemoryClassLoader::new());
        memory.insert("a/b/C.class", &b"\xca\xfe"[..]);
        loaders.register(memory);
        let sender = Sender::new(
            local,
            Generator::new(GeneratorConfig::default(), Arc::new(TransferLedger::new())),
            Arc::new(DataStore::default()),
            Arc::new(PeerState::new()),
            loaders,
            Arc::new(ConnectionState::new()),
        );

        sender.send_class("a.b.C").await.unwrap();
        sender.shutdown().await.unwrap();
        drop(sender);
        let mut out = Vec::new();
        remote.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("name=\"a.b.C\""));
        assert!(text.contains("depth=\"2\""));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_sends() {
        let (sender, _remote) = sender(Arc::new(DataStore::default()));
        sender.state().close();
        assert!(matches!(
            sender.send_keep_alive_request().await,
            Err(SyncError::Closed)
        ));
    }
}
