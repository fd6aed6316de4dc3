//! A live DStore connection.
//!
//! [`Connection::open`] wires a [`Sender`] and a [`Receiver`] over any async
//! byte stream. The receiver runs on its own task; every other call is made
//! from the caller's task and serialized by the sender.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dstore_core::{Node, NodeId, StatusState};
use dstore_store::DataStore;
use dstore_sync::{
    ByteStreamHandler, ClassByteStreamHandler, ClassLoaderRegistry, CommandGenerator,
    ConnectionState, DocumentHandler, FileSystemHandler, Generator, HandlerRegistry,
    MemoryHandler, Outbound, Parser, Phase, PeerState, Receiver, RecordReader, Sender,
    SyncError, TransferLedger, Watchdog,
};

use crate::config::ConnectionConfig;
use crate::error::Result;

type BoxedReader = Box<dyn AsyncRead + Unpin + Send + Sync>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// How long `close` waits for the receive task.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// One end of a DStore connection.
pub struct Connection {
    config: ConnectionConfig,
    store: Arc<DataStore>,
    sender: Arc<Sender<BoxedWriter>>,
    commands: CommandGenerator,
    files: Arc<HandlerRegistry<dyn ByteStreamHandler>>,
    classes: Arc<HandlerRegistry<dyn ClassByteStreamHandler>>,
    loaders: Arc<ClassLoaderRegistry>,
    state: Arc<ConnectionState>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    remover_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start a connection over `reader` and `writer`.
    ///
    /// Spawns the receive task, and the spirit remover when the store has
    /// spirit mode on. With keep-alive enabled a keep-alive request is sent
    /// right away so the peer can negotiate.
    pub async fn open<R, W>(
        reader: R,
        writer: W,
        store: Arc<DataStore>,
        config: ConnectionConfig,
        handler: Arc<dyn DocumentHandler>,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let state = Arc::new(ConnectionState::new());
        let peer = Arc::new(PeerState::new());
        let ledger = Arc::new(TransferLedger::new());
        let loaders = Arc::new(ClassLoaderRegistry::new());
        let files = Arc::new(HandlerRegistry::<dyn ByteStreamHandler>::new(Arc::new(
            FileSystemHandler::new("default", config.file_root.clone()),
        )));
        let classes = Arc::new(HandlerRegistry::<dyn ClassByteStreamHandler>::new(Arc::new(
            MemoryHandler::new("default"),
        )));

        let writer: BoxedWriter = Box::new(writer);
        let sender = Arc::new(Sender::new(
            writer,
            Generator::new(config.generator.clone(), Arc::clone(&ledger)),
            Arc::clone(&store),
            Arc::clone(&peer),
            Arc::clone(&loaders),
            Arc::clone(&state),
        ));
        let outbound: Arc<dyn Outbound> = sender.clone();

        let reader: BoxedReader = Box::new(reader);
        let reader = RecordReader::new(reader)
            .with_watchdog(Watchdog::new(config.keep_alive.clone(), Arc::clone(&outbound)));
        let receiver = Receiver::new(
            reader,
            Parser::new(Arc::clone(&store), peer),
            outbound,
            Arc::clone(&files),
            Arc::clone(&classes),
            handler,
            Arc::clone(&state),
        );

        let receive_task = tokio::spawn(receiver.run());
        let remover_task = store.spawn_remover();
        state.activate();

        let connection = Self {
            commands: CommandGenerator::new(Arc::clone(&store), ledger),
            config,
            store,
            sender,
            files,
            classes,
            loaders,
            state,
            receive_task: Mutex::new(Some(receive_task)),
            remover_task: Mutex::new(remover_task),
        };
        if connection.config.keep_alive.enabled {
            connection.sender.send_keep_alive_request().await?;
        }
        info!("connection open");
        Ok(connection)
    }

    /// Connect to a server over TCP.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        store: Arc<DataStore>,
        config: ConnectionConfig,
        handler: Arc<dyn DocumentHandler>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("connected to {}", stream.peer_addr()?);
        let (reader, writer) = stream.into_split();
        Self::open(reader, writer, store, config, handler).await
    }

    /// Accept one client over TCP.
    pub async fn accept(
        listener: &TcpListener,
        store: Arc<DataStore>,
        config: ConnectionConfig,
        handler: Arc<dyn DocumentHandler>,
    ) -> Result<Self> {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!("accepted {}", addr);
        let (reader, writer) = stream.into_split();
        Self::open(reader, writer, store, config, handler).await
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn sender(&self) -> &Sender<BoxedWriter> {
        &self.sender
    }

    /// File sinks, keyed by the handler id peers address.
    pub fn files(&self) -> &HandlerRegistry<dyn ByteStreamHandler> {
        &self.files
    }

    /// Class and serialized-instance sinks.
    pub fn classes(&self) -> &HandlerRegistry<dyn ClassByteStreamHandler> {
        &self.classes
    }

    /// Where class bytes requested by the peer are looked up.
    pub fn loaders(&self) -> &ClassLoaderRegistry {
        &self.loaders
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Documents and commands
    // ─────────────────────────────────────────────────────────────────────

    /// Send `roots` at the configured document depth.
    pub async fn send_document(&self, roots: &[NodeId]) -> Result<()> {
        self.sender
            .send_document(roots, self.config.document_depth)
            .await?;
        Ok(())
    }

    /// Issue a command and send it. Returns its status node.
    pub async fn command(
        &self,
        descriptor: &NodeId,
        args: &[NodeId],
        subject: &NodeId,
        ref_arg: bool,
    ) -> Result<NodeId> {
        let status = self
            .commands
            .generate_command(descriptor, args, subject, ref_arg)?;
        let command = self
            .store
            .read()
            .get(&status)?
            .parent()
            .cloned()
            .unwrap_or_else(|| status.clone());
        self.sender
            .send_document(&[command], self.config.command_depth)
            .await?;
        Ok(status)
    }

    /// Wait until the status node is done or otherwise terminal.
    pub async fn wait_for_status(&self, status: &NodeId) -> Result<StatusState> {
        Ok(self
            .store
            .wait_until(status, StatusState::Done, self.config.command_timeout)
            .await?)
    }

    /// Set a status node and send it.
    ///
    /// A peer only completes a status on the second `done` it sees, so
    /// `Done` is sent twice.
    pub async fn report_status(&self, status: &NodeId, state: StatusState) -> Result<()> {
        self.store.modify(|tree| -> Result<()> {
            let node = tree.get_mut(status)?;
            node.set_name(state.as_str());
            node.set_value(state.as_str());
            Ok(())
        })?;
        self.send_status(status).await?;
        if state == StatusState::Done {
            self.store.modify(|tree| -> Result<()> {
                tree.get_mut(status)?.touch();
                Ok(())
            })?;
            self.send_status(status).await?;
        }
        Ok(())
    }

    async fn send_status(&self, status: &NodeId) -> Result<()> {
        self.sender.send_document(&[status.clone()], 0).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Stop receiving, flush and shut down the write half.
    pub async fn close(&self) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.state.request_finish();
        let flushed = self.sender.shutdown().await;

        if let Some(remover) = take(&self.remover_task) {
            remover.abort();
        }
        if let Some(mut receive) = take(&self.receive_task) {
            if tokio::time::timeout(CLOSE_GRACE, &mut receive).await.is_err() {
                warn!("receiver did not stop in {:?}, aborting", CLOSE_GRACE);
                receive.abort();
            }
        }
        self.state.close();
        info!("connection closed");

        match flushed {
            Ok(()) | Err(SyncError::Closed) => Ok(()),
            Err(e) => {
                warn!("flush on close failed: {}", e);
                Err(e.into())
            }
        }
    }
}

fn take(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl Drop for Connection {
    fn drop(&mut self) {
        for slot in [&self.receive_task, &self.remover_task] {
            if let Some(task) = take(slot) {
                task.abort();
            }
        }
    }
}

/// What a [`ChannelHandler`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Document(Node),
    Error(String),
}

/// A [`DocumentHandler`] that forwards everything into a channel.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelHandler {
    /// A handler and the receiving end of its channel.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl DocumentHandler for ChannelHandler {
    async fn handle_document(&self, node: Node) {
        if self.tx.send(Event::Document(node)).is_err() {
            debug!("document dropped, nobody listening");
        }
    }

    async fn handle_error(&self, error: &SyncError) {
        let _ = self.tx.send(Event::Error(error.to_string()));
    }
}
