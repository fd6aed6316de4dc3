//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::UnboundedReceiver;

use dstore::{ChannelHandler, Connection, ConnectionConfig, Event};
use dstore_core::{Attributes, NodeId};
use dstore_store::DataStore;

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// Ids of the three-level sample tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTree {
    pub root: NodeId,
    pub child: NodeId,
    pub grand: NodeId,
}

/// Build `root(1) -> child(2, "a") -> grand(3, "b<c")` under the host root.
pub fn sample_tree(store: &DataStore) -> SampleTree {
    store.modify(|tree| {
        let host = tree.host_root().clone();
        let root = tree
            .create_object(Some(&host), Attributes::new("directory", NodeId::new("1"), "root"))
            .expect("create root");
        let child = tree
            .create_object(
                Some(&root),
                Attributes::new("file", NodeId::new("2"), "child").with_value("a"),
            )
            .expect("create child");
        let grand = tree
            .create_object(
                Some(&child),
                Attributes::new("file", NodeId::new("3"), "grand").with_value("b<c"),
            )
            .expect("create grand");
        SampleTree { root, child, grand }
    })
}

/// One end of a connected pair.
pub struct Peer {
    pub connection: Connection,
    pub store: Arc<DataStore>,
    pub events: UnboundedReceiver<Event>,
}

impl Peer {
    /// The next document delivered to this side's handler.
    pub async fn next_document(&mut self) -> Option<dstore_core::Node> {
        while let Some(event) = self.events.recv().await {
            if let Event::Document(node) = event {
                return Some(node);
            }
        }
        None
    }
}

/// Two connections talking over an in-memory pipe, each with its own store.
pub async fn connected_pair(config: ConnectionConfig) -> (Peer, Peer) {
    let (a, b) = tokio::io::duplex(1 << 20);
    (open_peer(a, config.clone()).await, open_peer(b, config).await)
}

async fn open_peer(stream: tokio::io::DuplexStream, config: ConnectionConfig) -> Peer {
    let store = config.build_store();
    let (handler, events) = ChannelHandler::channel();
    let (reader, writer) = tokio::io::split(stream);
    let connection = Connection::open(reader, writer, Arc::clone(&store), config, handler)
        .await
        .expect("open connection");
    Peer {
        connection,
        store,
        events,
    }
}

/// A reader that hands out at most `max` bytes per read, so records and
/// payloads arrive split at arbitrary points.
pub struct ChunkedReader<R> {
    inner: R,
    max: usize,
}

impl<R> ChunkedReader<R> {
    pub fn new(inner: R, max: usize) -> Self {
        Self {
            inner,
            max: max.max(1),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChunkedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut scratch = vec![0u8; this.max.min(buf.remaining())];
        let mut small = ReadBuf::new(&mut scratch);
        match Pin::new(&mut this.inner).poll_read(cx, &mut small) {
            Poll::Ready(Ok(())) => {
                buf.put_slice(small.filled());
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
