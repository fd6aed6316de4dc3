//! The receiving side of a connection.
//!
//! One receive loop per connection parses records strictly in order and
//! dispatches what they produce. A fatal error ends the loop and is
//! reported to the [`DocumentHandler`] exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};

use dstore_core::{tokens, Node};

use crate::error::{Result, SyncError};
use crate::handlers::{ByteStreamHandler, ClassByteStreamHandler, HandlerRegistry};
use crate::keepalive::Outbound;
use crate::parser::{Parsed, Parser, Payload};
use crate::reader::RecordReader;
use crate::state::ConnectionState;
use crate::tags::Tag;

/// Application callbacks for one connection.
#[async_trait]
pub trait DocumentHandler: Send + Sync {
    /// A document or transient record arrived. Documents have already been
    /// merged into the store; `node` is the wrapper.
    async fn handle_document(&self, node: Node);

    /// The connection failed and is now closed.
    async fn handle_error(&self, error: &SyncError);
}

/// Reads, parses and dispatches records for one connection.
pub struct Receiver<R> {
    reader: RecordReader<R>,
    parser: Parser,
    outbound: Arc<dyn Outbound>,
    files: Arc<HandlerRegistry<dyn ByteStreamHandler>>,
    classes: Arc<HandlerRegistry<dyn ClassByteStreamHandler>>,
    handler: Arc<dyn DocumentHandler>,
    state: Arc<ConnectionState>,
}

impl<R: AsyncRead + Unpin + Send> Receiver<R> {
    pub fn new(
        reader: RecordReader<R>,
        parser: Parser,
        outbound: Arc<dyn Outbound>,
        files: Arc<HandlerRegistry<dyn ByteStreamHandler>>,
        classes: Arc<HandlerRegistry<dyn ClassByteStreamHandler>>,
        handler: Arc<dyn DocumentHandler>,
        state: Arc<ConnectionState>,
    ) -> Self {
        Self {
            reader,
            parser,
            outbound,
            files,
            classes,
            handler,
            state,
        }
    }

    /// Receive until the stream fails or a finish is requested.
    pub async fn run(mut self) {
        self.state.activate();
        loop {
            if self.state.finish_requested() {
                break;
            }
            let parsed = tokio::select! {
                biased;
                _ = self.state.finished() => break,
                parsed = self.parser.parse_document(&mut self.reader) => parsed,
            };

            let outcome = match parsed {
                Ok(parsed) => self.dispatch(parsed).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.fail(e).await;
                return;
            }
        }
        info!("receiver finished");
        self.state.close();
    }

    async fn fail(&self, e: SyncError) {
        if self.state.finish_requested() || self.state.is_closed() {
            debug!("receiver stopped: {}", e);
        } else if self.state.report_error_once() {
            error!("connection failed: {}", e);
            self.handler.handle_error(&e).await;
        }
        self.state.close();
    }

    async fn dispatch(&self, parsed: Parsed) -> Result<()> {
        match parsed {
            Parsed::KeepAliveRequest => self.outbound.send_keep_alive_confirmation().await,
            Parsed::KeepAliveConfirm => Ok(()),
            Parsed::ClassRequest { class_name } => {
                debug!("peer requested class {}", class_name);
                self.outbound.send_class(&class_name).await
            }
            Parsed::Payload(payload) => {
                self.deliver(&payload).await;
                Ok(())
            }
            Parsed::Document { id, .. } => {
                let node = self.parser.store().find(id.as_str());
                match node {
                    Some(node) => self.handler.handle_document(node).await,
                    None => warn!("document {} vanished before dispatch", id),
                }
                Ok(())
            }
            Parsed::Transient(node) => {
                if node.node_type() != tokens::FILE {
                    self.handler.handle_document(node).await;
                }
                Ok(())
            }
        }
    }

    /// Hand a payload to its sink. Sink failures do not end the connection.
    async fn deliver(&self, payload: &Payload) {
        let name = payload.header.name.as_str();
        let bytes = &payload.bytes[..];
        let binary = payload.tag.is_binary();

        let result = match payload.tag {
            Tag::Class => {
                self.classes
                    .get(payload.handler_id())
                    .save_class(name, bytes)
                    .await
            }
            Tag::Serialized => {
                self.classes
                    .get(payload.handler_id())
                    .save_class_instance(name, bytes)
                    .await
            }
            tag if tag.is_append() => {
                self.files
                    .get(payload.handler_id())
                    .append_to_file(name, bytes, binary)
                    .await
            }
            tag if tag.is_file() => {
                self.files
                    .get(payload.handler_id())
                    .save_file(name, bytes, binary)
                    .await
            }
            tag => {
                warn!("no sink for {} payload", tag);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("{} payload for {} not saved: {}", payload.tag, name, e);
        }
    }
}
