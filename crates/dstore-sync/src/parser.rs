//! Streaming parser and tree reconciliation.
//!
//! [`Parser::parse_document`] reads records until one top-level element is
//! complete. Nested records are reconciled into the store as they arrive,
//! each under a single write guard:
//!
//! 1. A `KeepAlive` record is returned as a request to confirm.
//! 2. A `KeepAliveConfirm` record is returned as a confirmation.
//! 3. A `DOCUMENT` record reuses the known wrapper with that id, clearing its
//!    children, or creates a new one.
//! 4. Any other top-level record becomes a transient node that is never
//!    stored. Envelopes carry a raw payload that is read right after.
//! 5. A reference record resolves its target by the id in its `name`. An
//!    unknown target degrades to a plain value node.
//! 6. Otherwise a known id is updated in place and an unknown id is created
//!    under the current parent, spirited if the record says so.
//!
//! A record reporting `value="deleted"` removes the node. Malformed records
//! are logged and skipped; only stream failures abort a parse.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use dstore_core::{tokens, unescape, Attributes, Node, NodeId, RefType, StatusState};
use dstore_store::{DataStore, Tree};
use tokio::io::AsyncRead;

use crate::error::{Result, SyncError};
use crate::reader::RecordReader;
use crate::tags::{close_tag, PeerState, Tag, TagLine};

/// One completed top-level element.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A document wrapper was reconciled into the store.
    Document {
        id: NodeId,
        /// Top-level nodes of the document, in order.
        roots: Vec<NodeId>,
    },
    /// A bare record. Nothing was stored.
    Transient(Node),
    KeepAliveRequest,
    KeepAliveConfirm,
    ClassRequest {
        class_name: String,
    },
    Payload(Payload),
}

/// A raw payload and the envelope that announced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub tag: Tag,
    pub header: Attributes,
    pub bytes: Bytes,
}

impl Payload {
    /// Handler id the sender addressed.
    pub fn handler_id(&self) -> &str {
        &self.header.source
    }
}

enum Frame {
    Stored { tag: Tag, id: NodeId },
    Transient { tag: Tag },
    Skipped { tag: Tag },
}

impl Frame {
    fn tag(&self) -> Tag {
        match self {
            Frame::Stored { tag, .. } | Frame::Transient { tag } | Frame::Skipped { tag } => *tag,
        }
    }
}

/// State of one in-flight parse.
#[derive(Default)]
struct ParseContext {
    stack: Vec<Frame>,
    /// Lines appended to the current buffer, while inside `<Buffer>`.
    buffer_lines: Option<usize>,
    document: Option<NodeId>,
    roots: Vec<NodeId>,
    transient: Option<Node>,
}

impl ParseContext {
    fn finish(&mut self) -> Option<Parsed> {
        if let Some(id) = self.document.take() {
            return Some(Parsed::Document {
                id,
                roots: std::mem::take(&mut self.roots),
            });
        }
        let node = self.transient.take()?;
        Some(match node.node_type() {
            tokens::KEEP_ALIVE => Parsed::KeepAliveRequest,
            tokens::KEEP_ALIVE_CONFIRM => Parsed::KeepAliveConfirm,
            _ => Parsed::Transient(node),
        })
    }
}

/// Reconciles incoming records into a store.
pub struct Parser {
    store: Arc<DataStore>,
    peer: Arc<PeerState>,
}

impl Parser {
    pub fn new(store: Arc<DataStore>, peer: Arc<PeerState>) -> Self {
        Self { store, peer }
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    /// Read and apply records until one top-level element is complete.
    ///
    /// Fails only when the stream does; the connection is unusable after.
    pub async fn parse_document<R>(&mut self, reader: &mut RecordReader<R>) -> Result<Parsed>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut ctx = ParseContext::default();
        loop {
            let record = reader.next_record().await?;
            let line = record.trim();
            if line.is_empty() {
                continue;
            }

            if ctx.buffer_lines.is_some() {
                if line == "</Buffer>" {
                    ctx.buffer_lines = None;
                } else {
                    self.append_buffer(&mut ctx, &record);
                }
                continue;
            }
            if line == "<Buffer>" {
                self.start_buffer(&mut ctx);
                continue;
            }

            let outcome = if let Some(name) = close_tag(line) {
                self.close(&mut ctx, name)
            } else {
                match TagLine::parse(line) {
                    Ok(tag_line) if tag_line.tag.is_envelope() => {
                        self.envelope(&ctx, reader, &tag_line).await
                    }
                    Ok(tag_line) => self.open(&mut ctx, &tag_line),
                    Err(e) => {
                        Self::skip_body(&mut ctx, line);
                        Err(e)
                    }
                }
            };

            match outcome {
                Ok(Some(parsed)) => {
                    if matches!(parsed, Parsed::KeepAliveRequest | Parsed::KeepAliveConfirm) {
                        if let Some(dog) = reader.watchdog_mut() {
                            dog.on_keep_alive();
                        }
                    }
                    debug!("parsed {:?}", ParsedKind(&parsed));
                    return Ok(parsed);
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("skipping record: {}", e),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tags
    // ─────────────────────────────────────────────────────────────────────

    fn open(&self, ctx: &mut ParseContext, line: &TagLine) -> Result<Option<Parsed>> {
        if let Some(tag) = line.ref_tag() {
            self.peer.observe(tag);
        }
        let (attributes, ref_type) = line.attributes()?;

        if ctx.stack.is_empty() {
            return self.open_top_level(ctx, line, attributes, ref_type);
        }

        let parent = match ctx.stack.last() {
            Some(Frame::Stored { id, .. }) => id.clone(),
            Some(Frame::Transient { .. }) => {
                let owner = ctx.transient.as_ref().map(|n| n.id().as_str()).unwrap_or("");
                debug!(
                    "dropping {} ({}) nested in transient record {}",
                    attributes.id, attributes.node_type, owner
                );
                if !line.self_closing {
                    ctx.stack.push(Frame::Skipped { tag: line.tag });
                }
                return Ok(None);
            }
            _ => {
                debug!("ignoring {} nested in an unstored record", attributes.id);
                if !line.self_closing {
                    ctx.stack.push(Frame::Skipped { tag: line.tag });
                }
                return Ok(None);
            }
        };

        let stored = self
            .store
            .modify(|tree| reconcile(tree, &parent, attributes, ref_type))?;

        match stored {
            Some(id) => {
                if ctx.document.as_ref() == Some(&parent) {
                    ctx.roots.push(id.clone());
                }
                if !line.self_closing {
                    ctx.stack.push(Frame::Stored { tag: line.tag, id });
                }
            }
            None if !line.self_closing => ctx.stack.push(Frame::Skipped { tag: line.tag }),
            None => {}
        }
        Ok(None)
    }

    fn open_top_level(
        &self,
        ctx: &mut ParseContext,
        line: &TagLine,
        attributes: Attributes,
        ref_type: RefType,
    ) -> Result<Option<Parsed>> {
        if attributes.node_type == tokens::DOCUMENT {
            let id = self.store.modify(|tree| -> Result<NodeId> {
                let id = attributes.id.clone();
                if tree.contains(id.as_str()) {
                    tree.clear_children(&id)?;
                    tree.update_attributes(&id, attributes)?;
                    Ok(id)
                } else {
                    Ok(tree.create_object(None, attributes)?)
                }
            })?;
            ctx.document = Some(id.clone());
            if line.self_closing {
                return Ok(ctx.finish());
            }
            ctx.stack.push(Frame::Stored { tag: line.tag, id });
            return Ok(None);
        }

        ctx.transient = Some(Node::from_record(attributes, ref_type));
        if line.self_closing {
            return Ok(ctx.finish());
        }
        ctx.stack.push(Frame::Transient { tag: line.tag });
        Ok(None)
    }

    fn close(&self, ctx: &mut ParseContext, name: &str) -> Result<Option<Parsed>> {
        let expected = ctx
            .stack
            .last()
            .map(Frame::tag)
            .ok_or_else(|| SyncError::Malformed(format!("unexpected </{}>", name)))?;
        if expected.as_str() != name {
            return Err(SyncError::Malformed(format!(
                "expected </{}>, got </{}>",
                expected, name
            )));
        }
        ctx.stack.pop();
        if ctx.stack.is_empty() {
            return Ok(ctx.finish());
        }
        Ok(None)
    }

    /// Keep nesting balanced when an open tag cannot be decoded.
    fn skip_body(ctx: &mut ParseContext, line: &str) {
        if ctx.stack.is_empty() || line.ends_with("/>") {
            return;
        }
        let name = line
            .trim_start_matches('<')
            .split(|c: char| c.is_whitespace() || c == '>')
            .next()
            .unwrap_or("");
        if let Some(tag) = Tag::from_name(name) {
            ctx.stack.push(Frame::Skipped { tag });
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Envelopes
    // ─────────────────────────────────────────────────────────────────────

    async fn envelope<R>(
        &self,
        ctx: &ParseContext,
        reader: &mut RecordReader<R>,
        line: &TagLine,
    ) -> Result<Option<Parsed>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (header, _) = line.attributes()?;
        let len = usize::try_from(header.depth)
            .map_err(|_| SyncError::Malformed(format!("payload too large: {}", header.depth)))?;
        let bytes = if len > 0 {
            reader.read_exact(len).await?
        } else {
            Bytes::new()
        };

        if !line.self_closing {
            let close = reader.next_record().await?;
            if close_tag(&close) != Some(line.tag.as_str()) {
                warn!("expected </{}> after payload, got {:?}", line.tag, close);
            }
        }

        if !ctx.stack.is_empty() {
            warn!("discarding {} payload nested in a document", line.tag);
            return Ok(None);
        }

        Ok(Some(match line.tag {
            Tag::RequestClass => Parsed::ClassRequest {
                class_name: header.name,
            },
            tag => Parsed::Payload(Payload { tag, header, bytes }),
        }))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Buffers
    // ─────────────────────────────────────────────────────────────────────

    fn start_buffer(&self, ctx: &mut ParseContext) {
        ctx.buffer_lines = Some(0);
        match ctx.stack.last() {
            Some(Frame::Stored { id, .. }) => {
                let id = id.clone();
                self.store.modify(|tree| {
                    if let Some(node) = tree.find_mut(id.as_str()) {
                        node.set_buffer("");
                    }
                });
            }
            Some(Frame::Transient { .. }) => {
                if let Some(node) = ctx.transient.as_mut() {
                    node.set_buffer("");
                }
            }
            _ => {}
        }
    }

    fn append_buffer(&self, ctx: &mut ParseContext, raw: &str) {
        let lines = ctx.buffer_lines.unwrap_or(0);
        let mut text = String::new();
        if lines > 0 {
            text.push('\n');
        }
        text.push_str(&unescape(raw));
        ctx.buffer_lines = Some(lines + 1);

        match ctx.stack.last() {
            Some(Frame::Stored { id, .. }) => {
                let id = id.clone();
                self.store.modify(|tree| {
                    if let Some(node) = tree.find_mut(id.as_str()) {
                        node.append_buffer(&text);
                    }
                });
            }
            Some(Frame::Transient { .. }) => {
                if let Some(node) = ctx.transient.as_mut() {
                    node.append_buffer(&text);
                }
            }
            _ => {}
        }
    }
}

/// Apply one nested record under `parent`. Returns the stored id, or `None`
/// if the record deleted the node.
fn reconcile(
    tree: &mut Tree,
    parent: &NodeId,
    mut attributes: Attributes,
    mut ref_type: RefType,
) -> Result<Option<NodeId>> {
    let id = attributes.id.clone();
    let deleted = attributes.is_deleted();

    let mut target = None;
    if ref_type == RefType::Reference {
        let wanted = NodeId::new(attributes.name.clone());
        if tree.contains(wanted.as_str()) {
            target = Some(wanted);
        } else {
            debug!("reference {} to unknown {}, storing as value", id, wanted);
            ref_type = RefType::Value;
        }
    }

    if let Some(existing) = tree.find(id.as_str()) {
        if existing.node_type() == tokens::STATUS {
            let local = existing.value().parse::<StatusState>();
            let incoming = attributes.value.parse::<StatusState>();
            if let (Ok(local), Ok(incoming)) = (local, incoming) {
                attributes.value = local.reconcile(incoming).as_str().to_string();
            }
        }

        let already_here = existing.parent() == Some(parent)
            || tree.get(parent)?.has_child(&id);

        let node = tree.get_mut(&id)?;
        node.set_attributes(attributes);
        node.set_spirit(ref_type == RefType::Spirit);
        if target.is_some() || node.is_reference() {
            node.set_target(target);
        }

        if deleted {
            if let Some(p) = tree.find_mut(parent.as_str()) {
                p.remove_child(&id);
            }
            if let Err(e) = tree.remove_object(&id) {
                debug!("could not remove deleted {}: {}", id, e);
            }
            return Ok(None);
        }
        if !already_here {
            tree.link(parent, &id)?;
        }
        return Ok(Some(id));
    }

    if deleted {
        debug!("ignoring deletion of unknown {}", id);
        return Ok(None);
    }
    let created = match target {
        Some(target) => tree.create_reference_node(parent, attributes, &target)?,
        None => {
            let created = tree.create_object(Some(parent), attributes)?;
            if ref_type == RefType::Spirit {
                tree.get_mut(&created)?.set_spirit(true);
            }
            created
        }
    };
    if created != id {
        debug!("incoming id {} empty or taken, stored as {}", id, created);
    }
    Ok(Some(created))
}

/// Short log form of a parse result.
struct ParsedKind<'a>(&'a Parsed);

impl std::fmt::Debug for ParsedKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Parsed::Document { id, roots } => write!(f, "document {} ({} roots)", id, roots.len()),
            Parsed::Transient(node) => write!(f, "transient {} {}", node.node_type(), node.id()),
            Parsed::KeepAliveRequest => f.write_str("keep-alive request"),
            Parsed::KeepAliveConfirm => f.write_str("keep-alive confirmation"),
            Parsed::ClassRequest { class_name } => write!(f, "class request {}", class_name),
            Parsed::Payload(p) => write!(f, "{} payload of {} bytes", p.tag, p.bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dstore_core::RefTag;
    use dstore_store::StoreConfig;

    fn parser() -> (Parser, Arc<DataStore>, Arc<PeerState>) {
        let store = Arc::new(DataStore::new(StoreConfig::default()));
        let peer = Arc::new(PeerState::new());
        (Parser::new(store.clone(), peer.clone()), store, peer)
    }

    fn element(node_type: &str, id: &str, name: &str, value: &str, ref_type: &str) -> String {
        format!(
            r#"<DataElement type="{}" id="{}" name="{}" value="{}" source="" sourceLocation="" refType="{}" depth="2">"#,
            node_type, id, name, value, ref_type
        )
    }

    fn document(id: &str, body: &[String]) -> Vec<u8> {
        let mut out = element("DOCUMENT", id, "document", "document", "value");
        out.push('\n');
        for line in body {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("</DataElement>\n");
        out.into_bytes()
    }

    async fn parse(parser: &mut Parser, bytes: Vec<u8>) -> Parsed {
        let mut reader = RecordReader::new(&bytes[..]);
        parser.parse_document(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_document_creates_nodes() {
        let (mut parser, store, _) = parser();
        let bytes = document(
            "doc",
            &[
                element("dir", "1", "root", "root", "value"),
                element("file", "2", "child", "a", "value"),
                element("file", "3", "grand", "b&lt;c", "value"),
                "</DataElement>".into(),
                "</DataElement>".into(),
                "</DataElement>".into(),
            ],
        );
        let parsed = parse(&mut parser, bytes).await;
        assert_eq!(
            parsed,
            Parsed::Document {
                id: NodeId::new("doc"),
                roots: vec![NodeId::new("1")],
            }
        );

        let tree = store.read();
        assert_eq!(tree.find("3").unwrap().value(), "b<c");
        assert_eq!(tree.find("3").unwrap().parent(), Some(&NodeId::new("2")));
        assert_eq!(tree.children_of(&NodeId::new("doc")), vec![NodeId::new("1")]);
    }

    #[tokio::test]
    async fn test_known_document_is_cleared() {
        let (mut parser, store, _) = parser();
        parse(
            &mut parser,
            document("doc", &[element("f", "1", "a", "a", "value"), "</DataElement>".into()]),
        )
        .await;
        parse(
            &mut parser,
            document("doc", &[element("f", "2", "b", "b", "value"), "</DataElement>".into()]),
        )
        .await;

        let tree = store.read();
        assert_eq!(tree.children_of(&NodeId::new("doc")), vec![NodeId::new("2")]);
        // The first node survives outside the wrapper.
        assert!(tree.contains("1"));
    }

    #[tokio::test]
    async fn test_update_in_place() {
        let (mut parser, store, _) = parser();
        let body = |v: &str| vec![element("f", "1", "a", v, "value"), "</DataElement>".to_string()];
        parse(&mut parser, document("doc", &body("old"))).await;
        parse(&mut parser, document("doc", &body("new"))).await;

        let tree = store.read();
        assert_eq!(tree.find("1").unwrap().value(), "new");
        assert_eq!(tree.children_of(&NodeId::new("doc")), vec![NodeId::new("1")]);
    }

    #[tokio::test]
    async fn test_reference_resolution() {
        let (mut parser, store, _) = parser();
        store.modify(|tree| {
            let host = tree.host_root().clone();
            tree.create_object(Some(&host), Attributes::new("f", NodeId::new("1"), "A"))
                .unwrap();
        });

        let bytes = document(
            "doc",
            &[
                element("cmd", "c", "cmd", "cmd", "value"),
                element("contents", "c-ref-1", "1", "1", "reference"),
                "</DataElement>".into(),
                element("contents", "c-ref-99", "99", "99", "reference"),
                "</DataElement>".into(),
                "</DataElement>".into(),
            ],
        );
        parse(&mut parser, bytes).await;

        let tree = store.read();
        let known = tree.find("c-ref-1").unwrap();
        assert!(known.is_reference());
        assert_eq!(known.target(), Some(&NodeId::new("1")));

        let unknown = tree.find("c-ref-99").unwrap();
        assert!(!unknown.is_reference());
        assert_eq!(unknown.value(), "99");
    }

    #[tokio::test]
    async fn test_spirit_cleared_by_full_update() {
        let (mut parser, store, _) = parser();
        parse(
            &mut parser,
            document("doc", &[element("dir", "d", "docs", "/docs", "spirit"), "</DataElement>".into()]),
        )
        .await;
        assert!(store.find("d").unwrap().is_spirit());

        parse(
            &mut parser,
            document(
                "doc",
                &[
                    element("dir", "d", "docs", "/docs", "value"),
                    element("f", "d1", "x", "x", "value"),
                    "</DataElement>".into(),
                    "</DataElement>".into(),
                ],
            ),
        )
        .await;
        let node = store.find("d").unwrap();
        assert!(!node.is_spirit());
        assert_eq!(node.children().len(), 1);
    }

    #[tokio::test]
    async fn test_status_done_needs_two_records() {
        let (mut parser, store, _) = parser();
        let status = |v: &str| vec![element("status", "s", v, v, "value"), "</DataElement>".to_string()];
        parse(&mut parser, document("doc", &status("start"))).await;
        parse(&mut parser, document("doc", &status("done"))).await;
        assert_eq!(store.find("s").unwrap().value(), "almost done");

        parse(&mut parser, document("doc", &status("done"))).await;
        assert_eq!(store.find("s").unwrap().value(), "done");
    }

    #[tokio::test]
    async fn test_deleted_record_removes_node() {
        let (mut parser, store, _) = parser();
        parse(
            &mut parser,
            document("doc", &[element("f", "1", "a", "a", "value"), "</DataElement>".into()]),
        )
        .await;
        parse(
            &mut parser,
            document("doc", &[element("f", "1", "a", "deleted", "value"), "</DataElement>".into()]),
        )
        .await;
        assert!(store.find("1").is_none());
    }

    #[tokio::test]
    async fn test_bare_record_is_transient() {
        let (mut parser, store, _) = parser();
        let before = store.read().len();
        let mut bytes = element("note", "t1", "hello", "hello", "value");
        bytes.push_str("\n<Buffer>\nline one\nline&#59; two\n</Buffer>\n</DataElement>\n");
        let parsed = parse(&mut parser, bytes.into_bytes()).await;

        match parsed {
            Parsed::Transient(node) => {
                assert_eq!(node.name(), "hello");
                assert_eq!(node.buffer(), "line one\nline; two");
            }
            other => panic!("expected transient, got {:?}", other),
        }
        assert_eq!(store.read().len(), before);
    }

    #[tokio::test]
    async fn test_keep_alive_records() {
        let (mut parser, _, _) = parser();
        let mut bytes = element("KeepAlive", "KeepAlive", "KeepAlive", "KeepAlive", "value");
        bytes.push_str("\n</DataElement>\n");
        assert_eq!(parse(&mut parser, bytes.into_bytes()).await, Parsed::KeepAliveRequest);

        let bytes = r#"<DataElement type="KeepAliveConfirm" id="k" name="k" value="k"/>"#.to_string() + "\n";
        assert_eq!(parse(&mut parser, bytes.into_bytes()).await, Parsed::KeepAliveConfirm);
    }

    #[tokio::test]
    async fn test_malformed_record_skipped() {
        let (mut parser, store, _) = parser();
        let bytes = document(
            "doc",
            &[
                "<DataElement type=broken>".into(),
                "</DataElement>".into(),
                element("f", "ok", "a", "a", "value"),
                "</DataElement>".into(),
            ],
        );
        let parsed = parse(&mut parser, bytes).await;
        assert_eq!(
            parsed,
            Parsed::Document {
                id: NodeId::new("doc"),
                roots: vec![NodeId::new("ok")],
            }
        );
        assert!(store.find("ok").is_some());
    }

    #[tokio::test]
    async fn test_envelope_payload() {
        let (mut parser, _, _) = parser();
        let mut bytes = br#"<File.Binary type="FILE" id="f" name="/tmp/x" value="" source="fs" sourceLocation="" refType="value" depth="4">"#.to_vec();
        bytes.extend_from_slice(b"\n\x00\n\"\xff\n</File.Binary>\n");
        match parse(&mut parser, bytes).await {
            Parsed::Payload(p) => {
                assert_eq!(p.tag, Tag::FileBinary);
                assert_eq!(p.handler_id(), "fs");
                assert_eq!(p.header.name, "/tmp/x");
                assert_eq!(&p.bytes[..], b"\x00\n\"\xff");
            }
            other => panic!("expected payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_vocabulary_detected_from_first_record() {
        let (mut parser, _, peer) = parser();
        let bytes = br#"<DataElement type="x" id="1" name="a" value="a" source="" sourceLocation="" isRef="false" depth="1"/>"#.to_vec();
        let mut bytes = bytes;
        bytes.push(b'\n');
        parse(&mut parser, bytes).await;
        assert_eq!(peer.ref_tag(), Some(RefTag::Legacy));
    }

    #[tokio::test]
    async fn test_end_of_stream_is_connection_lost() {
        let (mut parser, _, _) = parser();
        let bytes = element("DOCUMENT", "doc", "d", "d", "value").into_bytes();
        let mut reader = RecordReader::new(&bytes[..]);
        assert!(matches!(
            parser.parse_document(&mut reader).await,
            Err(SyncError::ConnectionLost)
        ));
    }

    #[tokio::test]
    async fn test_records_under_transient_are_dropped() {
        let (mut parser, store, _) = parser();
        let mut bytes = element("Notice", "n1", "notice", "notice", "value");
        bytes.push('\n');
        bytes.push_str(&element("f", "inner", "inner", "inner", "value"));
        bytes.push_str("\n</DataElement>\n</DataElement>\n");

        match parse(&mut parser, bytes.into_bytes()).await {
            Parsed::Transient(node) => {
                assert_eq!(node.id().as_str(), "n1");
                assert!(node.children().is_empty());
            }
            other => panic!("expected transient record, got {:?}", other),
        }
        assert!(!store.read().contains("inner"));
        assert!(!store.read().contains("n1"));
    }

    #[tokio::test]
    async fn test_blank_buffer_lines_do_not_survive() {
        use crate::generator::{Generator, GeneratorConfig};
        use crate::ledger::TransferLedger;

        let source = DataStore::default();
        let id = source.modify(|tree| {
            let id = tree.create(None, "f", "notes").unwrap();
            tree.set_buffer(&id, "a\n\nb\n").unwrap();
            id
        });
        let mut generator = Generator::new(GeneratorConfig::default(), Arc::new(TransferLedger::new()));
        generator.generate_document(&source.read(), &NodeId::new("doc"), &[id.clone()], 0);
        let bytes = generator.take_output().concat();

        let (mut parser, store, _) = parser();
        parse(&mut parser, bytes).await;
        assert_eq!(store.find(id.as_str()).unwrap().buffer(), "a\nb");
    }
}
