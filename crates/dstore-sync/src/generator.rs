//! Serialization of subtrees and payload envelopes.
//!
//! The generator appends tag lines to a text buffer. Once the buffer grows
//! past the configured size it is cut into a ready chunk, so one logical
//! document can reach the writer in many pieces. [`Generator::take_output`]
//! hands the chunks to the sender.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

use dstore_core::{escape, tokens, Attr, Attributes, Node, NodeId, RefTag, RefType};
use dstore_store::Tree;

use crate::ledger::TransferLedger;
use crate::tags::Tag;

/// Generator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Text buffered before a chunk is cut.
    pub buffer_size: usize,
    /// Vocabulary used until the peer's is known.
    pub ref_tag: RefTag,
    /// Skip deleted nodes instead of sending the deletion.
    pub ignore_deleted: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100_000,
            ref_tag: RefTag::Modern,
            ignore_deleted: false,
        }
    }
}

/// Wire serializer for one connection.
pub struct Generator {
    config: GeneratorConfig,
    ref_tag: RefTag,
    buffer: String,
    ready: Vec<Bytes>,
    stack: Vec<Tag>,
    ledger: Arc<TransferLedger>,
}

impl Generator {
    pub fn new(config: GeneratorConfig, ledger: Arc<TransferLedger>) -> Self {
        Self {
            ref_tag: config.ref_tag,
            config,
            buffer: String::new(),
            ready: Vec::new(),
            stack: Vec::new(),
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<TransferLedger> {
        &self.ledger
    }

    pub fn ref_tag(&self) -> RefTag {
        self.ref_tag
    }

    /// Vocabulary to use while the peer's is unknown.
    pub fn default_ref_tag(&self) -> RefTag {
        self.config.ref_tag
    }

    pub fn set_ref_tag(&mut self, tag: RefTag) {
        self.ref_tag = tag;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tree records
    // ─────────────────────────────────────────────────────────────────────

    /// Serialize `id` and up to `depth` levels below it.
    ///
    /// Nodes already sent at their current revision are skipped along with
    /// their subtree, so a second call on an unchanged node emits nothing.
    pub fn generate(&mut self, tree: &Tree, id: &NodeId, depth: u32) {
        let Some(node) = tree.find(id.as_str()) else {
            return;
        };
        if self.config.ignore_deleted && node.is_deleted() {
            return;
        }
        if !self.ledger.needs_send(node) {
            return;
        }

        self.open_tag(Tag::DataElement, node.attributes(), node.ref_type(), node.depth());
        self.write_buffer(node);
        self.ledger.mark_transmitted(node);

        if !node.is_reference() && depth > 0 {
            let children: Vec<NodeId> = node.child_ids().cloned().collect();
            for child in &children {
                self.generate(tree, child, depth - 1);
            }
        }
        self.close_tag();
    }

    /// Serialize `roots` inside a `DOCUMENT` wrapper with id `document`.
    pub fn generate_document(
        &mut self,
        tree: &Tree,
        document: &NodeId,
        roots: &[NodeId],
        depth: u32,
    ) {
        // More entries than nodes means some ids left the tree.
        if self.ledger.len() > tree.len() {
            let dropped = self.ledger.retain(|id| tree.contains(id.as_str()));
            trace!(dropped, "pruned transfer ledger");
        }
        let attributes = Attributes::new(tokens::DOCUMENT, document.clone(), "document");
        self.open_tag(Tag::DataElement, &attributes, RefType::Value, roots.len() as u64);
        for root in roots {
            self.generate(tree, root, depth);
        }
        self.close_tag();
    }

    /// A bare keep-alive request or confirmation record.
    pub fn generate_keep_alive(&mut self, confirm: bool) {
        let node_type = if confirm {
            tokens::KEEP_ALIVE_CONFIRM
        } else {
            tokens::KEEP_ALIVE
        };
        let attributes = Attributes::new(node_type, NodeId::new(node_type), node_type);
        self.open_tag(Tag::DataElement, &attributes, RefType::Value, 0);
        self.close_tag();
    }

    fn write_buffer(&mut self, node: &Node) {
        if node.buffer().is_empty() {
            return;
        }
        self.push_str("<Buffer>\n");
        for line in node.buffer().lines() {
            let escaped = escape(line);
            self.push_str(&escaped);
            self.push_str("\n");
        }
        self.push_str("</Buffer>\n");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Envelopes
    // ─────────────────────────────────────────────────────────────────────

    /// An envelope announcing `payload`, followed by the payload itself.
    ///
    /// Text-mode envelopes carry the payload decoded as UTF-8; the declared
    /// depth is always the exact byte count written.
    pub fn generate_envelope(&mut self, tag: Tag, header: &Attributes, payload: &[u8]) {
        let payload = if tag.is_file() && !tag.is_binary() {
            Bytes::from(String::from_utf8_lossy(payload).into_owned())
        } else {
            Bytes::copy_from_slice(payload)
        };
        self.open_tag(tag, header, RefType::Value, payload.len() as u64);
        self.push_str("\n");
        self.flush();
        if !payload.is_empty() {
            self.ready.push(payload);
        }
        self.push_str("\n");
        self.close_tag();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────

    fn open_tag(&mut self, tag: Tag, attributes: &Attributes, ref_type: RefType, depth: u64) {
        let depth = depth.to_string();
        let values = [
            attributes.node_type.as_str(),
            attributes.id.as_str(),
            attributes.name.as_str(),
            attributes.value.as_str(),
            attributes.source.as_str(),
            attributes.source_location.as_str(),
            self.ref_tag.token(ref_type),
            depth.as_str(),
        ];

        let mut line = format!("<{}", tag);
        for (attr, value) in Attr::ALL.iter().zip(values) {
            line.push(' ');
            line.push_str(attr.wire_name(self.ref_tag));
            line.push_str("=\"");
            line.push_str(&escape(value));
            line.push('"');
        }
        line.push('>');

        self.push_str(&line);
        if !tag.is_envelope() {
            self.push_str("\n");
        }
        self.stack.push(tag);
    }

    fn close_tag(&mut self) {
        if let Some(tag) = self.stack.pop() {
            let line = format!("</{}>\n", tag);
            self.push_str(&line);
        }
    }

    fn push_str(&mut self, text: &str) {
        self.buffer.push_str(text);
        if self.buffer.len() > self.config.buffer_size {
            self.flush();
        }
    }

    /// Cut the text buffer into a ready chunk.
    pub fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let text = std::mem::take(&mut self.buffer);
            self.ready.push(Bytes::from(text));
        }
    }

    /// Everything generated so far, in order.
    pub fn take_output(&mut self) -> Vec<Bytes> {
        self.flush();
        std::mem::take(&mut self.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let host = tree.host_root().clone();
        let root = tree
            .create_object(Some(&host), Attributes::new("dir", NodeId::new("1"), "root"))
            .unwrap();
        let child = tree
            .create_object(
                Some(&root),
                Attributes::new("file", NodeId::new("2"), "child").with_value("a"),
            )
            .unwrap();
        tree.create_object(
            Some(&child),
            Attributes::new("file", NodeId::new("3"), "grand").with_value("b<c"),
        )
        .unwrap();
        (tree, root)
    }

    fn text(chunks: Vec<Bytes>) -> String {
        chunks
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    fn generator() -> Generator {
        Generator::new(GeneratorConfig::default(), Arc::new(TransferLedger::new()))
    }

    #[test]
    fn test_generate_escapes_and_nests() {
        let (tree, root) = sample_tree();
        let mut gen = generator();
        gen.generate(&tree, &root, 5);
        let out = text(gen.take_output());

        assert!(out.starts_with(
            r#"<DataElement type="dir" id="1" name="root" value="root" source="" sourceLocation="" refType="value" depth="2">"#
        ));
        assert!(out.contains(r#"value="b&lt;c""#));
        assert!(!out.contains("b<c"));
        assert_eq!(out.matches("</DataElement>").count(), 3);
        let pos2 = out.find(r#"id="2""#).unwrap();
        let pos3 = out.find(r#"id="3""#).unwrap();
        assert!(pos2 < pos3);
    }

    #[test]
    fn test_second_generation_is_empty() {
        let (mut tree, root) = sample_tree();
        let mut gen = generator();
        gen.generate(&tree, &root, 5);
        assert!(!gen.take_output().is_empty());

        gen.generate(&tree, &root, 5);
        assert!(gen.take_output().is_empty());

        tree.find_mut("1").unwrap().set_value("changed");
        gen.generate(&tree, &root, 5);
        let out = text(gen.take_output());
        assert!(out.contains(r#"value="changed""#));
        assert!(!out.contains(r#"id="2""#));
    }

    #[test]
    fn test_recreated_id_is_sent_again() {
        let mut tree = Tree::new();
        let host = tree.host_root().clone();
        let x = tree
            .create_object(Some(&host), Attributes::new("f", NodeId::new("x"), "x").with_value("old"))
            .unwrap();
        let mut gen = generator();
        gen.generate(&tree, &x, 0);
        assert!(text(gen.take_output()).contains(r#"value="old""#));

        tree.remove_object(&x).unwrap();
        let again = tree
            .create_object(Some(&host), Attributes::new("f", NodeId::new("x"), "x").with_value("new"))
            .unwrap();
        assert_eq!(again, x);
        gen.generate(&tree, &again, 0);
        assert!(text(gen.take_output()).contains(r#"value="new""#));
    }

    #[test]
    fn test_document_prunes_removed_ids() {
        let (mut tree, root) = sample_tree();
        let mut gen = generator();
        gen.generate_document(&tree, &NodeId::new("doc"), &[root.clone()], 5);
        assert_eq!(gen.ledger().len(), 3);

        tree.remove_object(&root).unwrap();
        for i in 0..8 {
            gen.ledger().mark_pending(&NodeId::new(format!("gone{}", i)));
        }
        gen.generate_document(&tree, &NodeId::new("doc"), &[], 0);
        assert!(gen.ledger().is_empty());
    }

    #[test]
    fn test_depth_limits_recursion() {
        let (tree, root) = sample_tree();
        let mut gen = generator();
        gen.generate(&tree, &root, 1);
        let out = text(gen.take_output());
        assert!(out.contains(r#"id="2""#));
        assert!(!out.contains(r#"id="3""#));
    }

    #[test]
    fn test_buffer_lines() {
        let mut tree = Tree::new();
        let id = tree.create(None, "f", "notes").unwrap();
        tree.set_buffer(&id, "line; one\nline two").unwrap();
        let mut gen = generator();
        gen.generate(&tree, &id, 0);
        let out = text(gen.take_output());
        assert!(out.contains("<Buffer>\nline&#59; one\nline two\n</Buffer>\n"));
    }

    #[test]
    fn test_auto_flush_cuts_chunks() {
        let (tree, root) = sample_tree();
        let config = GeneratorConfig {
            buffer_size: 32,
            ..GeneratorConfig::default()
        };
        let mut gen = Generator::new(config, Arc::new(TransferLedger::new()));
        gen.generate(&tree, &root, 5);
        let chunks = gen.take_output();
        assert!(chunks.len() > 1);

        let mut whole = generator();
        whole.generate(&tree, &root, 5);
        assert_eq!(text(chunks), text(whole.take_output()));
    }

    #[test]
    fn test_legacy_vocabulary() {
        let (tree, root) = sample_tree();
        let mut gen = generator();
        gen.set_ref_tag(RefTag::Legacy);
        gen.generate(&tree, &root, 0);
        let out = text(gen.take_output());
        assert!(out.contains(r#"isRef="false""#));
        assert!(!out.contains("refType"));
    }

    #[test]
    fn test_envelope_declares_exact_length() {
        let mut gen = generator();
        let header = Attributes::new(tokens::FILE, NodeId::new("f"), "/tmp/a.bin");
        gen.generate_envelope(Tag::FileBinary, &header, &[0, 1, 2, 255, 10]);
        let chunks = gen.take_output();

        let head = String::from_utf8_lossy(&chunks[0]).into_owned();
        assert!(head.starts_with("<File.Binary "));
        assert!(head.ends_with("depth=\"5\">\n"));
        assert_eq!(&chunks[1][..], &[0, 1, 2, 255, 10]);
        assert_eq!(&chunks[2][..], b"\n</File.Binary>\n");
    }

    #[test]
    fn test_document_wrapper() {
        let (tree, root) = sample_tree();
        let mut gen = generator();
        gen.generate_document(&tree, &NodeId::new("doc"), &[root], 0);
        let out = text(gen.take_output());
        assert!(out.starts_with(r#"<DataElement type="DOCUMENT" id="doc""#));
        assert!(out.ends_with("</DataElement>\n</DataElement>\n"));
    }
}
