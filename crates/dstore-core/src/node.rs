//! Node: one element of the shared tree.
//!
//! A node carries eight positional attributes, an optional text buffer, and an
//! ordered child list. Children are either owned (the child's parent is this
//! node) or linked (a non-owning entry that nests an existing node under this
//! one for transmission, as command arguments and document wrappers do).
//!
//! Every mutation bumps the node's revision. The sync layer compares revisions
//! to decide whether a node must be re-sent, so transmission bookkeeping never
//! lives on the node itself. Revisions come from one process-wide counter, so
//! a node created under a recycled id never repeats a revision seen before.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{tokens, NodeId};

/// The eight attribute slots of a record, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    Type,
    Id,
    Name,
    Value,
    Source,
    SourceLocation,
    RefType,
    Depth,
}

impl Attr {
    /// All slots in positional wire order.
    pub const ALL: [Attr; 8] = [
        Attr::Type,
        Attr::Id,
        Attr::Name,
        Attr::Value,
        Attr::Source,
        Attr::SourceLocation,
        Attr::RefType,
        Attr::Depth,
    ];

    /// Attribute name written on the wire. The ref slot depends on the
    /// vocabulary and is resolved through [`RefTag::attribute_name`].
    pub const fn wire_name(self, tag: RefTag) -> &'static str {
        match self {
            Attr::Type => "type",
            Attr::Id => "id",
            Attr::Name => "name",
            Attr::Value => "value",
            Attr::Source => "source",
            Attr::SourceLocation => "sourceLocation",
            Attr::RefType => tag.attribute_name(),
            Attr::Depth => "depth",
        }
    }
}

/// Whether a node holds its own data, points at another node, or has been
/// evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefType {
    Value,
    Reference,
    Spirit,
}

impl RefType {
    /// Decode any of the five wire tokens, whichever vocabulary sent them.
    pub fn from_token(token: &str) -> Result<Self> {
        match token {
            "value" | "false" => Ok(Self::Value),
            "reference" | "true" => Ok(Self::Reference),
            "spirit" => Ok(Self::Spirit),
            other => Err(CoreError::InvalidToken {
                attribute: "refType",
                token: other.to_string(),
            }),
        }
    }
}

/// The two historical vocabularies for the reference attribute.
///
/// Legacy peers write `isRef="true|false"` and cannot express spirit;
/// a spirit node is written as `false` to them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefTag {
    #[default]
    Modern,
    Legacy,
}

impl RefTag {
    /// Name of the reference attribute in this vocabulary.
    pub const fn attribute_name(self) -> &'static str {
        match self {
            RefTag::Modern => "refType",
            RefTag::Legacy => "isRef",
        }
    }

    /// Detect the vocabulary from an attribute name seen on the wire.
    pub fn from_attribute_name(name: &str) -> Option<Self> {
        match name {
            "refType" => Some(RefTag::Modern),
            "isRef" => Some(RefTag::Legacy),
            _ => None,
        }
    }

    /// Token for a reference kind in this vocabulary.
    pub const fn token(self, ref_type: RefType) -> &'static str {
        match (self, ref_type) {
            (RefTag::Modern, RefType::Value) => "value",
            (RefTag::Modern, RefType::Reference) => "reference",
            (RefTag::Modern, RefType::Spirit) => "spirit",
            (RefTag::Legacy, RefType::Reference) => "true",
            (RefTag::Legacy, _) => "false",
        }
    }
}

/// The attribute values of a node, except the reference kind which is
/// derived from the node's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub node_type: String,
    pub id: NodeId,
    pub name: String,
    pub value: String,
    pub source: String,
    pub source_location: String,
    /// Subtree size marker for nodes, exact byte count for envelopes.
    pub depth: u64,
}

impl Attributes {
    /// Attributes with `value` defaulting to `name`.
    pub fn new(node_type: impl Into<String>, id: NodeId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            node_type: node_type.into(),
            id,
            value: name.clone(),
            name,
            source: String::new(),
            source_location: String::new(),
            depth: tokens::DEFAULT_DEPTH,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_source_location(mut self, location: impl Into<String>) -> Self {
        self.source_location = location.into();
        self
    }

    pub fn with_depth(mut self, depth: u64) -> Self {
        self.depth = depth;
        self
    }

    /// Parse the depth slot. An empty slot means the default depth.
    pub fn parse_depth(raw: &str) -> Result<u64> {
        if raw.is_empty() {
            return Ok(tokens::DEFAULT_DEPTH);
        }
        raw.trim()
            .parse()
            .map_err(|_| CoreError::InvalidDepth(raw.to_string()))
    }

    /// Whether these attributes describe a deleted node.
    pub fn is_deleted(&self) -> bool {
        self.value == tokens::DELETED
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Self::new("", NodeId::default(), "")
    }
}

/// One entry of a node's child list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Child {
    /// The child's parent is this node.
    Owned(NodeId),
    /// Nested here without ownership; the child lives elsewhere.
    Linked(NodeId),
}

impl Child {
    pub fn id(&self) -> &NodeId {
        match self {
            Child::Owned(id) | Child::Linked(id) => id,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Child::Owned(_))
    }
}

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

/// A tree element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    attributes: Attributes,
    buffer: String,
    parent: Option<NodeId>,
    children: Vec<Child>,
    /// Set for reference nodes.
    target: Option<NodeId>,
    spirit: bool,
    deleted: bool,
    revision: u64,
}

impl Node {
    /// A value node.
    pub fn new(attributes: Attributes) -> Self {
        let deleted = attributes.is_deleted();
        Self {
            attributes,
            buffer: String::new(),
            parent: None,
            children: Vec::new(),
            target: None,
            spirit: false,
            deleted,
            revision: next_revision(),
        }
    }

    /// A reference node pointing at `target`.
    pub fn reference(attributes: Attributes, target: NodeId) -> Self {
        let mut node = Self::new(attributes);
        node.target = Some(target);
        node
    }

    /// A node built from a decoded record. A reference record keeps no
    /// target here; the store resolves it.
    pub fn from_record(attributes: Attributes, ref_type: RefType) -> Self {
        let mut node = Self::new(attributes);
        node.spirit = ref_type == RefType::Spirit;
        node
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> &NodeId {
        &self.attributes.id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn node_type(&self) -> &str {
        &self.attributes.node_type
    }

    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    pub fn value(&self) -> &str {
        &self.attributes.value
    }

    pub fn source(&self) -> &str {
        &self.attributes.source
    }

    pub fn depth(&self) -> u64 {
        self.attributes.depth
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    /// Ids of all children, owned and linked, in order.
    pub fn child_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.children.iter().map(Child::id)
    }

    pub fn target(&self) -> Option<&NodeId> {
        self.target.as_ref()
    }

    pub fn is_reference(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_spirit(&self) -> bool {
        self.spirit
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Monotonic mutation counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Reference kind as written on the wire.
    pub fn ref_type(&self) -> RefType {
        if self.target.is_some() {
            RefType::Reference
        } else if self.spirit {
            RefType::Spirit
        } else {
            RefType::Value
        }
    }

    pub fn has_child(&self, id: &NodeId) -> bool {
        self.children.iter().any(|c| c.id() == id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────

    /// Replace all attributes except the id.
    pub fn set_attributes(&mut self, mut attributes: Attributes) {
        attributes.id = self.attributes.id.clone();
        self.deleted = attributes.is_deleted();
        self.attributes = attributes;
        self.touch();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.attributes.name = name.into();
        self.touch();
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.attributes.value = value.into();
        self.touch();
    }

    /// Replace the buffer text.
    ///
    /// The wire carries the buffer line by line, so empty lines and a
    /// trailing newline are not reproduced on the peer.
    pub fn set_buffer(&mut self, buffer: impl Into<String>) {
        self.buffer = buffer.into();
        self.touch();
    }

    pub fn append_buffer(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.touch();
    }

    /// Parent pointers are local bookkeeping and do not bump the revision.
    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    /// Append a child entry. Returns false if a child with the same id is
    /// already present.
    pub fn push_child(&mut self, child: Child) -> bool {
        if self.has_child(child.id()) {
            return false;
        }
        self.children.push(child);
        self.touch();
        true
    }

    pub fn remove_child(&mut self, id: &NodeId) -> Option<Child> {
        let pos = self.children.iter().position(|c| c.id() == id)?;
        self.touch();
        Some(self.children.remove(pos))
    }

    pub fn take_children(&mut self) -> Vec<Child> {
        if !self.children.is_empty() {
            self.touch();
        }
        std::mem::take(&mut self.children)
    }

    /// Point this node at `target`, or turn it back into a value node.
    pub fn set_target(&mut self, target: Option<NodeId>) {
        self.target = target;
        self.touch();
    }

    pub fn set_spirit(&mut self, spirit: bool) {
        if self.spirit != spirit {
            self.spirit = spirit;
            self.touch();
        }
    }

    /// Mark deleted. The node keeps its other attributes so the deletion
    /// can still be propagated.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.attributes.value = tokens::DELETED.to_string();
        self.buffer.clear();
        self.touch();
    }

    /// Bump the revision without changing data, forcing a re-send.
    pub fn touch(&mut self) {
        self.revision = next_revision();
    }
}
