//! Proptest generators for property-based testing.

use proptest::prelude::*;

use dstore_core::{Attributes, NodeId, StatusState};
use dstore_store::Tree;

/// Text that exercises every escaped character, plus quotes and newlines.
pub fn attr_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            4 => "[a-zA-Z0-9 ./_-]",
            1 => prop::sample::select(vec!["&", "\"", "'", "<", ">", ";", "\n", "\t"])
                .prop_map(str::to_string),
        ],
        0..16,
    )
    .prop_map(|parts| parts.concat())
    .prop_filter("reserved deletion marker", |s| s != dstore_core::tokens::DELETED)
}

/// Buffer text. Lines start with a visible character, since blank lines do
/// not survive the wire.
pub fn buffer_text() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z0-9&<>;'\"][a-zA-Z0-9&<>;'\" ]{0,11}", 0..4)
        .prop_map(|lines| lines.join("\n"))
}

pub fn node_type() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["directory", "file", "process", "env", "property"])
        .prop_map(str::to_string)
}

pub fn status_state() -> impl Strategy<Value = StatusState> {
    prop_oneof![
        Just(StatusState::Start),
        Just(StatusState::Working),
        Just(StatusState::AlmostDone),
        Just(StatusState::Done),
        Just(StatusState::Cancelled),
        Just(StatusState::Timeout),
    ]
}

/// Shape of one node and its children. Ids are assigned when built.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub node_type: String,
    pub name: String,
    pub value: String,
    pub buffer: String,
    pub children: Vec<NodeSpec>,
}

/// A tree at most `depth` levels deep with up to `width` children per node.
pub fn node_spec(depth: u32, width: usize) -> impl Strategy<Value = NodeSpec> {
    let leaf = (node_type(), attr_text(), attr_text(), buffer_text()).prop_map(
        |(node_type, name, value, buffer)| NodeSpec {
            node_type,
            name,
            value,
            buffer,
            children: Vec::new(),
        },
    );
    leaf.prop_recursive(depth, 64, width as u32, move |inner| {
        (
            node_type(),
            attr_text(),
            attr_text(),
            buffer_text(),
            prop::collection::vec(inner, 0..=width),
        )
            .prop_map(|(node_type, name, value, buffer, children)| NodeSpec {
                node_type,
                name,
                value,
                buffer,
                children,
            })
    })
}

/// Materialize `spec` under `parent` with ids `prefix`, `prefix.0`, ...
pub fn build_tree(tree: &mut Tree, parent: &NodeId, spec: &NodeSpec, prefix: &str) -> NodeId {
    let attributes = Attributes::new(spec.node_type.as_str(), NodeId::new(prefix), spec.name.as_str())
        .with_value(spec.value.as_str());
    let id = tree
        .create_object(Some(parent), attributes)
        .expect("parent exists");
    if !spec.buffer.is_empty() {
        tree.set_buffer(&id, &spec.buffer).expect("node exists");
    }
    for (i, child) in spec.children.iter().enumerate() {
        build_tree(tree, &id, child, &format!("{}.{}", prefix, i));
    }
    id
}

/// Depth of the deepest node below `spec`.
pub fn spec_depth(spec: &NodeSpec) -> u32 {
    spec.children.iter().map(|c| 1 + spec_depth(c)).max().unwrap_or(0)
}
