//! The node arena.
//!
//! A `Tree` owns every node of one store, keyed by id. Parent/child links are
//! ids, so references and linked children never form ownership cycles.

use std::collections::HashMap;

use tracing::debug;

use dstore_core::{tokens, Attributes, Child, Node, NodeId, StatusState};

use crate::error::{Result, StoreError};

/// Ids of the well-known roots created with every tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    pub root: NodeId,
    /// Holding area for objects created without a parent.
    pub temp: NodeId,
    /// Command log.
    pub log: NodeId,
    pub host: NodeId,
    pub status: NodeId,
    /// Command descriptors.
    pub schema: NodeId,
}

impl Roots {
    fn contains(&self, id: &NodeId) -> bool {
        [
            &self.root,
            &self.temp,
            &self.log,
            &self.host,
            &self.status,
            &self.schema,
        ]
        .contains(&id)
    }
}

/// All nodes of one store.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    roots: Roots,
}

impl Tree {
    /// A tree holding only the well-known roots.
    pub fn new() -> Self {
        let roots = Roots {
            root: NodeId::new("root"),
            temp: NodeId::new("tempID"),
            log: NodeId::new("logID"),
            host: NodeId::new("hostID"),
            status: NodeId::new("statusID"),
            schema: NodeId::new("schemaID"),
        };
        let mut tree = Self {
            nodes: HashMap::new(),
            roots: roots.clone(),
        };
        tree.nodes.insert(
            roots.root.clone(),
            Node::new(Attributes::new("root", roots.root.clone(), "Root")),
        );
        let children = [
            (&roots.temp, "temp", "Temp Root"),
            (&roots.log, "log", "Log Root"),
            (&roots.host, "host", "Host Root"),
            (&roots.status, "status", "okay"),
            (&roots.schema, "schema", "Schema Root"),
        ];
        for (id, node_type, name) in children {
            tree.insert_owned(&roots.root, Node::new(Attributes::new(node_type, id.clone(), name)));
        }
        tree
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn root(&self) -> &NodeId {
        &self.roots.root
    }

    pub fn temp_root(&self) -> &NodeId {
        &self.roots.temp
    }

    pub fn log_root(&self) -> &NodeId {
        &self.roots.log
    }

    pub fn host_root(&self) -> &NodeId {
        &self.roots.host
    }

    pub fn schema_root(&self) -> &NodeId {
        &self.roots.schema
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Like [`find`](Self::find), failing with `NotFound`.
    pub fn get(&self, id: &NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of the children of `id`, owned and linked, in order.
    pub fn children_of(&self, id: &NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|n| n.child_ids().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes reachable from `id` through owned children, excluding `id`.
    pub fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                for child in node.children().iter().rev() {
                    if let Child::Owned(cid) = child {
                        out.push(cid.clone());
                        stack.push(cid.clone());
                    }
                }
            }
        }
        out
    }

    /// Current state of a status node.
    pub fn status_state(&self, id: &NodeId) -> Result<StatusState> {
        let node = self.get(id)?;
        if node.node_type() != tokens::STATUS {
            return Err(StoreError::NotAStatus(id.clone()));
        }
        Ok(node.value().parse()?)
    }

    /// Keep `suggested` if it is free, otherwise draw random ids until one is.
    pub fn unique_id(&self, suggested: &NodeId) -> NodeId {
        if !suggested.is_empty() && !self.contains(suggested.as_str()) {
            return suggested.clone();
        }
        loop {
            let id = NodeId::random();
            if !self.contains(id.as_str()) {
                return id;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────

    /// Create a value node under `parent` (or the temp root). The id in
    /// `attributes` is a suggestion.
    pub fn create_object(
        &mut self,
        parent: Option<&NodeId>,
        attributes: Attributes,
    ) -> Result<NodeId> {
        self.insert_new(parent, attributes, Node::new)
    }

    fn insert_new(
        &mut self,
        parent: Option<&NodeId>,
        mut attributes: Attributes,
        build: impl FnOnce(Attributes) -> Node,
    ) -> Result<NodeId> {
        let parent = parent.unwrap_or(&self.roots.temp).clone();
        if !self.contains(parent.as_str()) {
            return Err(StoreError::NotFound(parent));
        }
        attributes.id = self.unique_id(&attributes.id);
        let id = attributes.id.clone();
        self.insert_owned(&parent, build(attributes));
        Ok(id)
    }

    /// Shorthand for a node whose value equals its name.
    pub fn create(
        &mut self,
        parent: Option<&NodeId>,
        node_type: &str,
        name: &str,
    ) -> Result<NodeId> {
        self.create_object(parent, Attributes::new(node_type, NodeId::default(), name))
    }

    /// Create a reference from `parent` to `target` labelled `relation`.
    ///
    /// The reference's id is `parent + relation + target` and its name and
    /// value are the target id.
    pub fn create_reference(
        &mut self,
        parent: &NodeId,
        target: &NodeId,
        relation: &str,
    ) -> Result<NodeId> {
        let suggested = NodeId::new(format!("{}{}{}", parent, relation, target));
        let attributes = Attributes::new(relation, suggested, target.as_str());
        self.create_reference_node(parent, attributes, target)
    }

    /// Create a reference under `parent` with explicit attributes, as
    /// received from a peer. The id in `attributes` is a suggestion.
    pub fn create_reference_node(
        &mut self,
        parent: &NodeId,
        attributes: Attributes,
        target: &NodeId,
    ) -> Result<NodeId> {
        self.get(target)?;
        let target = target.clone();
        self.insert_new(Some(parent), attributes, move |a| Node::reference(a, target))
    }

    /// Create a command descriptor under the schema root.
    pub fn create_command_descriptor(&mut self, name: &str, value: &str) -> Result<NodeId> {
        let schema = self.roots.schema.clone();
        let attributes = Attributes::new(tokens::COMMAND_DESCRIPTOR, NodeId::default(), name)
            .with_value(value);
        self.create_object(Some(&schema), attributes)
    }

    /// Nest an existing node under `parent` without taking ownership.
    /// Returns false if it is already a child.
    pub fn link(&mut self, parent: &NodeId, child: &NodeId) -> Result<bool> {
        self.get(child)?;
        Ok(self.get_mut(parent)?.push_child(Child::Linked(child.clone())))
    }

    fn insert_owned(&mut self, parent: &NodeId, mut node: Node) {
        let id = node.id().clone();
        node.set_parent(Some(parent.clone()));
        self.nodes.insert(id.clone(), node);
        if let Some(p) = self.nodes.get_mut(parent) {
            p.push_child(Child::Owned(id));
        }
    }

    /// Move an owned node under a new parent.
    pub fn reparent(&mut self, id: &NodeId, new_parent: &NodeId) -> Result<()> {
        self.get(new_parent)?;
        let old = self.get(id)?.parent().cloned();
        if let Some(old) = old {
            if let Some(p) = self.nodes.get_mut(&old) {
                p.remove_child(id);
            }
        }
        self.get_mut(id)?.set_parent(Some(new_parent.clone()));
        self.get_mut(new_parent)?.push_child(Child::Owned(id.clone()));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────

    pub fn update_attributes(&mut self, id: &NodeId, attributes: Attributes) -> Result<()> {
        self.get_mut(id)?.set_attributes(attributes);
        Ok(())
    }

    pub fn set_buffer(&mut self, id: &NodeId, buffer: &str) -> Result<()> {
        self.get_mut(id)?.set_buffer(buffer);
        Ok(())
    }

    pub fn append_buffer(&mut self, id: &NodeId, text: &str) -> Result<()> {
        self.get_mut(id)?.append_buffer(text);
        Ok(())
    }

    /// Empty a node's child list. Owned children survive under the temp
    /// root so existing references to them stay valid.
    pub fn clear_children(&mut self, id: &NodeId) -> Result<()> {
        let children = self.get_mut(id)?.take_children();
        let temp = self.roots.temp.clone();
        for child in children {
            if let Child::Owned(cid) = child {
                if let Some(node) = self.nodes.get_mut(&cid) {
                    node.set_parent(Some(temp.clone()));
                }
                if let Some(t) = self.nodes.get_mut(&temp) {
                    t.push_child(Child::Owned(cid));
                }
            }
        }
        Ok(())
    }

    /// Mark a node and its owned descendants deleted. They stay in the
    /// tree until purged so the deletion can be sent.
    pub fn delete_object(&mut self, id: &NodeId) -> Result<()> {
        if self.roots.contains(id) {
            return Err(StoreError::Protected(id.clone()));
        }
        let mut ids = self.descendants(id);
        ids.push(id.clone());
        for nid in ids {
            if let Some(node) = self.nodes.get_mut(&nid) {
                node.mark_deleted();
            }
        }
        Ok(())
    }

    /// Detach a node from its parent and drop it with its owned descendants.
    pub fn remove_object(&mut self, id: &NodeId) -> Result<Node> {
        if self.roots.contains(id) {
            return Err(StoreError::Protected(id.clone()));
        }
        let parent = self.get(id)?.parent().cloned();
        if let Some(parent) = parent {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.remove_child(id);
            }
        }
        for nid in self.descendants(id) {
            self.nodes.remove(&nid);
        }
        debug!("removed node {}", id);
        self.nodes
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Deleted nodes under `id`, following owned and linked children.
    pub fn find_deleted(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                for cid in node.child_ids() {
                    match self.nodes.get(cid) {
                        Some(child) if child.is_deleted() => out.push(cid.clone()),
                        Some(_) => stack.push(cid.clone()),
                        None => {}
                    }
                }
            }
        }
        out
    }

    /// Remove every deleted node found under `id`. Returns how many were
    /// removed.
    pub fn purge_deleted(&mut self, id: &NodeId) -> usize {
        let mut removed = 0;
        for nid in self.find_deleted(id) {
            // Unlink from every container, not only the owner.
            let holders: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|(_, n)| n.has_child(&nid))
                .map(|(k, _)| k.clone())
                .collect();
            for holder in holders {
                if let Some(h) = self.nodes.get_mut(&holder) {
                    h.remove_child(&nid);
                }
            }
            if self.remove_object(&nid).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Turn a node into a spirit: keep its attributes, drop its children.
    /// Returns how many nodes were discarded.
    pub fn spirit_node(&mut self, id: &NodeId) -> Result<usize> {
        if self.roots.contains(id) {
            return Err(StoreError::Protected(id.clone()));
        }
        let descendants = self.descendants(id);
        let node = self.get_mut(id)?;
        node.take_children();
        node.set_spirit(true);
        for nid in &descendants {
            self.nodes.remove(nid);
        }
        Ok(descendants.len())
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tree_has_roots() {
        let tree = Tree::new();
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.children_of(tree.root()).len(), 5);
        assert_eq!(tree.find("logID").unwrap().parent(), Some(tree.root()));
    }

    #[test]
    fn test_create_without_parent_goes_to_temp() {
        let mut tree = Tree::new();
        let id = tree.create(None, "file", "a").unwrap();
        assert_eq!(tree.find(id.as_str()).unwrap().parent(), Some(tree.temp_root()));
    }

    #[test]
    fn test_suggested_id_made_unique() {
        let mut tree = Tree::new();
        let root = tree.root().clone();
        let first = tree
            .create_object(Some(&root), Attributes::new("f", NodeId::new("x"), "x"))
            .unwrap();
        let second = tree
            .create_object(Some(&root), Attributes::new("f", NodeId::new("x"), "x"))
            .unwrap();
        assert_eq!(first.as_str(), "x");
        assert_ne!(second, first);
    }

    #[test]
    fn test_create_reference() {
        let mut tree = Tree::new();
        let host = tree.host_root().clone();
        let target = tree
            .create_object(Some(&host), Attributes::new("f", NodeId::new("1"), "A"))
            .unwrap();
        let log = tree.log_root().clone();
        let r = tree.create_reference(&log, &target, "contents").unwrap();

        assert_eq!(r.as_str(), "logIDcontents1");
        let node = tree.find(r.as_str()).unwrap();
        assert!(node.is_reference());
        assert_eq!(node.target(), Some(&target));
        assert_eq!(node.name(), "1");
        assert_eq!(node.value(), "1");
        // The target keeps its owner.
        assert_eq!(tree.find("1").unwrap().parent(), Some(&host));
    }

    #[test]
    fn test_link_is_duplicate_protected() {
        let mut tree = Tree::new();
        let a = tree.create(None, "f", "a").unwrap();
        let log = tree.log_root().clone();
        assert!(tree.link(&log, &a).unwrap());
        assert!(!tree.link(&log, &a).unwrap());
    }

    #[test]
    fn test_clear_children_moves_owned_to_temp() {
        let mut tree = Tree::new();
        let host = tree.host_root().clone();
        let child = tree.create(Some(&host), "f", "a").unwrap();
        tree.clear_children(&host).unwrap();

        assert!(tree.children_of(&host).is_empty());
        assert!(tree.contains(child.as_str()));
        assert_eq!(tree.find(child.as_str()).unwrap().parent(), Some(tree.temp_root()));
    }

    #[test]
    fn test_delete_then_purge() {
        let mut tree = Tree::new();
        let host = tree.host_root().clone();
        let a = tree.create(Some(&host), "f", "a").unwrap();
        let b = tree.create(Some(&a), "f", "b").unwrap();

        tree.delete_object(&a).unwrap();
        assert!(tree.find(b.as_str()).unwrap().is_deleted());
        assert_eq!(tree.find_deleted(&host), vec![a.clone()]);

        assert_eq!(tree.purge_deleted(&host), 1);
        assert!(!tree.contains(a.as_str()));
        assert!(!tree.contains(b.as_str()));
        assert!(tree.children_of(&host).is_empty());
    }

    #[test]
    fn test_roots_are_protected() {
        let mut tree = Tree::new();
        let log = tree.log_root().clone();
        assert!(matches!(tree.remove_object(&log), Err(StoreError::Protected(_))));
        assert!(matches!(tree.delete_object(&log), Err(StoreError::Protected(_))));
    }

    #[test]
    fn test_spirit_keeps_attributes() {
        let mut tree = Tree::new();
        let host = tree.host_root().clone();
        let a = tree
            .create_object(
                Some(&host),
                Attributes::new("dir", NodeId::new("a"), "docs").with_value("/docs"),
            )
            .unwrap();
        tree.create(Some(&a), "f", "1").unwrap();
        tree.create(Some(&a), "f", "2").unwrap();

        assert_eq!(tree.spirit_node(&a).unwrap(), 2);
        let node = tree.find("a").unwrap();
        assert!(node.is_spirit());
        assert_eq!(node.name(), "docs");
        assert_eq!(node.value(), "/docs");
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_status_state() {
        let mut tree = Tree::new();
        let s = tree
            .create_object(None, Attributes::new(tokens::STATUS, NodeId::default(), "start"))
            .unwrap();
        assert_eq!(tree.status_state(&s).unwrap(), StatusState::Start);

        let other = tree.create(None, "f", "x").unwrap();
        assert!(matches!(tree.status_state(&other), Err(StoreError::NotAStatus(_))));
    }
}
