//! In-memory structural tree.
//!
//! `MemoryTree` is a minimal host: tagged nodes in a slotmap arena, with
//! parent/child links in secondary maps. It is what the coordinator is tested
//! against, and it serves as a reference for real hosts.

use slotmap::{new_key_type, SecondaryMap, SlotMap};

use super::host::Host;

new_key_type! {
    /// Identifier of a node in a [`MemoryTree`]. Copy, lightweight (u64).
    pub struct NodeId;
}

/// Empty slice returned for nodes without children.
const EMPTY_CHILDREN: &[NodeId] = &[];

/// An arena-backed tree with one fixed root container.
///
/// Nodes are created detached and become reachable once appended under the
/// root, directly or through ancestors. Every structural change sets a
/// mutation flag; a driver loop polls [`take_mutated`](MemoryTree::take_mutated)
/// and runs an observation tick when it is set.
#[derive(Debug)]
pub struct MemoryTree {
    tags: SlotMap<NodeId, String>,
    children: SecondaryMap<NodeId, Vec<NodeId>>,
    parent: SecondaryMap<NodeId, NodeId>,
    root: NodeId,
    mutated: bool,
}

impl MemoryTree {
    /// Create a tree containing only the root container.
    pub fn new() -> Self {
        let mut tags = SlotMap::with_key();
        let root = tags.insert("#root".to_string());
        let mut children = SecondaryMap::new();
        children.insert(root, Vec::new());

        Self {
            tags,
            children,
            parent: SecondaryMap::new(),
            root,
            mutated: false,
        }
    }

    /// The root container.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create a detached node.
    pub fn create(&mut self, tag: impl Into<String>) -> NodeId {
        let id = self.tags.insert(tag.into());
        self.children.insert(id, Vec::new());
        id
    }

    /// Move `child` (with its subtree) to the end of `parent`'s children.
    ///
    /// Returns `false` and changes nothing if either node is missing, or if
    /// the move would make a node its own ancestor.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.tags.contains_key(parent) || !self.tags.contains_key(child) {
            return false;
        }
        if self.is_ancestor_or_self(child, parent) {
            return false;
        }

        self.unlink(child);
        self.parent.insert(child, parent);
        if let Some(siblings) = self.children.get_mut(parent) {
            siblings.push(child);
        }
        self.mutated = true;
        true
    }

    /// Detach `node` from its parent, keeping its subtree intact.
    ///
    /// Returns `false` if the node was not attached to anything.
    pub fn detach(&mut self, node: NodeId) -> bool {
        let detached = self.unlink(node);
        if detached {
            self.mutated = true;
        }
        detached
    }

    /// Destroy `node` and all its descendants.
    ///
    /// The root container cannot be removed. Returns whether anything was removed.
    pub fn remove(&mut self, node: NodeId) -> bool {
        if node == self.root || !self.tags.contains_key(node) {
            return false;
        }

        self.unlink(node);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(kids) = self.children.remove(current) {
                stack.extend(kids);
            }
            self.parent.remove(current);
            self.tags.remove(current);
        }
        self.mutated = true;
        true
    }

    /// Get the parent of a node, if it has one.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parent.get(node).copied()
    }

    /// Get the children of a node. Empty for leaves and missing nodes.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.children
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or(EMPTY_CHILDREN)
    }

    /// The tag a node was created with.
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.tags.get(node).map(String::as_str)
    }

    /// Whether the node exists (attached or not).
    pub fn exists(&self, node: NodeId) -> bool {
        self.tags.contains_key(node)
    }

    /// Number of nodes, including the root container.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Always `false`: the root container is never removed.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Return and clear the mutation flag.
    pub fn take_mutated(&mut self) -> bool {
        std::mem::replace(&mut self.mutated, false)
    }

    /// Whether `ancestor` is `node` or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        if !self.tags.contains_key(node) {
            return false;
        }
        let mut current = node;
        loop {
            if current == ancestor {
                return true;
            }
            match self.parent.get(current) {
                Some(&p) => current = p,
                None => return false,
            }
        }
    }

    /// Remove `node` from its parent's child list. Returns whether it had a parent.
    fn unlink(&mut self, node: NodeId) -> bool {
        match self.parent.remove(node) {
            Some(old_parent) => {
                if let Some(siblings) = self.children.get_mut(old_parent) {
                    siblings.retain(|&child| child != node);
                }
                true
            }
            None => false,
        }
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for MemoryTree {
    type Node = NodeId;

    fn contains(&self, root: NodeId, node: NodeId) -> bool {
        self.is_ancestor_or_self(root, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a small attached tree:
    /// ```text
    ///      #root
    ///        |
    ///        a
    ///       / \
    ///      b   c
    /// ```
    fn build_tree() -> (MemoryTree, NodeId, NodeId, NodeId) {
        let mut tree = MemoryTree::new();
        let a = tree.create("section");
        let b = tree.create("p");
        let c = tree.create("p");
        tree.append_child(tree.root(), a);
        tree.append_child(a, b);
        tree.append_child(a, c);
        (tree, a, b, c)
    }

    #[test]
    fn new_tree_has_only_root() {
        let tree = MemoryTree::new();
        assert_eq!(tree.len(), 1);
        assert!(!tree.is_empty());
        assert_eq!(tree.tag(tree.root()), Some("#root"));
        assert!(tree.contains(tree.root(), tree.root()));
    }

    #[test]
    fn created_nodes_start_detached() {
        let mut tree = MemoryTree::new();
        let node = tree.create("div");
        assert!(tree.exists(node));
        assert!(tree.parent(node).is_none());
        assert!(!tree.contains(tree.root(), node));
        assert!(!tree.take_mutated());
    }

    #[test]
    fn append_makes_subtree_reachable() {
        let (mut tree, a, b, c) = build_tree();
        assert!(tree.take_mutated());
        assert!(!tree.take_mutated());

        assert_eq!(tree.children(a), &[b, c]);
        assert_eq!(tree.parent(b), Some(a));
        assert!(tree.contains(tree.root(), c));
    }

    #[test]
    fn detach_keeps_subtree_but_unreaches_it() {
        let (mut tree, a, b, _c) = build_tree();
        assert!(tree.detach(a));
        assert!(!tree.detach(a));

        assert!(tree.exists(b));
        assert_eq!(tree.parent(b), Some(a));
        assert!(!tree.contains(tree.root(), b));
        assert!(tree.children(tree.root()).is_empty());
    }

    #[test]
    fn moving_between_parents() {
        let (mut tree, a, b, c) = build_tree();
        assert!(tree.append_child(c, b));
        assert_eq!(tree.children(a), &[c]);
        assert_eq!(tree.parent(b), Some(c));
        assert!(tree.contains(tree.root(), b));
    }

    #[test]
    fn cycles_are_refused() {
        let (mut tree, a, b, _c) = build_tree();
        assert!(!tree.append_child(b, a));
        assert!(!tree.append_child(a, a));
        assert_eq!(tree.parent(a), Some(tree.root()));
    }

    #[test]
    fn remove_destroys_subtree() {
        let (mut tree, a, b, c) = build_tree();
        assert!(tree.remove(a));
        assert!(!tree.exists(a));
        assert!(!tree.exists(b));
        assert!(!tree.exists(c));
        assert_eq!(tree.len(), 1);
        assert!(!tree.contains(tree.root(), b));
        assert!(!tree.remove(a));
        assert!(!tree.remove(tree.root()));
    }
}
