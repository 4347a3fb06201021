//! ConfigTree: arena-backed configuration tree
//!
//! Nodes live in a `Vec` and refer to each other through [`NodeId`] indices,
//! so pruning a subtree never leaves a dangling reference. Removed nodes stay
//! in the arena, detached and marked removed, until [`ConfigTree::compact`]
//! drops them. Stores compact every tree they keep.
//!
//! # Node kinds
//!
//! - `Container`: singleton interior node, aligned across versions by name
//! - `Leaf`: singleton scalar, aligned by name
//! - `ListEntry`: YANG list entry, aligned by its key tuple (or by content when keyless)
//! - `LeafListEntry`: YANG leaf-list entry, aligned by its value
//!
//! Transient [`NodeFlags`] are only meaningful during diff/rebase and are never
//! serialized.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// Namespace-qualified node name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    /// Module (namespace) prefix, if qualified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Local name
    pub name: String,
}

impl QName {
    /// Qualified name `module:name`
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        QName {
            module: Some(module.into()),
            name: name.into(),
        }
    }

    /// Unqualified name
    pub fn local(name: impl Into<String>) -> Self {
        QName {
            module: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(m) => write!(f, "{}:{}", m, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for QName {
    /// Parses `module:name` or a bare `name`
    fn from(s: &str) -> Self {
        match s.split_once(':') {
            Some((m, n)) => QName::new(m, n),
            None => QName::local(s),
        }
    }
}

/// Stable index of a node within one [`ConfigTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Arena slot
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Structural role of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Singleton interior node
    Container,
    /// Singleton scalar
    Leaf,
    /// List entry identified by the values of its key leaves
    ListEntry {
        /// Names of the key leaves, in key order. Empty for keyless lists.
        keys: SmallVec<[String; 2]>,
    },
    /// Leaf-list entry identified by its value
    LeafListEntry,
}

impl NodeKind {
    /// Whether nodes of this kind carry a scalar body rather than children
    pub fn is_leaf_like(&self) -> bool {
        matches!(self, NodeKind::Leaf | NodeKind::LeafListEntry)
    }

    /// Same variant, ignoring key names
    pub fn same_variant(&self, other: &NodeKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Transient diff/rebase annotations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// Present only in the target version
    pub const ADDED: NodeFlags = NodeFlags(1 << 0);
    /// Present only in the source version
    pub const DELETED: NodeFlags = NodeFlags(1 << 1);
    /// Present in both versions with a different value, attributes or position
    pub const CHANGED: NodeFlags = NodeFlags(1 << 2);
    /// Value filled in from a schema default
    pub const DEFAULT: NodeFlags = NodeFlags(1 << 3);

    /// No flags set
    pub const fn empty() -> Self {
        NodeFlags(0)
    }

    /// Whether all bits of `other` are set
    pub fn contains(&self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: NodeFlags) {
        self.0 &= !other.0;
    }

    /// Whether no bit is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = NodeFlags;

    fn bitor(self, rhs: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 | rhs.0)
    }
}

/// One node of a [`ConfigTree`]
#[derive(Debug, Clone)]
pub struct Node {
    name: QName,
    kind: NodeKind,
    attrs: BTreeMap<String, String>,
    body: Option<String>,
    ordered_by_user: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    flags: NodeFlags,
    removed: bool,
}

impl Node {
    fn new(name: QName, kind: NodeKind) -> Self {
        Node {
            name,
            kind,
            attrs: BTreeMap::new(),
            body: None,
            ordered_by_user: false,
            parent: None,
            children: Vec::new(),
            flags: NodeFlags::empty(),
            removed: false,
        }
    }

    /// Copy of the node's own data, unlinked from any tree
    fn detached_copy(&self) -> Node {
        Node {
            name: self.name.clone(),
            kind: self.kind.clone(),
            attrs: self.attrs.clone(),
            body: self.body.clone(),
            ordered_by_user: self.ordered_by_user,
            parent: None,
            children: Vec::new(),
            flags: self.flags,
            removed: false,
        }
    }

    /// Qualified name
    pub fn name(&self) -> &QName {
        &self.name
    }

    /// Structural role
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Key leaf names for list entries, empty otherwise
    pub fn keys(&self) -> &[String] {
        match &self.kind {
            NodeKind::ListEntry { keys } => keys,
            _ => &[],
        }
    }

    /// Attributes, sorted by name
    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    /// Single attribute
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Scalar body in canonical serialized form
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Whether this entry belongs to an `ordered-by user` list
    pub fn is_ordered_by_user(&self) -> bool {
        self.ordered_by_user
    }

    /// Transient annotations
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Parent node, `None` for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in document order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Value and attributes match (children are not compared)
    pub fn same_content(&self, other: &Node) -> bool {
        self.body == other.body && self.attrs == other.attrs
    }
}

/// Where to place a node among its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    /// Before every existing sibling
    First,
    /// Right after the given sibling
    After(NodeId),
    /// After every existing sibling
    Last,
}

/// Order-normalized value of a subtree
///
/// Two subtrees are structurally equal iff their canonical forms are equal.
/// Children are sorted by name; within a name group, entries keep their
/// document order only when the group is `ordered-by user`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Canonical {
    name: QName,
    body: Option<String>,
    attrs: Vec<(String, String)>,
    children: Vec<Canonical>,
}

impl Canonical {
    /// Name of the subtree root
    pub fn name(&self) -> &QName {
        &self.name
    }
}

/// Rooted, ordered configuration tree
#[derive(Debug, Clone)]
pub struct ConfigTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigTree {
    /// Empty tree with the conventional `config` root container
    pub fn new() -> Self {
        Self::with_root(QName::local("config"), NodeKind::Container)
    }

    /// Tree whose root node has the given name and kind
    ///
    /// Fragments produced by [`ConfigTree::subtree`] are trees of this shape.
    pub fn with_root(name: QName, kind: NodeKind) -> Self {
        ConfigTree {
            nodes: vec![Node::new(name, kind)],
            root: NodeId(0),
        }
    }

    /// Root node id
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node by id
    ///
    /// # Panics
    ///
    /// Panics if `id` was not handed out by this tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Whether `id` belongs to this tree and has not been removed
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id.index()).map_or(false, |n| !n.removed)
    }

    /// Children of `id` in document order
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Parent of `id`
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.descendants(self.root).len()
    }

    /// Whether the root has no children
    pub fn is_empty(&self) -> bool {
        self.children(self.root).is_empty()
    }

    /// Arena slots in use, removed nodes included
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// Drop removed nodes from the arena
    ///
    /// Node ids handed out before compaction are invalid afterwards.
    pub fn compact(&mut self) {
        if self.nodes.iter().any(|n| n.removed) {
            *self = self.subtree(self.root);
        }
    }

    fn alloc(&mut self, mut node: Node, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        node.parent = parent;
        self.nodes.push(node);
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId, at: InsertAt) {
        let index = match at {
            InsertAt::First => 0,
            InsertAt::Last => self.node(parent).children.len(),
            InsertAt::After(sibling) => self
                .position(sibling)
                .filter(|_| self.node(sibling).parent == Some(parent))
                .map_or(self.node(parent).children.len(), |p| p + 1),
        };
        self.node_mut(parent).children.insert(index, child);
        self.node_mut(child).parent = Some(parent);
    }

    /// Append a child of the given kind
    pub fn add_child(&mut self, parent: NodeId, name: QName, kind: NodeKind) -> NodeId {
        let id = self.alloc(Node::new(name, kind), Some(parent));
        self.node_mut(parent).children.push(id);
        id
    }

    /// Append a container
    pub fn add_container(&mut self, parent: NodeId, name: impl Into<QName>) -> NodeId {
        self.add_child(parent, name.into(), NodeKind::Container)
    }

    /// Append a leaf with a body
    pub fn add_leaf(
        &mut self,
        parent: NodeId,
        name: impl Into<QName>,
        value: impl Into<String>,
    ) -> NodeId {
        let id = self.add_child(parent, name.into(), NodeKind::Leaf);
        self.node_mut(id).body = Some(value.into());
        id
    }

    /// Append a list entry declaring its key leaf names
    ///
    /// The key leaves themselves are added separately, or use
    /// [`ConfigTree::add_keyed_entry`].
    pub fn add_list_entry(&mut self, parent: NodeId, name: impl Into<QName>, keys: &[&str]) -> NodeId {
        let keys = keys.iter().map(|k| k.to_string()).collect();
        self.add_child(parent, name.into(), NodeKind::ListEntry { keys })
    }

    /// Append a list entry together with its key leaves
    pub fn add_keyed_entry(
        &mut self,
        parent: NodeId,
        name: impl Into<QName>,
        keys: &[(&str, &str)],
    ) -> NodeId {
        let names: Vec<&str> = keys.iter().map(|(k, _)| *k).collect();
        let entry = self.add_list_entry(parent, name, &names);
        for (k, v) in keys {
            self.add_leaf(entry, QName::local(*k), *v);
        }
        entry
    }

    /// Append a leaf-list entry
    pub fn add_leaf_list_entry(
        &mut self,
        parent: NodeId,
        name: impl Into<QName>,
        value: impl Into<String>,
    ) -> NodeId {
        let id = self.add_child(parent, name.into(), NodeKind::LeafListEntry);
        self.node_mut(id).body = Some(value.into());
        id
    }

    /// Replace the body
    pub fn set_body(&mut self, id: NodeId, body: Option<String>) {
        self.node_mut(id).body = body;
    }

    /// Set an attribute
    pub fn set_attr(&mut self, id: NodeId, name: impl Into<String>, value: impl Into<String>) {
        self.node_mut(id).attrs.insert(name.into(), value.into());
    }

    /// Replace the whole attribute set
    pub fn set_attrs(&mut self, id: NodeId, attrs: BTreeMap<String, String>) {
        self.node_mut(id).attrs = attrs;
    }

    /// Mark an entry as belonging to an `ordered-by user` list
    pub fn set_ordered_by_user(&mut self, id: NodeId, ordered: bool) {
        self.node_mut(id).ordered_by_user = ordered;
    }

    /// Add transient flags to a node
    pub fn mark(&mut self, id: NodeId, flags: NodeFlags) {
        self.node_mut(id).flags.insert(flags);
    }

    /// Remove transient flags from a node
    pub fn unmark(&mut self, id: NodeId, flags: NodeFlags) {
        self.node_mut(id).flags.remove(flags);
    }

    /// Clear transient flags on every node
    pub fn clear_flags(&mut self) {
        for node in &mut self.nodes {
            node.flags = NodeFlags::empty();
        }
    }

    /// First child with the given name
    pub fn child_by_name(&self, parent: NodeId, name: &QName) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.node(*c).name == *name)
    }

    /// Body of the first leaf child whose local name matches
    pub fn leaf_value(&self, parent: NodeId, local_name: &str) -> Option<&str> {
        self.children(parent)
            .iter()
            .map(|c| self.node(*c))
            .find(|n| n.kind == NodeKind::Leaf && n.name.name == local_name)
            .and_then(|n| n.body())
    }

    /// Index of `id` among its siblings
    pub fn position(&self, id: NodeId) -> Option<usize> {
        let parent = self.node(id).parent?;
        self.node(parent).children.iter().position(|c| *c == id)
    }

    /// Sibling directly before `id`
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.node(id).parent?;
        let pos = self.position(id)?;
        pos.checked_sub(1).map(|p| self.node(parent).children[p])
    }

    /// Detach a subtree. Returns false for the root or an already removed node.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.root || !self.contains(id) {
            return false;
        }
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|c| *c != id);
        }
        for d in self.descendants(id) {
            self.node_mut(d).removed = true;
        }
        true
    }

    /// Reposition `id` among its current siblings
    pub fn place(&mut self, id: NodeId, at: InsertAt) {
        let Some(parent) = self.node(id).parent else {
            return;
        };
        if at == InsertAt::After(id) {
            return;
        }
        self.node_mut(parent).children.retain(|c| *c != id);
        self.link(parent, id, at);
    }

    /// Pre-order list of `id` and everything below it
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children.iter().rev().copied());
        }
        out
    }

    /// Pre-order list of every live node
    pub fn preorder(&self) -> Vec<NodeId> {
        self.descendants(self.root)
    }

    /// Compact copy of the subtree rooted at `id`, as a standalone tree
    pub fn subtree(&self, id: NodeId) -> ConfigTree {
        let mut out = ConfigTree {
            nodes: vec![self.node(id).detached_copy()],
            root: NodeId(0),
        };
        let root = out.root;
        out.copy_children_from(self, id, root);
        out
    }

    fn copy_children_from(&mut self, src: &ConfigTree, from: NodeId, to: NodeId) {
        for &child in src.children(from) {
            let copy = self.alloc(src.node(child).detached_copy(), Some(to));
            self.node_mut(to).children.push(copy);
            self.copy_children_from(src, child, copy);
        }
    }

    /// Copy `fragment` (root included) under `parent`
    pub fn graft(&mut self, parent: NodeId, fragment: &ConfigTree, at: InsertAt) -> NodeId {
        let top = self.alloc(fragment.node(fragment.root).detached_copy(), None);
        self.link(parent, top, at);
        self.copy_children_from(fragment, fragment.root, top);
        top
    }

    /// Canonical form of the subtree at `id`
    pub fn canonical_of(&self, id: NodeId) -> Canonical {
        let node = self.node(id);
        let mut children: Vec<(bool, Canonical)> = node
            .children
            .iter()
            .map(|c| (self.node(*c).ordered_by_user, self.canonical_of(*c)))
            .collect();
        // stable: keeps document order inside each name group
        children.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        let mut start = 0;
        while start < children.len() {
            let mut end = start + 1;
            while end < children.len() && children[end].1.name == children[start].1.name {
                end += 1;
            }
            let group = &mut children[start..end];
            if !group.iter().any(|(ordered, _)| *ordered) {
                group.sort_by(|a, b| a.1.cmp(&b.1));
            }
            start = end;
        }
        Canonical {
            name: node.name.clone(),
            body: node.body.clone(),
            attrs: node
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            children: children.into_iter().map(|(_, c)| c).collect(),
        }
    }

    /// Canonical form of the whole tree
    pub fn canonical(&self) -> Canonical {
        self.canonical_of(self.root)
    }

    /// Equal values, ignoring sibling order outside `ordered-by user` groups
    /// and ignoring transient flags
    pub fn structurally_eq(&self, other: &ConfigTree) -> bool {
        self.canonical() == other.canonical()
    }

    /// Human-readable location built from names only; never fails
    pub fn describe(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == self.root {
                break;
            }
            names.push(self.node(n).name.to_string());
            cur = self.node(n).parent;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }
}
