//! Nested, serializable form of a [`ConfigTree`]
//!
//! The arena representation is an in-memory concern; stores and fixtures use
//! this nested document instead. Transient flags are not serialized.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::tree::{ConfigTree, InsertAt, NodeId, NodeKind, QName};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Node kind tag in document form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocKind {
    /// Singleton interior node
    #[default]
    Container,
    /// Singleton scalar
    Leaf,
    /// List entry
    ListEntry,
    /// Leaf-list entry
    LeafListEntry,
}

impl DocKind {
    fn is_container(&self) -> bool {
        *self == DocKind::Container
    }
}

/// One node and its subtree in nested form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDocument {
    /// Module prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Local name
    pub name: String,
    /// Structural role, omitted for containers
    #[serde(default, skip_serializing_if = "DocKind::is_container")]
    pub kind: DocKind,
    /// Key leaf names of a list entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    /// Scalar body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Entry of an `ordered-by user` list
    #[serde(default, skip_serializing_if = "is_false")]
    pub ordered_by_user: bool,
    /// Children in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeDocument>,
}

impl TreeDocument {
    fn qname(&self) -> QName {
        QName {
            module: self.module.clone(),
            name: self.name.clone(),
        }
    }

    fn node_kind(&self) -> NodeKind {
        match self.kind {
            DocKind::Container => NodeKind::Container,
            DocKind::Leaf => NodeKind::Leaf,
            DocKind::ListEntry => NodeKind::ListEntry {
                keys: self.keys.iter().cloned().collect(),
            },
            DocKind::LeafListEntry => NodeKind::LeafListEntry,
        }
    }
}

impl ConfigTree {
    /// Nested document of the whole tree
    pub fn to_document(&self) -> TreeDocument {
        self.document_of(self.root())
    }

    /// Nested document of the subtree at `id`
    pub fn document_of(&self, id: NodeId) -> TreeDocument {
        let node = self.node(id);
        let (kind, keys) = match node.kind() {
            NodeKind::Container => (DocKind::Container, Vec::new()),
            NodeKind::Leaf => (DocKind::Leaf, Vec::new()),
            NodeKind::ListEntry { keys } => (DocKind::ListEntry, keys.to_vec()),
            NodeKind::LeafListEntry => (DocKind::LeafListEntry, Vec::new()),
        };
        TreeDocument {
            module: node.name().module.clone(),
            name: node.name().name.clone(),
            kind,
            keys,
            attrs: node.attrs().clone(),
            body: node.body().map(str::to_string),
            ordered_by_user: node.is_ordered_by_user(),
            children: node.children().iter().map(|c| self.document_of(*c)).collect(),
        }
    }

    /// Build a tree from a nested document
    pub fn from_document(doc: &TreeDocument) -> ConfigTree {
        let mut tree = ConfigTree::with_root(doc.qname(), doc.node_kind());
        let root = tree.root();
        tree.fill_from_document(root, doc);
        tree
    }

    fn fill_from_document(&mut self, id: NodeId, doc: &TreeDocument) {
        self.set_attrs(id, doc.attrs.clone());
        self.set_body(id, doc.body.clone());
        self.set_ordered_by_user(id, doc.ordered_by_user);
        for child in &doc.children {
            let cid = self.add_child(id, child.qname(), child.node_kind());
            self.fill_from_document(cid, child);
        }
    }

    /// Graft a document under `parent`
    pub fn graft_document(&mut self, parent: NodeId, doc: &TreeDocument) -> NodeId {
        self.graft(parent, &ConfigTree::from_document(doc), InsertAt::Last)
    }
}

impl Serialize for ConfigTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let doc = TreeDocument::deserialize(deserializer)?;
        Ok(ConfigTree::from_document(&doc))
    }
}
