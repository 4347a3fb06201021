//! Node paths: version-independent node identity
//!
//! A [`NodePath`] names a node by the chain of alignment keys from the root,
//! so the same entity has the same path in every version of a tree. Paths are
//! what diff, rebase and conflict reports speak in.
//!
//! Rendering follows instance-identifier conventions:
//!
//! ```text
//! /if:interfaces/if:interface[name='eth0']/if:mtu
//! /sys:dns/sys:server[.='8.8.8.8']
//! ```

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{CfgdError, CfgdResult};
use crate::tree::{ConfigTree, NodeId, NodeKind, QName};

/// What distinguishes a node from same-named siblings
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Discriminator {
    /// Containers and leaves: the name is unique among siblings
    Single,
    /// Keyed list entries: `(key name, key value)` in key order
    Keys(SmallVec<[(String, String); 2]>),
    /// Leaf-list entries: the value
    Value(String),
    /// Keyless list entries: canonical content of the whole entry
    Content(String),
}

/// One step of a [`NodePath`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    name: QName,
    discriminator: Discriminator,
}

impl PathSegment {
    /// Segment for a singleton container or leaf
    pub fn single(name: impl Into<QName>) -> Self {
        PathSegment {
            name: name.into(),
            discriminator: Discriminator::Single,
        }
    }

    /// Segment for a keyed list entry
    pub fn keyed(name: impl Into<QName>, keys: &[(&str, &str)]) -> Self {
        PathSegment {
            name: name.into(),
            discriminator: Discriminator::Keys(
                keys.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    /// Segment for a leaf-list entry
    pub fn value(name: impl Into<QName>, value: impl Into<String>) -> Self {
        PathSegment {
            name: name.into(),
            discriminator: Discriminator::Value(value.into()),
        }
    }

    /// Node name
    pub fn name(&self) -> &QName {
        &self.name
    }

    /// Sibling discriminator
    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match &self.discriminator {
            Discriminator::Single => Ok(()),
            Discriminator::Keys(keys) => {
                for (k, v) in keys {
                    write!(f, "[{}='{}']", k, v)?;
                }
                Ok(())
            }
            Discriminator::Value(v) => write!(f, "[.='{}']", v),
            Discriminator::Content(c) => {
                let mut h = DefaultHasher::new();
                c.hash(&mut h);
                write!(f, "[#{:08x}]", h.finish() as u32)
            }
        }
    }
}

/// Root-to-node chain of segments. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodePath(Vec<PathSegment>);

impl NodePath {
    /// Path of the root node
    pub fn root() -> Self {
        NodePath(Vec::new())
    }

    /// Path from explicit segments
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        NodePath(segments)
    }

    /// Segments from the root down
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Depth below the root
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root path
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Child path
    pub fn join(&self, segment: PathSegment) -> NodePath {
        let mut segments = self.0.clone();
        segments.push(segment);
        NodePath(segments)
    }

    /// Parent path, `None` for the root
    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            None
        } else {
            Some(NodePath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last segment, `None` for the root
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// `self` equals `ancestor` or lies below it
    pub fn starts_with(&self, ancestor: &NodePath) -> bool {
        self.0.len() >= ancestor.0.len() && self.0[..ancestor.0.len()] == ancestor.0[..]
    }

    /// `self` lies strictly below `ancestor`
    pub fn is_descendant_of(&self, ancestor: &NodePath) -> bool {
        self.0.len() > ancestor.0.len() && self.starts_with(ancestor)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl ConfigTree {
    /// Alignment key of `id` among its siblings
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if a keyed list entry lacks one of its key leaves.
    pub fn segment_of(&self, id: NodeId) -> CfgdResult<PathSegment> {
        let node = self.node(id);
        let discriminator = match node.kind() {
            NodeKind::Container | NodeKind::Leaf => Discriminator::Single,
            NodeKind::LeafListEntry => Discriminator::Value(node.body().unwrap_or_default().to_string()),
            NodeKind::ListEntry { keys } if keys.is_empty() => {
                Discriminator::Content(serde_json::to_string(&self.canonical_of(id))?)
            }
            NodeKind::ListEntry { keys } => {
                let mut pairs = SmallVec::new();
                for key in keys {
                    match self.leaf_value(id, key) {
                        Some(v) => pairs.push((key.clone(), v.to_string())),
                        None => {
                            return Err(CfgdError::precondition(
                                self.describe(id),
                                format!("list entry is missing key leaf '{}'", key),
                            ))
                        }
                    }
                }
                Discriminator::Keys(pairs)
            }
        };
        Ok(PathSegment {
            name: node.name().clone(),
            discriminator,
        })
    }

    /// Version-independent path of `id`
    pub fn path_of(&self, id: NodeId) -> CfgdResult<NodePath> {
        let mut segments = Vec::new();
        let mut cur = id;
        while cur != self.root() {
            segments.push(self.segment_of(cur)?);
            match self.parent(cur) {
                Some(p) => cur = p,
                None => {
                    return Err(CfgdError::precondition(
                        self.describe(id),
                        "node is detached from the tree",
                    ))
                }
            }
        }
        segments.reverse();
        Ok(NodePath(segments))
    }

    /// Child of `parent` matching `segment`
    pub fn find_child(&self, parent: NodeId, segment: &PathSegment) -> Option<NodeId> {
        self.children(parent).iter().copied().find(|c| {
            self.node(*c).name() == segment.name()
                && self
                    .segment_of(*c)
                    .map_or(false, |s| s.discriminator == segment.discriminator)
        })
    }

    /// Node at `path`, if present
    pub fn find(&self, path: &NodePath) -> Option<NodeId> {
        let mut cur = self.root();
        for segment in path.segments() {
            cur = self.find_child(cur, segment)?;
        }
        Some(cur)
    }
}
