//! Edit scripts: path-addressed, replayable forms of a change vector
//!
//! A [`ChangeVector`] refers to nodes by arena id, which only makes sense
//! against the two trees it was computed from. An [`EditScript`] refers to
//! nodes by [`NodePath`] instead, so it can be replayed onto any tree that
//! still contains the addressed nodes. The rebase engine relies on this.
//!
//! Application order is fixed: deletes, then updates, then inserts and moves
//! in target document order. Each insert or move carries an `after` anchor
//! (its preceding sibling in the target); a missing anchor falls back to the
//! end of the parent.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashSet;
use tracing::trace;

use cfgd_core::{CfgdError, CfgdResult, ConfigTree, Discriminator, InsertAt, NodeId, NodePath};

use crate::diff::ChangeVector;

/// One step of an [`EditScript`]
#[derive(Debug, Clone)]
pub enum Edit {
    /// Remove the subtree at `path`
    Delete {
        /// Subtree root
        path: NodePath,
    },
    /// Replace the value and attributes of the node at `path`
    Update {
        /// Updated node
        path: NodePath,
        /// New body
        body: Option<String>,
        /// New attribute set
        attrs: BTreeMap<String, String>,
    },
    /// Graft `fragment` so that it ends up at `path`
    Insert {
        /// Path of the inserted subtree root
        path: NodePath,
        /// Preceding sibling, `None` for first position
        after: Option<NodePath>,
        /// Subtree to insert
        fragment: ConfigTree,
    },
    /// Reposition the node at `path` among its siblings
    Move {
        /// Moved node
        path: NodePath,
        /// Preceding sibling, `None` for first position
        after: Option<NodePath>,
    },
}

impl Edit {
    /// Path of the node this edit addresses
    pub fn path(&self) -> &NodePath {
        match self {
            Edit::Delete { path }
            | Edit::Update { path, .. }
            | Edit::Insert { path, .. }
            | Edit::Move { path, .. } => path,
        }
    }

    /// Short operation name
    pub fn op(&self) -> &'static str {
        match self {
            Edit::Delete { .. } => "delete",
            Edit::Update { .. } => "update",
            Edit::Insert { .. } => "insert",
            Edit::Move { .. } => "move",
        }
    }

    fn stage(&self) -> u8 {
        match self {
            Edit::Delete { .. } => 0,
            Edit::Update { .. } => 1,
            Edit::Insert { .. } | Edit::Move { .. } => 2,
        }
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op(), self.path())?;
        match self {
            Edit::Insert { after: Some(a), .. } | Edit::Move { after: Some(a), .. } => {
                write!(f, " after {}", a)
            }
            _ => Ok(()),
        }
    }
}

/// Ordered list of edits
#[derive(Debug, Clone, Default)]
pub struct EditScript {
    edits: Vec<Edit>,
}

impl EditScript {
    /// Script from edits already in application order
    pub fn new(edits: Vec<Edit>) -> Self {
        EditScript { edits }
    }

    /// The edits
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    /// Number of edits
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    /// Whether the script is a no-op
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Iterate over the edits
    pub fn iter(&self) -> std::slice::Iter<'_, Edit> {
        self.edits.iter()
    }

    /// Apply to a copy of `base`
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if an addressed node (or the parent of an
    /// inserted one) is missing.
    pub fn apply(&self, base: &ConfigTree) -> CfgdResult<ConfigTree> {
        let mut out = base.subtree(base.root());
        out.clear_flags();
        self.apply_to(&mut out)?;
        out.compact();
        Ok(out)
    }

    /// Apply in place
    ///
    /// On error the tree may be partially edited.
    pub fn apply_to(&self, tree: &mut ConfigTree) -> CfgdResult<()> {
        for stage in 0..3 {
            for edit in self.edits.iter().filter(|e| e.stage() == stage) {
                trace!(target: "cfgd::diff", edit = %edit, "Applying edit");
                apply_one(tree, edit)?;
            }
        }
        Ok(())
    }
}

impl FromIterator<Edit> for EditScript {
    fn from_iter<I: IntoIterator<Item = Edit>>(iter: I) -> Self {
        EditScript::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a EditScript {
    type Item = &'a Edit;
    type IntoIter = std::slice::Iter<'a, Edit>;

    fn into_iter(self) -> Self::IntoIter {
        self.edits.iter()
    }
}

fn locate(tree: &ConfigTree, path: &NodePath) -> CfgdResult<NodeId> {
    tree.find(path)
        .ok_or_else(|| CfgdError::precondition(path, "no such node"))
}

fn anchor_position(tree: &ConfigTree, parent: NodeId, after: &Option<NodePath>) -> InsertAt {
    match after {
        None => InsertAt::First,
        Some(a) => match tree.find(a) {
            Some(sibling) if tree.parent(sibling) == Some(parent) => InsertAt::After(sibling),
            _ => InsertAt::Last,
        },
    }
}

fn apply_one(tree: &mut ConfigTree, edit: &Edit) -> CfgdResult<()> {
    match edit {
        Edit::Delete { path } => {
            let id = locate(tree, path)?;
            if !tree.remove(id) {
                return Err(CfgdError::precondition(path, "cannot delete the root"));
            }
        }
        Edit::Update { path, body, attrs } => {
            let id = locate(tree, path)?;
            tree.set_body(id, body.clone());
            tree.set_attrs(id, attrs.clone());
        }
        Edit::Insert {
            path,
            after,
            fragment,
        } => {
            let parent_path = path
                .parent()
                .ok_or_else(|| CfgdError::precondition(path, "cannot insert the root"))?;
            let parent = locate(tree, &parent_path)?;
            let repeatable = matches!(
                path.last().map(|s| s.discriminator()),
                Some(Discriminator::Content(_))
            );
            if !repeatable && tree.find(path).is_some() {
                return Err(CfgdError::precondition(path, "node already exists"));
            }
            let at = anchor_position(tree, parent, after);
            tree.graft(parent, fragment, at);
        }
        Edit::Move { path, after } => {
            let id = locate(tree, path)?;
            let parent = tree
                .parent(id)
                .ok_or_else(|| CfgdError::precondition(path, "cannot move the root"))?;
            let at = anchor_position(tree, parent, after);
            tree.place(id, at);
        }
    }
    Ok(())
}

/// Preceding sibling of `id` in its own `ordered-by user` group, or any
/// preceding sibling for other nodes
fn anchor_of(tree: &ConfigTree, id: NodeId) -> CfgdResult<Option<NodePath>> {
    let Some(parent) = tree.parent(id) else {
        return Ok(None);
    };
    let node = tree.node(id);
    let pos = tree.position(id).unwrap_or(0);
    tree.children(parent)[..pos]
        .iter()
        .rev()
        .copied()
        .find(|s| !node.is_ordered_by_user() || tree.node(*s).name() == node.name())
        .map(|s| tree.path_of(s))
        .transpose()
}

impl ChangeVector {
    /// Path-addressed form of this change
    ///
    /// Applying the script to the source yields a tree structurally equal to
    /// the target.
    pub fn edit_script(&self) -> CfgdResult<EditScript> {
        let (src, tgt) = (&self.source, &self.target);
        let mut edits = Vec::with_capacity(self.len());

        for &id in &self.deleted {
            edits.push(Edit::Delete {
                path: src.path_of(id)?,
            });
        }
        for (s, t) in self.changed_pairs() {
            let (sn, tn) = (src.node(s), tgt.node(t));
            if !sn.same_content(tn) {
                edits.push(Edit::Update {
                    path: src.path_of(s)?,
                    body: tn.body().map(str::to_owned),
                    attrs: tn.attrs().clone(),
                });
            }
        }

        let added: FxHashSet<NodeId> = self.added.iter().copied().collect();
        let moved: FxHashSet<NodeId> = self.moved.iter().copied().collect();
        if !added.is_empty() || !moved.is_empty() {
            for id in tgt.preorder() {
                if added.contains(&id) {
                    edits.push(Edit::Insert {
                        path: tgt.path_of(id)?,
                        after: anchor_of(tgt, id)?,
                        fragment: tgt.subtree(id),
                    });
                } else if moved.contains(&id) {
                    edits.push(Edit::Move {
                        path: tgt.path_of(id)?,
                        after: anchor_of(tgt, id)?,
                    });
                }
            }
        }
        Ok(EditScript::new(edits))
    }

    /// Replay this change onto `base`
    pub fn apply(&self, base: &ConfigTree) -> CfgdResult<ConfigTree> {
        self.edit_script()?.apply(base)
    }
}
