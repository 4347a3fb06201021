//! Diff engine: structural comparison of two configuration trees
//!
//! Children are aligned level by level on their [`PathSegment`]: name plus
//! key values for list entries, value for leaf-list entries, whole content
//! for keyless list entries. Nodes of different kinds never pair.
//!
//! The result is a [`ChangeVector`] holding annotated copies of both inputs:
//! - `added`: subtree roots present only in the target (flag `ADDED`)
//! - `deleted`: subtree roots present only in the source (flag `DELETED`)
//! - `changed_source` / `changed_target`: parallel lists of paired nodes
//!   whose value or attributes differ, or whose position within an
//!   `ordered-by user` group changed (flag `CHANGED`)
//!
//! Lists are in document order of the tree the nodes belong to; changed
//! pairs follow target order. Inputs are never mutated.
//!
//! # Moves
//!
//! Within an `ordered-by user` group, entries on a longest common
//! subsequence of the two orders stay put; every other paired entry is a
//! move. Disable with [`DiffOptions::ordered_by_user_moves`] to ignore order.

use std::collections::{BTreeSet, VecDeque};
use std::mem::{discriminant, Discriminant};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error};

use cfgd_core::{
    CfgdError, CfgdResult, ConfigTree, Discriminator, NodeFlags, NodeId, NodeKind, NodePath,
    PathSegment, QName,
};

/// Knobs for [`diff_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Report position changes inside `ordered-by user` groups
    pub ordered_by_user_moves: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions {
            ordered_by_user_moves: true,
        }
    }
}

/// Annotated comparison of a source tree against a target tree
#[derive(Debug, Clone)]
pub struct ChangeVector {
    pub(crate) source: ConfigTree,
    pub(crate) target: ConfigTree,
    pub(crate) added: Vec<NodeId>,
    pub(crate) deleted: Vec<NodeId>,
    pub(crate) changed_source: Vec<NodeId>,
    pub(crate) changed_target: Vec<NodeId>,
    pub(crate) moved: Vec<NodeId>,
}

impl ChangeVector {
    /// Change vector of identical trees
    pub fn unchanged(tree: &ConfigTree) -> Self {
        ChangeVector {
            source: tree.clone(),
            target: tree.clone(),
            added: Vec::new(),
            deleted: Vec::new(),
            changed_source: Vec::new(),
            changed_target: Vec::new(),
            moved: Vec::new(),
        }
    }

    /// Annotated copy of the source tree
    pub fn source(&self) -> &ConfigTree {
        &self.source
    }

    /// Annotated copy of the target tree
    pub fn target(&self) -> &ConfigTree {
        &self.target
    }

    /// Target-side roots of added subtrees
    pub fn added(&self) -> &[NodeId] {
        &self.added
    }

    /// Source-side roots of deleted subtrees
    pub fn deleted(&self) -> &[NodeId] {
        &self.deleted
    }

    /// Source side of each changed pair
    pub fn changed_source(&self) -> &[NodeId] {
        &self.changed_source
    }

    /// Target side of each changed pair
    pub fn changed_target(&self) -> &[NodeId] {
        &self.changed_target
    }

    /// Target-side entries whose position in an `ordered-by user` group
    /// changed. Always a subset of `changed_target`.
    pub fn moved(&self) -> &[NodeId] {
        &self.moved
    }

    /// `(source, target)` pairs, in target order
    pub fn changed_pairs(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.changed_source
            .iter()
            .copied()
            .zip(self.changed_target.iter().copied())
    }

    /// No additions, deletions or changes
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.changed_target.is_empty()
    }

    /// Total number of reported nodes
    pub fn len(&self) -> usize {
        self.added.len() + self.deleted.len() + self.changed_target.len()
    }

    /// Paths of every node the change touches, whole subtrees excluded
    pub fn touched_paths(&self) -> CfgdResult<BTreeSet<NodePath>> {
        let mut out = BTreeSet::new();
        for &id in &self.added {
            out.insert(self.target.path_of(id)?);
        }
        for &id in &self.deleted {
            out.insert(self.source.path_of(id)?);
        }
        for &id in &self.changed_target {
            out.insert(self.target.path_of(id)?);
        }
        Ok(out)
    }

    /// Give up the annotated target tree
    pub fn into_target(self) -> ConfigTree {
        self.target
    }
}

/// Diff with default options
pub fn diff(source: &ConfigTree, target: &ConfigTree) -> CfgdResult<ChangeVector> {
    diff_with(source, target, DiffOptions::default())
}

/// Compare `source` against `target`
///
/// # Errors
///
/// Returns `Precondition` for malformed input: duplicate sibling keys or a
/// list entry missing a key leaf.
pub fn diff_with(
    source: &ConfigTree,
    target: &ConfigTree,
    options: DiffOptions,
) -> CfgdResult<ChangeVector> {
    let mut found = Found::default();
    let (s_root, t_root) = (source.root(), target.root());
    if !source.node(s_root).same_content(target.node(t_root)) {
        found.changed.push((s_root, t_root));
    }
    align(source, target, s_root, t_root, options, &mut found)?;

    let s_rank = rank(source);
    let t_rank = rank(target);
    found.added.sort_by_key(|id| t_rank.get(id).copied());
    found.deleted.sort_by_key(|id| s_rank.get(id).copied());
    found.changed.sort_by_key(|(_, t)| t_rank.get(t).copied());
    found.changed.dedup();
    found.moved.sort_by_key(|id| t_rank.get(id).copied());

    let mut cv = ChangeVector {
        source: source.clone(),
        target: target.clone(),
        added: found.added,
        deleted: found.deleted,
        changed_source: found.changed.iter().map(|(s, _)| *s).collect(),
        changed_target: found.changed.iter().map(|(_, t)| *t).collect(),
        moved: found.moved,
    };
    let diff_flags = NodeFlags::ADDED | NodeFlags::DELETED | NodeFlags::CHANGED;
    for id in cv.source.preorder() {
        cv.source.unmark(id, diff_flags);
    }
    for id in cv.target.preorder() {
        cv.target.unmark(id, diff_flags);
    }
    for &id in &cv.added {
        cv.target.mark(id, NodeFlags::ADDED);
    }
    for &id in &cv.deleted {
        cv.source.mark(id, NodeFlags::DELETED);
    }
    for i in 0..cv.changed_target.len() {
        cv.source.mark(cv.changed_source[i], NodeFlags::CHANGED);
        cv.target.mark(cv.changed_target[i], NodeFlags::CHANGED);
    }

    debug!(
        target: "cfgd::diff",
        added = cv.added.len(),
        deleted = cv.deleted.len(),
        changed = cv.changed_target.len(),
        moved = cv.moved.len(),
        "Diff computed"
    );
    Ok(cv)
}

#[derive(Default)]
struct Found {
    added: Vec<NodeId>,
    deleted: Vec<NodeId>,
    changed: Vec<(NodeId, NodeId)>,
    moved: Vec<NodeId>,
}

type PoolKey = (PathSegment, Discriminant<NodeKind>);

fn align(
    src: &ConfigTree,
    tgt: &ConfigTree,
    s_parent: NodeId,
    t_parent: NodeId,
    options: DiffOptions,
    found: &mut Found,
) -> CfgdResult<()> {
    let s_children = segments(src, s_parent)?;
    let t_children = segments(tgt, t_parent)?;

    // keyless entries can repeat, so each key maps to a queue
    let mut pool: FxHashMap<PoolKey, VecDeque<NodeId>> = FxHashMap::default();
    for (seg, id) in s_children.iter().cloned() {
        pool.entry((seg, discriminant(src.node(id).kind())))
            .or_default()
            .push_back(id);
    }

    let mut pairs = Vec::new();
    let mut paired = FxHashSet::default();
    for (seg, t) in t_children {
        let key = (seg, discriminant(tgt.node(t).kind()));
        match pool.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(s) => {
                paired.insert(s);
                pairs.push((s, t));
            }
            None => found.added.push(t),
        }
    }
    found
        .deleted
        .extend(s_children.iter().map(|(_, s)| *s).filter(|s| !paired.contains(s)));

    for &(s, t) in &pairs {
        if !src.node(s).same_content(tgt.node(t)) {
            found.changed.push((s, t));
        }
        if !src.node(s).kind().is_leaf_like() {
            align(src, tgt, s, t, options, found)?;
        }
    }
    if options.ordered_by_user_moves {
        detect_moves(src, tgt, &pairs, found);
    }
    Ok(())
}

fn segments(tree: &ConfigTree, parent: NodeId) -> CfgdResult<Vec<(PathSegment, NodeId)>> {
    let children = tree.children(parent);
    let mut out = Vec::with_capacity(children.len());
    let mut seen = FxHashSet::default();
    for &child in children {
        let seg = tree.segment_of(child).map_err(|e| {
            error!(target: "cfgd::diff", error = %e, "Malformed tree");
            e
        })?;
        let repeatable = matches!(seg.discriminator(), Discriminator::Content(_));
        if !repeatable && !seen.insert(seg.clone()) {
            let at = tree.describe(child);
            error!(target: "cfgd::diff", path = %at, segment = %seg, "Duplicate sibling key");
            return Err(CfgdError::precondition(
                at,
                format!("duplicate sibling '{}'", seg),
            ));
        }
        out.push((seg, child));
    }
    Ok(out)
}

fn detect_moves(src: &ConfigTree, tgt: &ConfigTree, pairs: &[(NodeId, NodeId)], found: &mut Found) {
    let mut groups: Vec<(&QName, Vec<(NodeId, NodeId)>)> = Vec::new();
    for &(s, t) in pairs {
        let node = tgt.node(t);
        if !node.is_ordered_by_user() {
            continue;
        }
        match groups.iter_mut().find(|(name, _)| *name == node.name()) {
            Some((_, group)) => group.push((s, t)),
            None => groups.push((node.name(), vec![(s, t)])),
        }
    }
    for (_, group) in groups {
        let order: Vec<usize> = group
            .iter()
            .map(|(s, _)| src.position(*s).unwrap_or(0))
            .collect();
        let stays = longest_increasing(&order);
        for (i, &(s, t)) in group.iter().enumerate() {
            if !stays[i] {
                found.moved.push(t);
                found.changed.push((s, t));
            }
        }
    }
}

/// Membership mask of one longest strictly increasing subsequence
fn longest_increasing(seq: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for i in 0..seq.len() {
        let pos = tails.partition_point(|&j| seq[j] < seq[i]);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }
    let mut keep = vec![false; seq.len()];
    let mut cur = tails.last().copied();
    while let Some(i) = cur {
        keep[i] = true;
        cur = prev[i];
    }
    keep
}

fn rank(tree: &ConfigTree) -> FxHashMap<NodeId, usize> {
    tree.preorder()
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect()
}
