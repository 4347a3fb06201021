//! Three-way rebase of two edited versions over a common base
//!
//! Both sides are diffed against the base and turned into edit scripts.
//! Edits are grouped by the path they address:
//!
//! - a path touched by one side only takes that side's edits
//! - a path touched identically by both sides is applied once
//! - a path touched differently by both sides is a conflict
//! - deleting a subtree on one side while the other edits anything strictly
//!   inside it is a conflict at the deleted path
//!
//! When no conflict remains, left's edits then right's are replayed onto the
//! base. Identical inserts count as identical when their subtrees are
//! structurally equal; the left side's placement wins.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use cfgd_core::{Canonical, CfgdResult, ConfigTree, NodePath};

use crate::diff::{diff_with, DiffOptions};
use crate::edit::{Edit, EditScript};

/// Outcome of [`rebase`]
#[derive(Debug, Clone)]
pub enum RebaseResult {
    /// Both sides merged cleanly
    Clean(ConfigTree),
    /// Paths both sides edited incompatibly
    Conflict(BTreeSet<NodePath>),
}

impl RebaseResult {
    /// Whether the merge succeeded
    pub fn is_clean(&self) -> bool {
        matches!(self, RebaseResult::Clean(_))
    }

    /// Merged tree, if clean
    pub fn merged(&self) -> Option<&ConfigTree> {
        match self {
            RebaseResult::Clean(tree) => Some(tree),
            RebaseResult::Conflict(_) => None,
        }
    }

    /// Conflicting paths, if any
    pub fn conflicts(&self) -> Option<&BTreeSet<NodePath>> {
        match self {
            RebaseResult::Clean(_) => None,
            RebaseResult::Conflict(paths) => Some(paths),
        }
    }
}

/// Rebase with default diff options
pub fn rebase(base: &ConfigTree, left: &ConfigTree, right: &ConfigTree) -> CfgdResult<RebaseResult> {
    rebase_with(base, left, right, DiffOptions::default())
}

/// Merge the changes `base -> left` and `base -> right`
///
/// # Errors
///
/// Propagates `Precondition` from diffing malformed input.
pub fn rebase_with(
    base: &ConfigTree,
    left: &ConfigTree,
    right: &ConfigTree,
    options: DiffOptions,
) -> CfgdResult<RebaseResult> {
    let left_script = diff_with(base, left, options)?.edit_script()?;
    let right_script = diff_with(base, right, options)?.edit_script()?;
    let left_effects = effects(&left_script);
    let right_effects = effects(&right_script);

    let mut conflicts = BTreeSet::new();
    let mut agreed = BTreeSet::new();
    for (path, l) in &left_effects {
        if let Some(r) = right_effects.get(path) {
            if l == r {
                agreed.insert(*path);
            } else {
                conflicts.insert((*path).clone());
            }
        }
    }
    delete_conflicts(&left_effects, &right_effects, &mut conflicts);
    delete_conflicts(&right_effects, &left_effects, &mut conflicts);

    if !conflicts.is_empty() {
        info!(
            target: "cfgd::rebase",
            conflicts = conflicts.len(),
            first = %conflicts.iter().next().map(ToString::to_string).unwrap_or_default(),
            "Rebase conflict"
        );
        return Ok(RebaseResult::Conflict(conflicts));
    }

    let merged: EditScript = left_script
        .iter()
        .cloned()
        .chain(
            right_script
                .iter()
                .filter(|e| !agreed.contains(e.path()))
                .cloned(),
        )
        .collect();
    debug!(
        target: "cfgd::rebase",
        left = left_script.len(),
        right = right_script.len(),
        shared = agreed.len(),
        "Rebase merged"
    );
    Ok(RebaseResult::Clean(merged.apply(base)?))
}

/// What one side does to one path
#[derive(Debug, PartialEq, Eq)]
enum Effect<'a> {
    Delete,
    Update {
        body: &'a Option<String>,
        attrs: &'a BTreeMap<String, String>,
    },
    Insert(Canonical),
    Move(&'a Option<NodePath>),
}

impl Effect<'_> {
    fn is_delete(&self) -> bool {
        matches!(self, Effect::Delete)
    }
}

fn effects(script: &EditScript) -> BTreeMap<&NodePath, Vec<Effect<'_>>> {
    let mut out: BTreeMap<&NodePath, Vec<Effect<'_>>> = BTreeMap::new();
    for edit in script {
        let effect = match edit {
            Edit::Delete { .. } => Effect::Delete,
            Edit::Update { body, attrs, .. } => Effect::Update { body, attrs },
            Edit::Insert { fragment, .. } => Effect::Insert(fragment.canonical()),
            Edit::Move { after, .. } => Effect::Move(after),
        };
        out.entry(edit.path()).or_default().push(effect);
    }
    out
}

fn delete_conflicts(
    deleting: &BTreeMap<&NodePath, Vec<Effect<'_>>>,
    other: &BTreeMap<&NodePath, Vec<Effect<'_>>>,
    conflicts: &mut BTreeSet<NodePath>,
) {
    for (path, effects) in deleting {
        if !effects.iter().any(Effect::is_delete) {
            continue;
        }
        if other.keys().any(|p| p.is_descendant_of(path)) {
            conflicts.insert((*path).clone());
        }
    }
}
