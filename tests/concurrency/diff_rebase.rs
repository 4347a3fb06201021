//! Diff and Rebase Tests
//!
//! - Same leaf edited differently on both sides conflicts at exactly that leaf
//! - Convergent edits merge cleanly
//! - Deleting a subtree the other side edits conflicts at the subtree root
//! - Stored trees round-trip through the edit script

use proptest::prelude::*;

use crate::common::*;

fn base() -> ConfigTree {
    let mut tree = interfaces_tree(&["eth0", "eth1", "eth2"]);
    let root = tree.root();
    let system = tree.add_container(root, "system");
    tree.add_leaf(system, "hostname", "edge-1");
    tree
}

proptest! {
    #[test]
    fn divergent_leaf_edit_conflicts_at_that_leaf(
        which in 0usize..3,
        left_mtu in 1000u16..1500,
        right_mtu in 2000u16..3000,
        left_hostname in prop::option::of("[a-z]{1,8}"),
    ) {
        let name = ["eth0", "eth1", "eth2"][which];
        let base = base();
        let mut left = base.clone();
        set_mtu(&mut left, name, &left_mtu.to_string());
        if let Some(host) = &left_hostname {
            let system = left.child_by_name(left.root(), &QName::local("system")).unwrap();
            let leaf = left.child_by_name(system, &QName::local("hostname")).unwrap();
            left.set_body(leaf, Some(host.clone()));
        }
        let mut right = base.clone();
        set_mtu(&mut right, name, &right_mtu.to_string());

        let result = rebase(&base, &left, &right).unwrap();
        let conflicts: Vec<NodePath> = result.conflicts().unwrap().iter().cloned().collect();
        prop_assert_eq!(conflicts, vec![mtu_path(name)]);
    }
}

#[test]
fn identical_edits_merge_cleanly() {
    let base = base();
    let mut left = base.clone();
    set_mtu(&mut left, "eth1", "9000");
    add_interface_entry(&mut left, "eth3");
    let mut right = left.clone();
    set_mtu(&mut right, "eth2", "1400");

    match rebase(&base, &left, &right).unwrap() {
        RebaseResult::Clean(merged) => {
            assert!(merged.structurally_eq(&right));
        }
        RebaseResult::Conflict(paths) => panic!("unexpected conflicts {paths:?}"),
    }
}

#[test]
fn delete_against_inner_edit_conflicts_at_deleted_root() {
    let base = base();
    let mut left = base.clone();
    let eth1 = find_interface(&left, "eth1").unwrap();
    left.remove(eth1);
    let mut right = base.clone();
    set_mtu(&mut right, "eth1", "9000");
    set_mtu(&mut right, "eth0", "9000");

    let result = rebase(&base, &left, &right).unwrap();
    assert!(!result.is_clean());
    let conflicts: Vec<_> = result.conflicts().unwrap().iter().cloned().collect();
    assert_eq!(conflicts, vec![interface_path("eth1")]);
}

#[test]
fn disjoint_edits_merge_both() {
    let base = base();
    let mut left = base.clone();
    set_mtu(&mut left, "eth0", "9000");
    let mut right = base.clone();
    let eth2 = find_interface(&right, "eth2").unwrap();
    right.remove(eth2);

    let merged = rebase(&base, &left, &right).unwrap().merged().cloned().unwrap();
    let eth0 = find_interface(&merged, "eth0").unwrap();
    assert_eq!(merged.leaf_value(eth0, "mtu"), Some("9000"));
    assert!(find_interface(&merged, "eth2").is_none());
    assert!(find_interface(&merged, "eth1").is_some());
}

#[test]
fn edit_script_replays_against_base() {
    let base = base();
    let mut target = base.clone();
    set_mtu(&mut target, "eth0", "9000");
    let eth2 = find_interface(&target, "eth2").unwrap();
    target.remove(eth2);
    add_interface_entry(&mut target, "eth7");

    let cv = diff(&base, &target).unwrap();
    let script = cv.edit_script().unwrap();
    let ops: Vec<&str> = script.iter().map(Edit::op).collect();
    assert_eq!(ops, vec!["delete", "update", "insert"]);
    assert!(script.apply(&base).unwrap().structurally_eq(&target));
}

#[test]
fn duplicate_keys_are_a_precondition_error() {
    let mut bad = ConfigTree::new();
    add_interface_entry(&mut bad, "eth0");
    add_interface_entry(&mut bad, "eth0");

    let err = diff(&ConfigTree::new(), &bad).unwrap_err();
    assert!(err.is_internal());
    assert!(matches!(err, CfgdError::Precondition { .. }));
    assert!(rebase(&ConfigTree::new(), &bad, &ConfigTree::new()).is_err());
}

#[test]
fn trees_round_trip_through_json() {
    let tree = base();
    let json = serde_json::to_string(&tree).unwrap();
    let back: ConfigTree = serde_json::from_str(&json).unwrap();
    assert!(back.structurally_eq(&tree));
    assert!(diff(&tree, &back).unwrap().is_empty());
}
