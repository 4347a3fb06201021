//! Core traits for tree storage abstraction
//!
//! This module defines the TreeStore trait that lets the engine swap
//! persistence backends (in-memory, flat files) without touching the
//! lock, diff, rebase or transaction layers.

use std::sync::Arc;

use crate::error::CfgdResult;
use crate::tree::ConfigTree;

/// Authoritative, currently active configuration
pub const RUNNING: &str = "running";
/// Working copy under edit
pub const CANDIDATE: &str = "candidate";
/// Configuration loaded at process start
pub const STARTUP: &str = "startup";
/// Snapshot of running taken when the candidate was last reset from it
pub const CANDIDATE_BASE: &str = "candidate-base";

/// Named, persisted configuration trees
///
/// Thread safety: all methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync). Trees are handed out as shared,
/// immutable snapshots; a reader holding an `Arc` from `get` keeps seeing that
/// version no matter what is published afterwards.
pub trait TreeStore: Send + Sync {
    /// Current version of a tree
    ///
    /// # Errors
    ///
    /// Returns `TreeNotFound` if no tree with that name exists.
    fn get(&self, name: &str) -> CfgdResult<Arc<ConfigTree>>;

    /// Create or replace a tree
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn put(&self, name: &str, tree: ConfigTree) -> CfgdResult<()>;

    /// Replace `dst` with the contents of `src`
    ///
    /// Must be atomic with respect to concurrent `get(dst)`: readers observe
    /// either the old or the new tree, never a partial one.
    ///
    /// # Errors
    ///
    /// Returns `TreeNotFound` if `src` does not exist.
    fn copy(&self, src: &str, dst: &str) -> CfgdResult<()>;

    /// Whether a tree exists
    fn exists(&self, name: &str) -> bool;

    /// Remove a tree
    ///
    /// # Errors
    ///
    /// Returns `TreeNotFound` if no tree with that name exists.
    fn delete(&self, name: &str) -> CfgdResult<()>;

    /// Names of all stored trees, sorted
    fn names(&self) -> CfgdResult<Vec<String>>;
}

impl<T: TreeStore + ?Sized> TreeStore for Arc<T> {
    fn get(&self, name: &str) -> CfgdResult<Arc<ConfigTree>> {
        (**self).get(name)
    }

    fn put(&self, name: &str, tree: ConfigTree) -> CfgdResult<()> {
        (**self).put(name, tree)
    }

    fn copy(&self, src: &str, dst: &str) -> CfgdResult<()> {
        (**self).copy(src, dst)
    }

    fn exists(&self, name: &str) -> bool {
        (**self).exists(name)
    }

    fn delete(&self, name: &str) -> CfgdResult<()> {
        (**self).delete(name)
    }

    fn names(&self) -> CfgdResult<Vec<String>> {
        (**self).names()
    }
}
