//! MemoryTreeStore: in-memory tree store
//!
//! This module implements the TreeStore trait using:
//! - `FxHashMap<String, Arc<ConfigTree>>` for named trees
//! - `parking_lot::RwLock` for thread-safe access
//!
//! # Design Notes
//!
//! - **Snapshot reads**: `get` hands out an `Arc`, so a reader keeps its
//!   version even if the tree is replaced concurrently
//! - **Atomic copy**: `copy` swaps the destination `Arc` under the write lock;
//!   readers see the old or the new tree, never a mix
//! - **No persistence**: contents are lost when the process exits

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use cfgd_core::{CfgdError, CfgdResult, ConfigTree, TreeStore};

/// In-memory store backed by a single `RwLock`-protected map
#[derive(Debug, Default)]
pub struct MemoryTreeStore {
    trees: RwLock<FxHashMap<String, Arc<ConfigTree>>>,
}

impl MemoryTreeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored trees
    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    /// Whether no tree is stored
    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }
}

impl TreeStore for MemoryTreeStore {
    fn get(&self, name: &str) -> CfgdResult<Arc<ConfigTree>> {
        self.trees
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CfgdError::TreeNotFound(name.to_string()))
    }

    fn put(&self, name: &str, mut tree: ConfigTree) -> CfgdResult<()> {
        tree.clear_flags();
        tree.compact();
        self.trees.write().insert(name.to_string(), Arc::new(tree));
        debug!(target: "cfgd::store", tree = name, "Tree stored");
        Ok(())
    }

    fn copy(&self, src: &str, dst: &str) -> CfgdResult<()> {
        let mut trees = self.trees.write();
        let tree = trees
            .get(src)
            .cloned()
            .ok_or_else(|| CfgdError::TreeNotFound(src.to_string()))?;
        trees.insert(dst.to_string(), tree);
        debug!(target: "cfgd::store", src, dst, "Tree copied");
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.trees.read().contains_key(name)
    }

    fn delete(&self, name: &str) -> CfgdResult<()> {
        self.trees
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CfgdError::TreeNotFound(name.to_string()))
    }

    fn names(&self) -> CfgdResult<Vec<String>> {
        let mut names: Vec<String> = self.trees.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
