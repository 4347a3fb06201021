//! Tree store implementations for cfgd
//!
//! This crate provides the TreeStore backends:
//! - MemoryTreeStore: `RwLock`-protected map of shared trees
//! - FileTreeStore: one JSON document per tree, published by atomic rename

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod file;
pub mod memory;

pub use file::FileTreeStore;
pub use memory::MemoryTreeStore;
