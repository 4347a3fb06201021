//! Core types and traits for cfgd
//!
//! This crate defines the foundational types used throughout the system:
//! - ConfigTree: arena-backed, ordered configuration tree
//! - NodePath: version-independent node identity used by diff and rebase
//! - TreeDocument: nested serializable form of a tree
//! - SessionId / TxnId: session and transaction identifiers
//! - CfgdError: error type hierarchy
//! - TreeStore: named tree persistence contract

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod path;
pub mod traits;
pub mod tree;
pub mod types;

pub use document::{DocKind, TreeDocument};
pub use error::{CfgdError, CfgdResult, Phase};
pub use path::{Discriminator, NodePath, PathSegment};
pub use traits::{TreeStore, CANDIDATE, CANDIDATE_BASE, RUNNING, STARTUP};
pub use tree::{Canonical, ConfigTree, InsertAt, Node, NodeFlags, NodeId, NodeKind, QName};
pub use types::{SessionId, TxnId};
