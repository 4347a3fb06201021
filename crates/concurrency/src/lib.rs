//! Concurrency layer for cfgd
//!
//! This crate implements the pieces that let several sessions edit
//! configuration without trampling each other:
//! - LockManager: exclusive session-scoped tree locks
//! - diff: structural comparison producing a ChangeVector
//! - EditScript: path-addressed replay of a change
//! - rebase: three-way merge with conflict detection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod edit;
pub mod lock;
pub mod rebase;

pub use diff::{diff, diff_with, ChangeVector, DiffOptions};
pub use edit::{Edit, EditScript};
pub use lock::{LockInfo, LockManager, LockPolicy};
pub use rebase::{rebase, rebase_with, RebaseResult};
