//! Concurrency Integration Tests
//!
//! Tests for candidate locking, diff and three-way rebase.

#[path = "../common/mod.rs"]
mod common;

mod diff_rebase;
mod locking;
