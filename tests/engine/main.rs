//! Engine Integration Tests
//!
//! Tests for the transaction lifecycle driven through `EngineContext`.

#[path = "../common/mod.rs"]
mod common;

mod commit_flow;
mod config_file;
mod lifecycle;
