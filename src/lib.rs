//! cfgd - transactional configuration tree engine
//!
//! cfgd holds named configuration trees (running, candidate, startup) and
//! promotes edits from the candidate into running through an ordered,
//! multi-participant commit with compensating rollback.
//!
//! # Quick Start
//!
//! ```ignore
//! use cfgd::{EngineConfig, EngineContext, ParticipantRegistry};
//!
//! let engine = EngineContext::from_config(EngineConfig::default(), ParticipantRegistry::new())?;
//! let session = engine.open_session();
//!
//! engine.lock(&session)?;
//! engine.edit_candidate(&session, |tree| {
//!     let root = tree.root();
//!     let ifs = tree.add_container(root, "interfaces");
//!     tree.add_keyed_entry(ifs, "interface", &[("name", "eth1")]);
//!     Ok(())
//! })?;
//! engine.commit(&session)?;
//! ```
//!
//! # Architecture
//!
//! - `cfgd-core`: the tree arena, node paths, errors and the `TreeStore` trait
//! - `cfgd-storage`: memory and file tree stores
//! - `cfgd-concurrency`: lock manager, diff, edit scripts, three-way rebase
//! - `cfgd-engine`: participants, the transaction coordinator and `EngineContext`

pub use cfgd_concurrency::{
    diff, diff_with, rebase, rebase_with, ChangeVector, DiffOptions, Edit, EditScript, LockInfo,
    LockManager, LockPolicy, RebaseResult,
};
pub use cfgd_core::{
    CfgdError, CfgdResult, ConfigTree, Discriminator, InsertAt, NodeFlags, NodeId, NodeKind, NodePath,
    PathSegment, Phase, QName, SessionId, TreeDocument, TreeStore, TxnId, CANDIDATE,
    CANDIDATE_BASE, RUNNING, STARTUP,
};
pub use cfgd_engine::{
    Capabilities, CommitOutcome, EngineConfig, EngineContext, Participant, ParticipantError,
    ParticipantRegistry, ParticipantResult, Session, StoreBackend, StoreConfig, TransactionContext,
    TransactionKind, TransactionMetrics, TransactionRecord, TransactionState, TxnArg,
    CONFIG_FILE_NAME,
};
pub use cfgd_storage::{FileTreeStore, MemoryTreeStore};
