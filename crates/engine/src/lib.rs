//! Configuration engine for cfgd
//!
//! This crate orchestrates the lower layers:
//! - EngineContext: tree initialization, sessions, locking, validate/commit
//! - Participants: modules taking part in transactions, and their registry
//! - Transaction coordination: the begin/validate/complete/commit lifecycle
//!   with reverse-order abort and revert
//! - Configuration via `cfgd.toml`
//!
//! The engine is the only component that knows about:
//! - Session identity and lock policy
//! - Cross-layer coordination (store + lock manager + diff + participants)
//! - The running-tree publish point

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod coordinator;
pub mod participant;
pub mod session;
pub mod transaction;

pub use context::{CommitOutcome, EngineConfig, EngineContext, StoreBackend, StoreConfig, CONFIG_FILE_NAME};
pub use coordinator::{RunRequest, TransactionCoordinator, TransactionMetrics, TransactionRecord, HISTORY_CAPACITY};
pub use participant::{Capabilities, Participant, ParticipantError, ParticipantRegistry, ParticipantResult};
pub use session::Session;
pub use transaction::{TransactionContext, TransactionKind, TransactionState, TxnArg};
