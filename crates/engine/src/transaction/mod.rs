//! Per-run transaction state
//!
//! - `context`: the read-only handle participants receive
//! - `state`: the lifecycle state machine
//! - `lifecycle`: drives participants through the hooks and owns compensation

pub mod context;
pub(crate) mod lifecycle;
pub mod state;

pub use context::{TransactionContext, TransactionKind, TxnArg};
pub use state::TransactionState;
