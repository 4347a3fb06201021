//! Error types for cfgd
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! The variants fall into four classes that frontends render differently:
//! - lock contention (recoverable, nothing changed)
//! - internal errors (structural preconditions, storage, illegal lifecycle transitions)
//! - participant business failures ("your configuration is invalid")
//! - commit failures, where side effects may already exist in external systems

use std::io;

use thiserror::Error;

use crate::path::NodePath;
use crate::types::{SessionId, TxnId};

/// Result type alias for cfgd operations
pub type CfgdResult<T> = std::result::Result<T, CfgdError>;

/// Lifecycle hook in which a participant reported a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Transaction begin
    Begin,
    /// Validation of the target tree
    Validate,
    /// Agreement that the commit would succeed
    Complete,
    /// Side-effecting commit
    Commit,
    /// Post-swap notification
    CommitDone,
    /// Terminal notification
    End,
    /// Compensation after a validate/complete failure
    Abort,
    /// Compensation after a commit failure
    Revert,
}

impl Phase {
    /// Lower-case hook name, as used in logs and traces
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Begin => "begin",
            Phase::Validate => "validate",
            Phase::Complete => "complete",
            Phase::Commit => "commit",
            Phase::CommitDone => "commit_done",
            Phase::End => "end",
            Phase::Abort => "abort",
            Phase::Revert => "revert",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for the configuration engine
#[derive(Debug, Error)]
pub enum CfgdError {
    /// Another session holds the lock
    #[error("{tree} is locked by session {holder}")]
    AlreadyLocked {
        /// Name of the locked tree
        tree: String,
        /// Current lock holder
        holder: SessionId,
    },

    /// Waited for the lock and gave up
    #[error("timed out waiting for lock on {tree} held by session {holder}")]
    LockTimeout {
        /// Name of the locked tree
        tree: String,
        /// Lock holder when the wait expired
        holder: SessionId,
    },

    /// Release or commit attempted on an unlocked tree
    #[error("{tree} is not locked")]
    NotLocked {
        /// Name of the tree
        tree: String,
    },

    /// Release or commit attempted by a session that does not hold the lock
    #[error("session {requester} does not hold the lock on {tree} (held by {holder})")]
    NotHolder {
        /// Name of the tree
        tree: String,
        /// Current lock holder
        holder: SessionId,
        /// Session that made the request
        requester: SessionId,
    },

    /// The tree is being written by a running transaction
    #[error("{tree} is in use by transaction {txn}")]
    TransactionInFlight {
        /// Name of the tree
        tree: String,
        /// Transaction running for the session
        txn: TxnId,
    },

    /// Malformed tree (duplicate list keys, missing key leaf, unknown path)
    #[error("precondition violated at {path}: {detail}")]
    Precondition {
        /// Rendered path of the offending node
        path: String,
        /// What was wrong
        detail: String,
    },

    /// A participant rejected the transaction before commit started
    #[error("{participant} failed in {phase}: {message}")]
    ParticipantFailed {
        /// Name of the failing participant
        participant: String,
        /// Hook that failed
        phase: Phase,
        /// Message reported by the participant, verbatim
        message: String,
    },

    /// A participant failed during commit; earlier participants were asked to revert
    #[error("{participant} failed in commit: {message} (reverted: [{}])", .reverted.join(", "))]
    CommitFailed {
        /// Name of the failing participant
        participant: String,
        /// Message reported by the participant, verbatim
        message: String,
        /// Participants asked to revert, in the order they were asked
        reverted: Vec<String>,
        /// Subset of `reverted` whose revert hook itself reported failure
        revert_failed: Vec<String>,
    },

    /// Running moved on since the candidate was forked and the edits diverge
    #[error("candidate conflicts with running at {} path(s)", .paths.len())]
    RebaseConflict {
        /// Divergently edited paths
        paths: Vec<NodePath>,
    },

    /// Named tree does not exist in the store
    #[error("tree not found: {0}")]
    TreeNotFound(String),

    /// Storage layer error
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration or registration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine bug or illegal state transition
    #[error("internal error: {0}")]
    Internal(String),
}

impl CfgdError {
    /// Build a precondition error from a path and detail
    pub fn precondition(path: impl ToString, detail: impl Into<String>) -> Self {
        CfgdError::Precondition {
            path: path.to_string(),
            detail: detail.into(),
        }
    }

    /// Build an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        CfgdError::Internal(msg.into())
    }

    /// Build a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        CfgdError::Storage(msg.into())
    }

    /// Lock contention: recoverable, no state changed
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self,
            CfgdError::AlreadyLocked { .. }
                | CfgdError::LockTimeout { .. }
                | CfgdError::NotLocked { .. }
                | CfgdError::NotHolder { .. }
                | CfgdError::TransactionInFlight { .. }
        )
    }

    /// Business-logic rejection the end user can fix by editing the candidate
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CfgdError::ParticipantFailed { .. } | CfgdError::RebaseConflict { .. }
        )
    }

    /// Engine or storage failure, rendered as an internal error
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CfgdError::Precondition { .. }
                | CfgdError::Internal(_)
                | CfgdError::Storage(_)
                | CfgdError::Io(_)
                | CfgdError::Serialization(_)
        )
    }

    /// Name of the participant the error originated from, if any
    pub fn participant(&self) -> Option<&str> {
        match self {
            CfgdError::ParticipantFailed { participant, .. }
            | CfgdError::CommitFailed { participant, .. } => Some(participant),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CfgdError {
    fn from(e: serde_json::Error) -> Self {
        CfgdError::Serialization(e.to_string())
    }
}
