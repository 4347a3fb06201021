//! Per-run transaction handle given to participants
//!
//! Participants get a shared reference only: every accessor is read-only.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cfgd_concurrency::ChangeVector;
use cfgd_core::{ConfigTree, NodeId, SessionId, TxnId};

/// Opaque caller-supplied argument
pub type TxnArg = Arc<dyn Any + Send + Sync>;

/// Which lifecycle a run follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// begin, validate, complete, end
    Validate,
    /// The full lifecycle including the running swap
    Commit,
}

impl TransactionKind {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Validate => "validate",
            TransactionKind::Commit => "commit",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared with participants for one validate or commit run
pub struct TransactionContext {
    id: TxnId,
    kind: TransactionKind,
    session: SessionId,
    arg: Option<TxnArg>,
    changes: ChangeVector,
    started_at: DateTime<Utc>,
}

impl TransactionContext {
    pub(crate) fn new(
        id: TxnId,
        kind: TransactionKind,
        session: SessionId,
        arg: Option<TxnArg>,
        changes: ChangeVector,
    ) -> Self {
        TransactionContext {
            id,
            kind,
            session,
            arg,
            changes,
            started_at: Utc::now(),
        }
    }

    /// Transaction id
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Validate-only or full commit
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Session that requested the run
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Caller argument, if present and of type `T`
    pub fn arg<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.arg.as_deref().and_then(|a| a.downcast_ref::<T>())
    }

    /// Whether the caller passed an argument
    pub fn has_arg(&self) -> bool {
        self.arg.is_some()
    }

    /// Pre-change tree (running)
    pub fn source(&self) -> &ConfigTree {
        self.changes.source()
    }

    /// Post-change tree (candidate)
    pub fn target(&self) -> &ConfigTree {
        self.changes.target()
    }

    /// Roots of added subtrees, in the target tree
    pub fn added(&self) -> &[NodeId] {
        self.changes.added()
    }

    /// Roots of deleted subtrees, in the source tree
    pub fn deleted(&self) -> &[NodeId] {
        self.changes.deleted()
    }

    /// Source side of changed pairs
    pub fn changed_source(&self) -> &[NodeId] {
        self.changes.changed_source()
    }

    /// Target side of changed pairs
    pub fn changed_target(&self) -> &[NodeId] {
        self.changes.changed_target()
    }

    /// Full change vector
    pub fn changes(&self) -> &ChangeVector {
        &self.changes
    }

    /// When the run started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("session", &self.session)
            .field("has_arg", &self.arg.is_some())
            .field("changes", &self.changes.len())
            .finish()
    }
}
