//! Transaction participants and their registry
//!
//! A participant is a module that takes part in validate/commit runs. Every
//! lifecycle hook is optional: the trait provides no-op defaults, and a
//! participant advertises which hooks it implements through
//! [`Participant::capabilities`]. The coordinator only calls hooks that are
//! advertised.
//!
//! ## Registration
//!
//! Participants are registered once, before the engine opens:
//!
//! ```ignore
//! let mut registry = ParticipantRegistry::new();
//! registry.register(Arc::new(InterfaceModule::new()), 10)?;
//! registry.register(Arc::new(RoutingModule::new()), 20)?;
//! let engine = EngineContext::open(config, store, registry)?;
//! ```
//!
//! Lower `order_hint` runs first. Equal hints keep registration order.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use cfgd_core::{CfgdError, CfgdResult, Phase};

use crate::transaction::TransactionContext;

/// Failure reported by a participant hook
///
/// The message is surfaced to the frontend verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{message}", .path.as_deref().map(|p| format!("{}: ", p)).unwrap_or_default())]
pub struct ParticipantError {
    message: String,
    path: Option<String>,
}

impl ParticipantError {
    /// Failure with a message
    pub fn new(message: impl Into<String>) -> Self {
        ParticipantError {
            message: message.into(),
            path: None,
        }
    }

    /// Failure tied to a node path
    pub fn at(path: impl ToString, message: impl Into<String>) -> Self {
        ParticipantError {
            message: message.into(),
            path: Some(path.to_string()),
        }
    }

    /// The reported message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Offending node path, if the participant gave one
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// Result of a participant hook
pub type ParticipantResult = Result<(), ParticipantError>;

/// Set of lifecycle hooks a participant implements
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    /// `begin`
    pub const BEGIN: Capabilities = Capabilities(1 << 0);
    /// `validate`
    pub const VALIDATE: Capabilities = Capabilities(1 << 1);
    /// `complete`
    pub const COMPLETE: Capabilities = Capabilities(1 << 2);
    /// `commit`
    pub const COMMIT: Capabilities = Capabilities(1 << 3);
    /// `commit_done`
    pub const COMMIT_DONE: Capabilities = Capabilities(1 << 4);
    /// `end`
    pub const END: Capabilities = Capabilities(1 << 5);
    /// `abort`
    pub const ABORT: Capabilities = Capabilities(1 << 6);
    /// `revert`
    pub const REVERT: Capabilities = Capabilities(1 << 7);
    /// Every hook
    pub const ALL: Capabilities = Capabilities(0xff);
    /// Terminal and compensation hooks a commit-path participant must take
    pub const COMPENSATION: Capabilities = Capabilities(Self::END.0 | Self::ABORT.0 | Self::REVERT.0);

    /// No hooks
    pub const fn empty() -> Self {
        Capabilities(0)
    }

    /// Flag for one lifecycle phase
    pub const fn of(phase: Phase) -> Self {
        match phase {
            Phase::Begin => Self::BEGIN,
            Phase::Validate => Self::VALIDATE,
            Phase::Complete => Self::COMPLETE,
            Phase::Commit => Self::COMMIT,
            Phase::CommitDone => Self::COMMIT_DONE,
            Phase::End => Self::END,
            Phase::Abort => Self::ABORT,
            Phase::Revert => Self::REVERT,
        }
    }

    /// Union of two sets
    pub const fn union(self, other: Capabilities) -> Self {
        Capabilities(self.0 | other.0)
    }

    /// Whether every hook in `other` is present
    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the phase's hook is present
    pub const fn supports(self, phase: Phase) -> bool {
        self.contains(Self::of(phase))
    }

    /// Hooks in `self` that are not in `other`
    pub const fn difference(self, other: Capabilities) -> Self {
        Capabilities(self.0 & !other.0)
    }

    /// Whether any commit-path hook (`commit`, `commit_done`) is present
    pub const fn touches_commit(self) -> bool {
        self.0 & (Self::COMMIT.0 | Self::COMMIT_DONE.0) != 0
    }

    /// Compensation hooks a commit-path participant lacks; empty otherwise
    pub const fn missing_compensation(self) -> Self {
        if self.touches_commit() {
            Self::COMPENSATION.difference(self)
        } else {
            Self::empty()
        }
    }

    /// Whether no hook is present
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        self.union(rhs)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PHASES: [Phase; 8] = [
            Phase::Begin,
            Phase::Validate,
            Phase::Complete,
            Phase::Commit,
            Phase::CommitDone,
            Phase::End,
            Phase::Abort,
            Phase::Revert,
        ];
        f.debug_set()
            .entries(PHASES.iter().filter(|p| self.supports(**p)).map(Phase::as_str))
            .finish()
    }
}

/// A module taking part in transactions
///
/// Hooks receive a read-only view of the transaction and may only signal
/// failure. `abort`, `revert`, `commit_done` and `end` failures are logged
/// and otherwise ignored.
#[allow(unused_variables)]
pub trait Participant: Send + Sync {
    /// Unique name, used in logs and error reports
    fn name(&self) -> &str;

    /// Hooks this participant implements
    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    /// A transaction is starting
    fn begin(&self, txn: &TransactionContext) -> ParticipantResult {
        Ok(())
    }

    /// Check the target tree; failure aborts the transaction
    fn validate(&self, txn: &TransactionContext) -> ParticipantResult {
        Ok(())
    }

    /// Every participant validated successfully
    fn complete(&self, txn: &TransactionContext) -> ParticipantResult {
        Ok(())
    }

    /// Apply side effects
    fn commit(&self, txn: &TransactionContext) -> ParticipantResult {
        Ok(())
    }

    /// Running has been swapped to the target tree
    fn commit_done(&self, txn: &TransactionContext) -> ParticipantResult {
        Ok(())
    }

    /// The transaction finished without abort
    fn end(&self, txn: &TransactionContext) -> ParticipantResult {
        Ok(())
    }

    /// Undo anything prepared before commit
    fn abort(&self, txn: &TransactionContext) -> ParticipantResult {
        Ok(())
    }

    /// Compensate for a commit that already ran
    fn revert(&self, txn: &TransactionContext) -> ParticipantResult {
        Ok(())
    }
}

/// Call the hook for `phase`, if the participant advertises it
pub(crate) fn invoke(
    participant: &dyn Participant,
    phase: Phase,
    txn: &TransactionContext,
) -> ParticipantResult {
    if !participant.capabilities().supports(phase) {
        return Ok(());
    }
    debug!(target: "cfgd::txn", txn = %txn.id(), participant = participant.name(), %phase, "Calling participant");
    match phase {
        Phase::Begin => participant.begin(txn),
        Phase::Validate => participant.validate(txn),
        Phase::Complete => participant.complete(txn),
        Phase::Commit => participant.commit(txn),
        Phase::CommitDone => participant.commit_done(txn),
        Phase::End => participant.end(txn),
        Phase::Abort => participant.abort(txn),
        Phase::Revert => participant.revert(txn),
    }
}

struct Registered {
    participant: Arc<dyn Participant>,
    order_hint: i32,
}

/// Ordered set of participants, fixed once the engine opens
#[derive(Default)]
pub struct ParticipantRegistry {
    entries: Vec<Registered>,
}

impl ParticipantRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a participant with the same name is
    /// already registered, or if it has commit-path hooks without `end`,
    /// `abort` and `revert`.
    pub fn register(&mut self, participant: Arc<dyn Participant>, order_hint: i32) -> CfgdResult<()> {
        let name = participant.name().to_string();
        if self.entries.iter().any(|e| e.participant.name() == name) {
            return Err(CfgdError::InvalidConfig(format!(
                "participant '{}' is already registered",
                name
            )));
        }
        let missing = participant.capabilities().missing_compensation();
        if !missing.is_empty() {
            return Err(CfgdError::InvalidConfig(format!(
                "participant '{}' commits side effects but lacks {:?}",
                name, missing
            )));
        }
        let at = self.entries.partition_point(|e| e.order_hint <= order_hint);
        self.entries.insert(
            at,
            Registered {
                participant,
                order_hint,
            },
        );
        debug!(target: "cfgd::txn", participant = %name, order_hint, position = at, "Participant registered");
        Ok(())
    }

    /// Participants in call order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn Participant>> + ExactSizeIterator {
        self.entries.iter().map(|e| &e.participant)
    }

    /// Names in call order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.participant.name()).collect()
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no participant is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ParticipantRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantRegistry")
            .field("participants", &self.names())
            .finish()
    }
}
