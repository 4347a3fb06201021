//! Transaction lifecycle states
//!
//! ```text
//! Idle -> Begun -> Validated -> Completed -> Committed -> Done
//!                                    \-------------------> Done   (validate-only)
//! Begun | Validated | Completed | Committed -> Aborting -> Aborted
//! ```

use std::fmt;

use cfgd_core::{CfgdError, CfgdResult};

/// Where a run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created, no participant called yet
    Idle,
    /// `begin` sent to every participant
    Begun,
    /// Every participant validated
    Validated,
    /// Every participant completed
    Completed,
    /// Every participant committed and running was swapped
    Committed,
    /// Finished successfully
    Done,
    /// Compensation in progress
    Aborting,
    /// Finished unsuccessfully
    Aborted,
}

impl TransactionState {
    /// `Done` or `Aborted`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Done | TransactionState::Aborted)
    }

    /// Whether `next` is a legal successor
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Idle, Begun)
                | (Begun, Validated)
                | (Validated, Completed)
                | (Completed, Committed)
                | (Completed, Done)
                | (Committed, Done)
                | (Begun | Validated | Completed | Committed, Aborting)
                | (Aborting, Aborted)
        )
    }

    /// Checked transition
    ///
    /// # Errors
    ///
    /// Returns `Internal` for an illegal transition.
    pub fn transition(self, next: TransactionState) -> CfgdResult<TransactionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CfgdError::internal(format!(
                "illegal transaction state transition {} -> {}",
                self, next
            )))
        }
    }

    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Idle => "idle",
            TransactionState::Begun => "begun",
            TransactionState::Validated => "validated",
            TransactionState::Completed => "completed",
            TransactionState::Committed => "committed",
            TransactionState::Done => "done",
            TransactionState::Aborting => "aborting",
            TransactionState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
