//! Drives one transaction through the participant lifecycle
//!
//! [`Lifecycle`] owns the bookkeeping needed for compensation: how many
//! participants were sent `begin`, and how many committed. Every failure path
//! runs its compensation before returning, and the `Drop` impl finishes any
//! run that is left mid-way (early return on an internal error, or a panic
//! in a participant), so a begun participant always gets a terminal call.
//!
//! Compensation order is always the reverse of call order.

use tracing::{error, warn};

use cfgd_core::{CfgdError, CfgdResult, Phase};

use crate::participant::{invoke, ParticipantRegistry};
use crate::transaction::{TransactionContext, TransactionState};

pub(crate) struct Lifecycle<'a> {
    ctx: &'a TransactionContext,
    participants: &'a ParticipantRegistry,
    state: TransactionState,
    begun: usize,
    committed: usize,
    reverted: bool,
}

impl<'a> Lifecycle<'a> {
    pub(crate) fn new(ctx: &'a TransactionContext, participants: &'a ParticipantRegistry) -> Self {
        Lifecycle {
            ctx,
            participants,
            state: TransactionState::Idle,
            begun: 0,
            committed: 0,
            reverted: false,
        }
    }

    pub(crate) fn ctx(&self) -> &'a TransactionContext {
        self.ctx
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether commit side effects had to be compensated
    pub(crate) fn reverted(&self) -> bool {
        self.reverted
    }

    fn advance(&mut self, next: TransactionState) -> CfgdResult<()> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    pub(crate) fn begin(&mut self) -> CfgdResult<()> {
        self.advance(TransactionState::Begun)?;
        let participants = self.participants;
        for (i, p) in participants.iter().enumerate() {
            self.begun = i + 1;
            if let Err(e) = invoke(p.as_ref(), Phase::Begin, self.ctx) {
                return Err(self.fail(p.name(), Phase::Begin, e.to_string()));
            }
        }
        Ok(())
    }

    pub(crate) fn validate(&mut self) -> CfgdResult<()> {
        self.forward(Phase::Validate)?;
        self.advance(TransactionState::Validated)
    }

    pub(crate) fn complete(&mut self) -> CfgdResult<()> {
        self.forward(Phase::Complete)?;
        self.advance(TransactionState::Completed)
    }

    fn forward(&mut self, phase: Phase) -> CfgdResult<()> {
        let participants = self.participants;
        for p in participants.iter() {
            if let Err(e) = invoke(p.as_ref(), phase, self.ctx) {
                return Err(self.fail(p.name(), phase, e.to_string()));
            }
        }
        Ok(())
    }

    fn fail(&mut self, participant: &str, phase: Phase, message: String) -> CfgdError {
        warn!(
            target: "cfgd::txn",
            txn = %self.ctx.id(),
            participant,
            %phase,
            error = %message,
            "Participant failed, aborting"
        );
        self.abort();
        CfgdError::ParticipantFailed {
            participant: participant.to_string(),
            phase,
            message,
        }
    }

    /// `abort` to every begun participant, last first
    pub(crate) fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = TransactionState::Aborting;
        let participants = self.participants;
        for p in participants.iter().take(self.begun).rev() {
            if let Err(e) = invoke(p.as_ref(), Phase::Abort, self.ctx) {
                warn!(target: "cfgd::txn", txn = %self.ctx.id(), participant = p.name(), error = %e, "Abort failed");
            }
        }
        self.state = TransactionState::Aborted;
    }

    /// `commit` on every participant in order
    ///
    /// On failure the participants that already committed are reverted, last
    /// first, and every begun participant then gets `end`.
    pub(crate) fn commit(&mut self) -> CfgdResult<()> {
        let participants = self.participants;
        for (i, p) in participants.iter().enumerate() {
            if let Err(e) = invoke(p.as_ref(), Phase::Commit, self.ctx) {
                error!(
                    target: "cfgd::txn",
                    txn = %self.ctx.id(),
                    participant = p.name(),
                    error = %e,
                    committed = self.committed,
                    "Commit failed after side effects, reverting"
                );
                let (reverted, revert_failed) = self.compensate();
                return Err(CfgdError::CommitFailed {
                    participant: p.name().to_string(),
                    message: e.to_string(),
                    reverted,
                    revert_failed,
                });
            }
            self.committed = i + 1;
        }
        Ok(())
    }

    /// Running could not be swapped after every participant committed
    pub(crate) fn publish_failed(&mut self, cause: CfgdError) -> CfgdError {
        error!(target: "cfgd::txn", txn = %self.ctx.id(), error = %cause, "Running swap failed, reverting");
        let (reverted, _) = self.compensate();
        CfgdError::storage(format!(
            "failed to publish running tree: {} (reverted: [{}])",
            cause,
            reverted.join(", ")
        ))
    }

    /// Running holds the target tree
    pub(crate) fn published(&mut self) -> CfgdResult<()> {
        self.advance(TransactionState::Committed)
    }

    /// Success notifications, then `Done`
    pub(crate) fn finish(&mut self) -> CfgdResult<()> {
        if self.state == TransactionState::Committed {
            self.notify(Phase::CommitDone, self.participants.len());
        }
        self.notify(Phase::End, self.begun);
        self.advance(TransactionState::Done)
    }

    /// Bring an unfinished run to a terminal state
    pub(crate) fn settle(&mut self) {
        if self.state.is_terminal() || self.begun == 0 {
            return;
        }
        warn!(target: "cfgd::txn", txn = %self.ctx.id(), state = %self.state, "Transaction left unfinished, compensating");
        if self.committed > 0 {
            self.compensate();
        } else {
            self.abort();
        }
    }

    fn compensate(&mut self) -> (Vec<String>, Vec<String>) {
        self.state = TransactionState::Aborting;
        self.reverted = true;
        let participants = self.participants;
        let mut reverted = Vec::new();
        let mut revert_failed = Vec::new();
        for p in participants.iter().take(self.committed).rev() {
            // registration guarantees every commit-path participant has revert
            if !p.capabilities().supports(Phase::Revert) {
                continue;
            }
            reverted.push(p.name().to_string());
            if let Err(e) = invoke(p.as_ref(), Phase::Revert, self.ctx) {
                warn!(target: "cfgd::txn", txn = %self.ctx.id(), participant = p.name(), error = %e, "Revert failed");
                revert_failed.push(p.name().to_string());
            }
        }
        self.notify(Phase::End, self.begun);
        self.state = TransactionState::Aborted;
        (reverted, revert_failed)
    }

    /// Best-effort hook on the first `count` participants, in order
    fn notify(&self, phase: Phase, count: usize) {
        for p in self.participants.iter().take(count) {
            if let Err(e) = invoke(p.as_ref(), phase, self.ctx) {
                warn!(target: "cfgd::txn", txn = %self.ctx.id(), participant = p.name(), %phase, error = %e, "Notification failed");
            }
        }
    }
}

impl Drop for Lifecycle<'_> {
    fn drop(&mut self) {
        self.settle();
    }
}
