//! Transaction coordinator for the participant lifecycle
//!
//! One run is:
//! - diff running (source) against candidate (target)
//! - `begin`, `validate`, `complete` on every participant, in order
//! - for commits: `commit` on every participant, then the running swap
//! - `commit_done` and `end` notifications
//!
//! Failures before commit abort every begun participant in reverse order.
//! Failures at or after commit revert the participants that already
//! committed, in reverse order, and running is left untouched.
//!
//! The coordinator also keeps:
//! - Transaction id allocation (strictly increasing, never reused)
//! - Transaction metrics (started, validated, committed, aborted)
//! - A bounded history of finished runs for operator audit

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use cfgd_concurrency::{diff_with, DiffOptions};
use cfgd_core::{CfgdError, CfgdResult, ConfigTree, SessionId, TxnId};

use crate::participant::ParticipantRegistry;
use crate::transaction::lifecycle::Lifecycle;
use crate::transaction::{TransactionContext, TransactionKind, TransactionState, TxnArg};

/// Number of finished runs kept in the history
pub const HISTORY_CAPACITY: usize = 64;

/// Inputs of one coordinator run
pub struct RunRequest<'a> {
    /// Id from [`TransactionCoordinator::next_txn_id`]
    pub id: TxnId,
    /// Session that asked for the run
    pub session: &'a SessionId,
    /// Pre-change tree (running)
    pub source: &'a ConfigTree,
    /// Post-change tree (candidate, or the rebased candidate)
    pub target: &'a ConfigTree,
    /// Opaque caller argument handed to participants
    pub arg: Option<TxnArg>,
    /// Diff policy
    pub diff_options: DiffOptions,
}

/// Audit entry for a finished run
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Transaction id
    pub id: TxnId,
    /// Validate-only or commit
    pub kind: TransactionKind,
    /// Requesting session
    pub session: SessionId,
    /// Terminal state (`Done` or `Aborted`)
    pub state: TransactionState,
    /// Rendered error for failed runs
    pub failure: Option<String>,
    /// Whether committed participants were asked to revert
    pub reverted: bool,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Run duration
    pub duration: Duration,
}

impl TransactionRecord {
    /// Whether the run finished successfully
    pub fn succeeded(&self) -> bool {
        self.state == TransactionState::Done
    }
}

/// Drives participants through validate and commit runs
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering: they are observational only and
/// synchronize nothing else. Runs themselves are serialized by `serial`.
pub struct TransactionCoordinator {
    /// Last allocated transaction id
    last_txn_id: AtomicU64,
    /// Held for the whole of a run
    serial: Mutex<()>,
    total_started: AtomicU64,
    total_validated: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
    total_commit_failed: AtomicU64,
    history: Mutex<VecDeque<TransactionRecord>>,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    /// Coordinator with no runs yet; the first id is 1
    pub fn new() -> Self {
        Self {
            last_txn_id: AtomicU64::new(0),
            serial: Mutex::new(()),
            total_started: AtomicU64::new(0),
            total_validated: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
            total_commit_failed: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Allocate the next transaction id
    pub fn next_txn_id(&self) -> TxnId {
        TxnId::new(self.last_txn_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Most recently allocated id, if any
    pub fn last_txn_id(&self) -> Option<TxnId> {
        match self.last_txn_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(TxnId::new(id)),
        }
    }

    /// begin, validate, complete, end; running is never touched
    ///
    /// # Errors
    ///
    /// Returns `ParticipantFailed` if a participant rejects the run, or a
    /// `Precondition` error if the trees cannot be diffed.
    pub fn validate(&self, participants: &ParticipantRegistry, request: RunRequest<'_>) -> CfgdResult<()> {
        self.run(
            TransactionKind::Validate,
            participants,
            request,
            None::<fn(&ConfigTree) -> CfgdResult<()>>,
        )
    }

    /// Full lifecycle; `publish` swaps running once every participant committed
    ///
    /// # Errors
    ///
    /// Returns `ParticipantFailed` for a failure before commit,
    /// `CommitFailed` for a failure during commit, or a storage error when
    /// `publish` fails. Running is unchanged in every failure case.
    pub fn commit<F>(&self, participants: &ParticipantRegistry, request: RunRequest<'_>, publish: F) -> CfgdResult<()>
    where
        F: FnOnce(&ConfigTree) -> CfgdResult<()>,
    {
        self.run(TransactionKind::Commit, participants, request, Some(publish))
    }

    fn run<F>(
        &self,
        kind: TransactionKind,
        participants: &ParticipantRegistry,
        request: RunRequest<'_>,
        publish: Option<F>,
    ) -> CfgdResult<()>
    where
        F: FnOnce(&ConfigTree) -> CfgdResult<()>,
    {
        let _serial = self.serial.lock();
        let id = request.id;
        let session = request.session.clone();
        let started_at = Utc::now();
        let clock = Instant::now();
        self.total_started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "cfgd::txn", txn = %id, %kind, session = %session, "Transaction started");

        let (state, reverted, result) = Self::drive(kind, participants, request, publish);

        match (&result, kind) {
            (Ok(()), TransactionKind::Validate) => {
                self.total_validated.fetch_add(1, Ordering::Relaxed);
                debug!(target: "cfgd::txn", txn = %id, "Validation succeeded");
            }
            (Ok(()), TransactionKind::Commit) => {
                self.total_committed.fetch_add(1, Ordering::Relaxed);
                info!(target: "cfgd::txn", txn = %id, session = %session, "Transaction committed");
            }
            (Err(e), _) => {
                self.total_aborted.fetch_add(1, Ordering::Relaxed);
                if reverted {
                    self.total_commit_failed.fetch_add(1, Ordering::Relaxed);
                }
                debug!(target: "cfgd::txn", txn = %id, error = %e, "Transaction aborted");
            }
        }

        self.record(TransactionRecord {
            id,
            kind,
            session,
            state,
            failure: result.as_ref().err().map(ToString::to_string),
            reverted,
            started_at,
            duration: clock.elapsed(),
        });
        result
    }

    fn drive<F>(
        kind: TransactionKind,
        participants: &ParticipantRegistry,
        request: RunRequest<'_>,
        publish: Option<F>,
    ) -> (TransactionState, bool, CfgdResult<()>)
    where
        F: FnOnce(&ConfigTree) -> CfgdResult<()>,
    {
        let changes = match diff_with(request.source, request.target, request.diff_options) {
            Ok(changes) => changes,
            Err(e) => {
                error!(target: "cfgd::txn", txn = %request.id, error = %e, "Diff failed, no participant called");
                return (TransactionState::Aborted, false, Err(e));
            }
        };
        debug!(target: "cfgd::txn", txn = %request.id, changes = changes.len(), "Change vector computed");
        let ctx = TransactionContext::new(request.id, kind, request.session.clone(), request.arg, changes);
        let mut life = Lifecycle::new(&ctx, participants);
        let result = Self::steps(&mut life, kind, publish);
        if result.is_err() {
            life.settle();
        }
        (life.state(), life.reverted(), result)
    }

    fn steps<F>(life: &mut Lifecycle<'_>, kind: TransactionKind, publish: Option<F>) -> CfgdResult<()>
    where
        F: FnOnce(&ConfigTree) -> CfgdResult<()>,
    {
        life.begin()?;
        life.validate()?;
        life.complete()?;
        if kind == TransactionKind::Validate {
            return life.finish();
        }
        life.commit()?;
        if let Some(publish) = publish {
            if let Err(e) = publish(life.ctx().target()) {
                return Err(life.publish_failed(e));
            }
        }
        life.published()?;
        life.finish()
    }

    fn record(&self, record: TransactionRecord) {
        let mut history = self.history.lock();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Finished runs, oldest first
    pub fn history(&self) -> Vec<TransactionRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Get transaction metrics
    ///
    /// Returns current snapshot of transaction statistics.
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            total_started: started,
            total_validated: self.total_validated.load(Ordering::Relaxed),
            total_committed: committed,
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            total_commit_failed: self.total_commit_failed.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

/// Transaction metrics
///
/// Provides statistics about transaction lifecycle.
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Total number of runs started
    pub total_started: u64,
    /// Validate-only runs that succeeded
    pub total_validated: u64,
    /// Commits that reached `Done`
    pub total_committed: u64,
    /// Runs that ended `Aborted`
    pub total_aborted: u64,
    /// Aborted runs in which committed participants had to revert
    pub total_commit_failed: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total runs that finished
    pub fn total_completed(&self) -> u64 {
        self.total_validated + self.total_committed + self.total_aborted
    }

    /// Abort rate (aborted / started)
    pub fn abort_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_aborted as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
