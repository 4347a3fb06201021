//! Engine context and the frontend-facing API
//!
//! This module provides [`EngineContext`], the one handle frontends use:
//! - Tree initialization at startup (running, candidate, candidate-base)
//! - Candidate locking and editing, per [`Session`]
//! - validate / commit through the transaction coordinator
//! - Optimistic rebase of the candidate onto a running tree that moved on
//! - Transaction metrics and history
//!
//! ## Commit flow
//!
//! ```text
//! lock(session)
//! edit_candidate(session, |tree| ...)
//! commit(session)
//!   -> [rebase candidate onto running]        (rebase_on_commit)
//!   -> coordinator: begin validate complete commit
//!   -> running := target                      (single publish point)
//!   -> candidate, candidate-base := running, [startup := running]
//! ```

pub mod config;

pub use config::{EngineConfig, StoreBackend, StoreConfig, CONFIG_FILE_NAME};

use std::sync::Arc;

use tracing::{debug, info, warn};

use cfgd_concurrency::{rebase_with, LockManager, RebaseResult};
use cfgd_core::{
    CfgdError, CfgdResult, ConfigTree, SessionId, TreeStore, TxnId, CANDIDATE, CANDIDATE_BASE,
    RUNNING, STARTUP,
};

use crate::coordinator::{RunRequest, TransactionCoordinator, TransactionMetrics, TransactionRecord};
use crate::participant::ParticipantRegistry;
use crate::session::Session;
use crate::transaction::{TransactionKind, TxnArg};

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Transaction id of the commit
    pub txn: TxnId,
    /// Whether the candidate was rebased onto running first
    pub rebased: bool,
}

/// The configuration engine
///
/// Owns the tree store, the lock manager, the registered participants and
/// the transaction coordinator. Every frontend call goes through a
/// `&EngineContext`; there is no process-wide state.
///
/// # Example
///
/// ```text
/// let engine = EngineContext::open(EngineConfig::default(), store, registry)?;
/// let session = engine.open_session();
/// engine.lock(&session)?;
/// engine.edit_candidate(&session, |tree| {
///     let root = tree.root();
///     tree.add_leaf(root, "hostname", "edge-1");
///     Ok(())
/// })?;
/// engine.commit(&session)?;
/// ```
pub struct EngineContext {
    config: EngineConfig,
    store: Arc<dyn TreeStore>,
    locks: Arc<LockManager>,
    participants: ParticipantRegistry,
    coordinator: TransactionCoordinator,
}

impl EngineContext {
    /// Open the engine over an existing store
    ///
    /// If running is missing it is created from startup, or empty when
    /// there is no startup tree. Candidate and candidate-base are reset from
    /// running.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an invalid config, or the store's error.
    pub fn open(
        config: EngineConfig,
        store: Arc<dyn TreeStore>,
        participants: ParticipantRegistry,
    ) -> CfgdResult<Self> {
        config.validate()?;

        if !store.exists(RUNNING) {
            if store.exists(STARTUP) {
                store.copy(STARTUP, RUNNING)?;
                info!(target: "cfgd::store", "Running loaded from startup");
            } else {
                store.put(RUNNING, ConfigTree::new())?;
                info!(target: "cfgd::store", "Running initialized empty");
            }
        }
        store.copy(RUNNING, CANDIDATE)?;
        store.copy(RUNNING, CANDIDATE_BASE)?;

        info!(
            target: "cfgd::txn",
            participants = ?participants.names(),
            require_lock = config.require_lock,
            rebase_on_commit = config.rebase_on_commit,
            "Engine opened"
        );

        Ok(Self {
            config,
            store,
            locks: Arc::new(LockManager::new()),
            participants,
            coordinator: TransactionCoordinator::new(),
        })
    }

    /// Open the engine over the store selected in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn from_config(config: EngineConfig, participants: ParticipantRegistry) -> CfgdResult<Self> {
        let store = config.open_store()?;
        Self::open(config, store, participants)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Backing tree store
    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    /// Registered participants
    pub fn participants(&self) -> &ParticipantRegistry {
        &self.participants
    }

    /// Lock manager shared by every session
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    // ========================================================================
    // Sessions and locking
    // ========================================================================

    /// New session with a random id
    pub fn open_session(&self) -> Session {
        Session::new(SessionId::new(), Arc::clone(&self.locks))
    }

    /// New session with a frontend-chosen id
    pub fn session_with_id(&self, id: impl Into<SessionId>) -> Session {
        Session::new(id.into(), Arc::clone(&self.locks))
    }

    /// Lock the candidate for `session`
    ///
    /// Fails at once, or waits up to `lock_wait_ms`, when another session
    /// holds it. Locking again by the holder is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyLocked` or `LockTimeout`.
    pub fn lock(&self, session: &Session) -> CfgdResult<()> {
        self.locks
            .acquire_with(CANDIDATE, session.id(), self.config.lock_policy())
    }

    /// Release the candidate lock
    ///
    /// # Errors
    ///
    /// Returns `NotLocked` or `NotHolder`.
    pub fn unlock(&self, session: &Session) -> CfgdResult<()> {
        self.locks.release(CANDIDATE, session.id())
    }

    /// Current holder of the candidate lock
    pub fn is_locked(&self) -> Option<SessionId> {
        self.locks.holder(CANDIDATE)
    }

    /// Candidate writes need the lock unless `require_lock` is off and the
    /// candidate is unlocked, and never overlap the session's own run
    fn check_writer(&self, session: &Session) -> CfgdResult<()> {
        if let Some(txn) = session.in_flight_txn() {
            return Err(CfgdError::TransactionInFlight {
                tree: CANDIDATE.to_string(),
                txn,
            });
        }
        match self.locks.check_holder(CANDIDATE, session.id()) {
            Err(CfgdError::NotLocked { .. }) if !self.config.require_lock => Ok(()),
            other => other,
        }
    }

    /// Returns true when the candidate was locked on the caller's behalf
    fn enter_run(&self, session: &Session) -> CfgdResult<bool> {
        match self.locks.check_holder(CANDIDATE, session.id()) {
            Ok(()) => Ok(false),
            Err(CfgdError::NotLocked { .. }) if !self.config.require_lock => {
                self.locks.acquire(CANDIDATE, session.id())?;
                debug!(target: "cfgd::lock", session = %session.id(), "Candidate locked for the run");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn leave_run(&self, session: &Session, implicit: bool, kind: TransactionKind, succeeded: bool) {
        let release = implicit
            || match kind {
                TransactionKind::Validate => false,
                TransactionKind::Commit if succeeded => self.config.release_lock_on_commit,
                TransactionKind::Commit => self.config.release_lock_on_failure,
            };
        if release {
            if let Err(e) = self.locks.release(CANDIDATE, session.id()) {
                warn!(target: "cfgd::lock", session = %session.id(), error = %e, "Lock release after run failed");
            }
        }
    }

    // ========================================================================
    // Trees
    // ========================================================================

    /// Current running tree
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn running(&self) -> CfgdResult<Arc<ConfigTree>> {
        self.store.get(RUNNING)
    }

    /// Current candidate tree
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn candidate(&self) -> CfgdResult<Arc<ConfigTree>> {
        self.store.get(CANDIDATE)
    }

    /// Edit a private copy of the candidate and store it if `edit` succeeds
    ///
    /// # Errors
    ///
    /// Returns a lock error if `session` may not write the candidate, or
    /// whatever `edit` returns. The candidate is unchanged on error.
    pub fn edit_candidate<R, F>(&self, session: &Session, edit: F) -> CfgdResult<R>
    where
        F: FnOnce(&mut ConfigTree) -> CfgdResult<R>,
    {
        self.check_writer(session)?;
        let mut tree = ConfigTree::clone(&*self.store.get(CANDIDATE)?);
        let out = edit(&mut tree)?;
        self.store.put(CANDIDATE, tree)?;
        debug!(target: "cfgd::store", session = %session.id(), "Candidate edited");
        Ok(out)
    }

    /// Replace the candidate wholesale
    ///
    /// # Errors
    ///
    /// Returns a lock error if `session` may not write the candidate.
    pub fn replace_candidate(&self, session: &Session, tree: ConfigTree) -> CfgdResult<()> {
        self.check_writer(session)?;
        self.store.put(CANDIDATE, tree)
    }

    /// Reset the candidate from running and record the new fork point
    ///
    /// # Errors
    ///
    /// Returns a lock error if `session` may not write the candidate.
    pub fn discard_changes(&self, session: &Session) -> CfgdResult<()> {
        self.check_writer(session)?;
        self.store.copy(RUNNING, CANDIDATE)?;
        self.store.copy(RUNNING, CANDIDATE_BASE)?;
        info!(target: "cfgd::store", session = %session.id(), "Candidate reset from running");
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Validate the candidate against every participant
    ///
    /// Runs begin, validate, complete and end. Participants see the same
    /// target `commit` would publish, so with `rebase_on_commit` the
    /// candidate is first rebased onto running. Running is not touched and
    /// the candidate is kept whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns a lock error, `RebaseConflict`, `ParticipantFailed` with the
    /// participant's message, or an internal error.
    pub fn validate(&self, session: &Session) -> CfgdResult<TxnId> {
        self.validate_with(session, None)
    }

    /// [`validate`](Self::validate) with an argument for participants
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn validate_with(&self, session: &Session, arg: Option<TxnArg>) -> CfgdResult<TxnId> {
        let implicit = self.enter_run(session)?;
        let result = self.run_validate(session, arg);
        self.leave_run(session, implicit, TransactionKind::Validate, result.is_ok());
        result
    }

    fn run_validate(&self, session: &Session, arg: Option<TxnArg>) -> CfgdResult<TxnId> {
        let running = self.store.get(RUNNING)?;
        let (target, _) = self.run_target(&running)?;
        let id = self.coordinator.next_txn_id();
        session.start_txn(id);
        let result = self.coordinator.validate(
            &self.participants,
            RunRequest {
                id,
                session: session.id(),
                source: &running,
                target: &target,
                arg,
                diff_options: self.config.diff_options(),
            },
        );
        session.finish_txn(id);
        result.map(|()| id)
    }

    /// Commit the candidate into running
    ///
    /// # Errors
    ///
    /// Returns a lock error, `RebaseConflict`, `ParticipantFailed`,
    /// `CommitFailed` or an internal error. Running is unchanged on error.
    pub fn commit(&self, session: &Session) -> CfgdResult<CommitOutcome> {
        self.commit_with(session, None)
    }

    /// [`commit`](Self::commit) with an argument for participants
    ///
    /// # Errors
    ///
    /// See [`commit`](Self::commit).
    pub fn commit_with(&self, session: &Session, arg: Option<TxnArg>) -> CfgdResult<CommitOutcome> {
        let implicit = self.enter_run(session)?;
        let result = self.run_commit(session, arg);
        self.leave_run(session, implicit, TransactionKind::Commit, result.is_ok());
        result
    }

    fn run_commit(&self, session: &Session, arg: Option<TxnArg>) -> CfgdResult<CommitOutcome> {
        let running = self.store.get(RUNNING)?;
        let (target, rebased) = self.run_target(&running)?;

        let id = self.coordinator.next_txn_id();
        session.start_txn(id);
        let store = &self.store;
        let result = self.coordinator.commit(
            &self.participants,
            RunRequest {
                id,
                session: session.id(),
                source: &running,
                target: &target,
                arg,
                diff_options: self.config.diff_options(),
            },
            |published| store.put(RUNNING, published.clone()),
        );
        session.finish_txn(id);
        result?;

        self.after_commit(id);
        Ok(CommitOutcome { txn: id, rebased })
    }

    /// Bookkeeping once running holds the new tree; failures are logged only
    fn after_commit(&self, id: TxnId) {
        let mut copies = vec![(RUNNING, CANDIDATE), (RUNNING, CANDIDATE_BASE)];
        if self.config.persist_startup {
            copies.push((RUNNING, STARTUP));
        }
        for (src, dst) in copies {
            if let Err(e) = self.store.copy(src, dst) {
                warn!(target: "cfgd::store", txn = %id, tree = dst, error = %e, "Post-commit copy failed");
            }
        }
    }

    /// Tree a run hands to participants: the candidate, rebased onto
    /// running when `rebase_on_commit` is set and running moved on
    fn run_target(&self, running: &Arc<ConfigTree>) -> CfgdResult<(Arc<ConfigTree>, bool)> {
        let candidate = self.store.get(CANDIDATE)?;
        if !self.config.rebase_on_commit {
            return Ok((candidate, false));
        }
        let base = match self.store.get(CANDIDATE_BASE) {
            Ok(base) => base,
            Err(CfgdError::TreeNotFound(_)) => return Ok((candidate, false)),
            Err(e) => return Err(e),
        };
        if base.structurally_eq(running) {
            return Ok((candidate, false));
        }
        match rebase_with(&base, running, &candidate, self.config.diff_options())? {
            RebaseResult::Clean(merged) => {
                info!(target: "cfgd::rebase", "Candidate rebased onto running");
                Ok((Arc::new(merged), true))
            }
            RebaseResult::Conflict(paths) => {
                warn!(target: "cfgd::rebase", conflicts = paths.len(), "Candidate conflicts with running");
                Err(CfgdError::RebaseConflict {
                    paths: paths.into_iter().collect(),
                })
            }
        }
    }

    /// Three-way merge of stored trees
    ///
    /// A conflict is a normal outcome, reported as [`RebaseResult::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns `TreeNotFound` for a missing tree, or `Precondition` for a
    /// malformed one.
    pub fn rebase_check(&self, base: &str, left: &str, right: &str) -> CfgdResult<RebaseResult> {
        let base_tree = self.store.get(base)?;
        let left_tree = self.store.get(left)?;
        let right_tree = self.store.get(right)?;
        let result = rebase_with(&base_tree, &left_tree, &right_tree, self.config.diff_options())?;
        debug!(target: "cfgd::rebase", base, left, right, clean = result.is_clean(), "Rebase check");
        Ok(result)
    }

    // ========================================================================
    // Audit
    // ========================================================================

    /// Recent finished transactions, oldest first
    pub fn transaction_history(&self) -> Vec<TransactionRecord> {
        self.coordinator.history()
    }

    /// Transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.coordinator.metrics()
    }
}
