//! Per-connection session state
//!
//! A [`Session`] is the identity a frontend connection acts under. It owns
//! no trees; it carries the id that lock ownership is keyed by, and the ids
//! of its in-flight and last transaction.
//!
//! # Usage
//!
//! ```ignore
//! let session = engine.open_session();
//! engine.lock(&session)?;
//! engine.edit_candidate(&session, |tree| { /* ... */ Ok(()) })?;
//! engine.commit(&session)?;
//! drop(session); // releases every lock the session still holds
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use cfgd_concurrency::LockManager;
use cfgd_core::{SessionId, TxnId};

#[derive(Debug, Default)]
struct TxnSlots {
    in_flight: Option<TxnId>,
    last: Option<TxnId>,
}

/// A frontend session
///
/// Dropping the session releases every lock it still holds. Two sessions
/// built with the same id share lock ownership, so dropping either one
/// releases the locks of both.
pub struct Session {
    id: SessionId,
    locks: Arc<LockManager>,
    txns: Mutex<TxnSlots>,
}

impl Session {
    pub(crate) fn new(id: SessionId, locks: Arc<LockManager>) -> Self {
        debug!(target: "cfgd::session", session = %id, "Session opened");
        Self {
            id,
            locks,
            txns: Mutex::new(TxnSlots::default()),
        }
    }

    /// Session id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Transaction currently running for this session
    pub fn in_flight_txn(&self) -> Option<TxnId> {
        self.txns.lock().in_flight
    }

    /// Most recent finished transaction
    pub fn last_txn(&self) -> Option<TxnId> {
        self.txns.lock().last
    }

    /// Names of the trees this session has locked
    pub fn held_locks(&self) -> Vec<String> {
        self.locks
            .locks()
            .into_iter()
            .filter(|info| info.holder == self.id)
            .map(|info| info.tree)
            .collect()
    }

    pub(crate) fn start_txn(&self, id: TxnId) {
        self.txns.lock().in_flight = Some(id);
    }

    pub(crate) fn finish_txn(&self, id: TxnId) {
        let mut txns = self.txns.lock();
        txns.in_flight = None;
        txns.last = Some(id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let txns = self.txns.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("in_flight", &txns.in_flight)
            .field("last", &txns.last)
            .field("locks", &self.held_locks())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let released = self.locks.release_all(&self.id);
        if !released.is_empty() {
            info!(target: "cfgd::session", session = %self.id, trees = ?released, "Session closed, locks released");
        }
    }
}
