//! Lock manager: exclusive, session-scoped tree locks
//!
//! At most one session holds the lock on a given tree name at any time.
//! Re-acquiring by the current holder is a no-op. Lock state lives only for
//! the process lifetime and starts empty.
//!
//! ## Policies
//!
//! - [`LockPolicy::FailFast`]: contention returns `AlreadyLocked` immediately
//! - [`LockPolicy::Wait`]: block on a condition variable until the lock is
//!   released or the deadline passes (`LockTimeout`)
//!
//! A single `parking_lot::Mutex` guards the holder map; every operation is
//! short and never calls out while holding it.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use cfgd_core::{CfgdError, CfgdResult, SessionId};

/// What `acquire_with` does when another session holds the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Fail immediately with `AlreadyLocked`
    FailFast,
    /// Block up to the given duration, then fail with `LockTimeout`
    Wait(Duration),
}

impl LockPolicy {
    /// `FailFast` for zero, `Wait` otherwise
    pub fn from_wait_ms(ms: u64) -> Self {
        if ms == 0 {
            LockPolicy::FailFast
        } else {
            LockPolicy::Wait(Duration::from_millis(ms))
        }
    }
}

#[derive(Debug, Clone)]
struct LockEntry {
    holder: SessionId,
    acquired_at: Instant,
}

/// Snapshot of one held lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// Locked tree
    pub tree: String,
    /// Holding session
    pub holder: SessionId,
    /// How long the lock has been held
    pub held_for: Duration,
}

/// Grants exclusive locks over named trees
#[derive(Debug, Default)]
pub struct LockManager {
    holders: Mutex<FxHashMap<String, LockEntry>>,
    released: Condvar,
}

impl LockManager {
    /// Create a manager with no locks held
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire without waiting
    ///
    /// # Errors
    ///
    /// Returns `AlreadyLocked` carrying the current holder if another session
    /// holds the lock.
    pub fn acquire(&self, tree: &str, holder: &SessionId) -> CfgdResult<()> {
        self.acquire_with(tree, holder, LockPolicy::FailFast)
    }

    /// Acquire according to `policy`
    ///
    /// # Errors
    ///
    /// `AlreadyLocked` under `FailFast`, `LockTimeout` under `Wait` once the
    /// deadline passes.
    pub fn acquire_with(&self, tree: &str, holder: &SessionId, policy: LockPolicy) -> CfgdResult<()> {
        let deadline = match policy {
            LockPolicy::FailFast => None,
            LockPolicy::Wait(d) => Some(Instant::now() + d),
        };
        let mut holders = self.holders.lock();
        loop {
            let current = match holders.get(tree) {
                None => break,
                Some(entry) if entry.holder == *holder => return Ok(()),
                Some(entry) => entry.holder.clone(),
            };
            let Some(deadline) = deadline else {
                debug!(target: "cfgd::lock", tree, holder = %current, requester = %holder, "Lock contended");
                return Err(CfgdError::AlreadyLocked {
                    tree: tree.to_string(),
                    holder: current,
                });
            };
            if self.released.wait_until(&mut holders, deadline).timed_out()
                && holders.get(tree).map_or(false, |e| e.holder != *holder)
            {
                return Err(CfgdError::LockTimeout {
                    tree: tree.to_string(),
                    holder: current,
                });
            }
        }
        holders.insert(
            tree.to_string(),
            LockEntry {
                holder: holder.clone(),
                acquired_at: Instant::now(),
            },
        );
        info!(target: "cfgd::lock", tree, holder = %holder, "Lock acquired");
        Ok(())
    }

    /// Release a lock held by `holder`
    ///
    /// # Errors
    ///
    /// `NotLocked` if nobody holds it, `NotHolder` if someone else does.
    pub fn release(&self, tree: &str, holder: &SessionId) -> CfgdResult<()> {
        let mut holders = self.holders.lock();
        match holders.get(tree) {
            None => Err(CfgdError::NotLocked {
                tree: tree.to_string(),
            }),
            Some(entry) if entry.holder != *holder => Err(CfgdError::NotHolder {
                tree: tree.to_string(),
                holder: entry.holder.clone(),
                requester: holder.clone(),
            }),
            Some(_) => {
                holders.remove(tree);
                drop(holders);
                self.released.notify_all();
                info!(target: "cfgd::lock", tree, holder = %holder, "Lock released");
                Ok(())
            }
        }
    }

    /// Current holder of a tree's lock
    pub fn holder(&self, tree: &str) -> Option<SessionId> {
        self.holders.lock().get(tree).map(|e| e.holder.clone())
    }

    /// Succeeds iff `session` currently holds the lock on `tree`
    ///
    /// # Errors
    ///
    /// `NotLocked` or `NotHolder`, as for `release`.
    pub fn check_holder(&self, tree: &str, session: &SessionId) -> CfgdResult<()> {
        match self.holder(tree) {
            None => Err(CfgdError::NotLocked {
                tree: tree.to_string(),
            }),
            Some(h) if h != *session => Err(CfgdError::NotHolder {
                tree: tree.to_string(),
                holder: h,
                requester: session.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Release every lock held by `holder`; returns the released tree names
    ///
    /// Called on session teardown so a vanished session cannot stall the system.
    pub fn release_all(&self, holder: &SessionId) -> Vec<String> {
        let mut holders = self.holders.lock();
        let mut released: Vec<String> = holders
            .iter()
            .filter(|(_, e)| e.holder == *holder)
            .map(|(t, _)| t.clone())
            .collect();
        for tree in &released {
            holders.remove(tree);
        }
        drop(holders);
        if !released.is_empty() {
            self.released.notify_all();
            released.sort();
            info!(target: "cfgd::lock", holder = %holder, trees = ?released, "Session locks released");
        }
        released
    }

    /// Every held lock, sorted by tree name
    pub fn locks(&self) -> Vec<LockInfo> {
        let now = Instant::now();
        let mut out: Vec<LockInfo> = self
            .holders
            .lock()
            .iter()
            .map(|(tree, e)| LockInfo {
                tree: tree.clone(),
                holder: e.holder.clone(),
                held_for: now.saturating_duration_since(e.acquired_at),
            })
            .collect();
        out.sort_by(|a, b| a.tree.cmp(&b.tree));
        out
    }
}
