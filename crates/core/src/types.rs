//! Identifier types shared across the engine
//!
//! - SessionId: opaque identity of a frontend session (connection id, pid, uuid)
//! - TxnId: monotonically increasing transaction identifier, used for tracing only

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identity of a frontend session
///
/// Lock ownership is keyed by this value. Frontends may supply their own
/// identifiers (a connection id, a process id) or generate a random one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new random session id
    pub fn new() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl From<u32> for SessionId {
    fn from(pid: u32) -> Self {
        SessionId(pid.to_string())
    }
}

/// Transaction identifier
///
/// Strictly increasing across the process lifetime and never reused.
/// Carries no locking semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        TxnId(id)
    }

    /// Raw numeric value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}
