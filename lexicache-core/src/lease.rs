//! Advisory lock leases.
//!
//! A lease is a time-bounded ownership claim over a lock key. It is
//! NOT a mutex: the append-log backend verifies ownership with an
//! insert-then-verify read, which leaves a small race window where two
//! truly simultaneous writers both pass verification. That window is
//! an accepted property of the design -- builders guarded by a lease
//! must be safe to run redundantly.

use crate::UnixSeconds;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ephemeral lock record stored under a key's lock namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    /// Opaque caller identity; compared on verification.
    pub owner_id: String,
    /// Unix seconds until which the lease is held.
    pub lease_until: UnixSeconds,
}

impl LockLease {
    /// Create a lease held by `owner_id` for `duration` from `now`.
    pub fn new(owner_id: impl Into<String>, duration: Duration, now: UnixSeconds) -> Self {
        Self {
            owner_id: owner_id.into(),
            lease_until: now + duration.as_secs() as i64,
        }
    }

    /// Whether the lease has expired at `now`.
    pub fn is_expired(&self, now: UnixSeconds) -> bool {
        now >= self.lease_until
    }

    /// Whether the lease is still held at `now`.
    pub fn covers(&self, now: UnixSeconds) -> bool {
        !self.is_expired(now)
    }

    /// Whether this lease is a live claim by the given owner.
    pub fn held_by(&self, owner_id: &str, now: UnixSeconds) -> bool {
        self.owner_id == owner_id && self.covers(now)
    }
}

/// Result of a lock acquisition attempt.
///
/// `Unavailable` is a normal outcome, not an error: callers fall back
/// to the pending sentinel instead of blocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The lease was acquired (best-effort).
    Acquired(LockLease),
    /// Another caller holds a live lease.
    Unavailable,
}

impl LeaseOutcome {
    /// Returns true if the lease was acquired.
    pub fn is_acquired(&self) -> bool {
        matches!(self, LeaseOutcome::Acquired(_))
    }
}
