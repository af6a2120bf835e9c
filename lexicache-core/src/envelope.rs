//! Cache envelope: the stored unit combining a payload with expiry
//! and optional metadata.
//!
//! Envelopes are immutable once written; an update writes a new
//! envelope for the same key and the backend returns the latest one.
//! Expiry is in unix seconds with `0` meaning "never expires" -- used
//! only with version-qualified keys, where a version change naturally
//! produces a fresh key instead of an in-place update.

use crate::UnixSeconds;
use serde::{Deserialize, Serialize};

/// Envelope format version, stored as `v` in the persisted shape.
pub const ENVELOPE_VERSION: u32 = 1;

/// Stored cache unit.
///
/// Persisted shape: `{v, expires, payload, meta?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    /// Envelope format version.
    pub v: u32,
    /// Unix seconds after which the envelope is expired; `0` = never.
    pub expires: UnixSeconds,
    /// The cached payload.
    pub payload: serde_json::Value,
    /// Optional descriptive metadata stored alongside the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl CacheEnvelope {
    /// Create an envelope expiring `ttl_secs` from `now`.
    ///
    /// `ttl_secs == 0` produces an immortal envelope.
    pub fn new(
        payload: serde_json::Value,
        ttl_secs: i64,
        now: UnixSeconds,
        meta: Option<serde_json::Value>,
    ) -> Self {
        let expires = if ttl_secs == 0 { 0 } else { now + ttl_secs };
        Self {
            v: ENVELOPE_VERSION,
            expires,
            payload,
            meta,
        }
    }

    /// Create an immortal envelope (never expires).
    pub fn immortal(payload: serde_json::Value, meta: Option<serde_json::Value>) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            expires: 0,
            payload,
            meta,
        }
    }

    /// Whether this envelope is expired at `now`.
    ///
    /// `expires == 0` is immortal; otherwise expired iff `now > expires`.
    pub fn is_expired(&self, now: UnixSeconds) -> bool {
        self.expires != 0 && now > self.expires
    }

    /// Whether this envelope is still live at `now`.
    pub fn is_live(&self, now: UnixSeconds) -> bool {
        !self.is_expired(now)
    }
}
