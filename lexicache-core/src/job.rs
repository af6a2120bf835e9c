//! Poll jobs: addressable units of deferred remote work.
//!
//! A job is created by the first caller that misses the cache and wins
//! the build lease for a remote lookup. The caller receives an opaque
//! token; all later progress happens through poll calls that read and
//! rewrite the job's envelope. There is no separate state store --
//! a job that is never completed simply expires with its TTL.

use crate::UnixSeconds;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque handle used to poll a job.
///
/// The token is embedded in the job's cache key, so possession of the
/// token is sufficient to address the job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobToken(String);

impl JobToken {
    /// Generate a fresh token.
    pub fn generate() -> Self {
        JobToken(Uuid::now_v7().simple().to_string())
    }

    /// Wrap a token string received from a client.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        JobToken(raw.into())
    }

    /// The raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deferred remote lookup, persisted through the cache as an
/// ordinary payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Top-level request id the job belongs to; polls from a different
    /// request id do not match.
    pub request_id: i64,
    /// The logical source this lookup is for.
    pub source_id: String,
    /// The raw query text.
    pub query: String,
    /// Unix seconds when the job was created.
    pub created_at: UnixSeconds,
    /// Set once a batch dispatch completed and results were merged.
    pub done: bool,
}

impl Job {
    /// Create a fresh, not-yet-dispatched job.
    pub fn new(request_id: i64, source_id: impl Into<String>, query: impl Into<String>, now: UnixSeconds) -> Self {
        Self {
            request_id,
            source_id: source_id.into(),
            query: query.into(),
            created_at: now,
            done: false,
        }
    }

    /// The job with its done flag set.
    pub fn completed(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Lifecycle states of a job, derived purely from cache reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// First caller registered the job this request.
    Created,
    /// The job exists but no dispatch has completed yet.
    Pending,
    /// A dispatch completed and results were merged into the cache.
    Done,
    /// TTL elapsed without completion; treated identically to not-found.
    Expired,
}
