//! Lexicache Core - Data Model and Collaborator Traits
//!
//! Defines the shared vocabulary of the Lexicache subsystem: cache
//! envelopes, namespaced cache keys, advisory lock leases, poll jobs,
//! and the traits at the boundary to the host application (source
//! registry, remote search client, index builder).
//!
//! Storage backends live in `lexicache-storage`; the build and poll
//! coordinators live in `lexicache-coordinator`.

pub mod envelope;
pub mod error;
pub mod job;
pub mod key;
pub mod lease;
pub mod source;

pub use envelope::{CacheEnvelope, ENVELOPE_VERSION};
pub use error::{
    BuildError, CacheError, LexicacheError, LexicacheResult, RemoteError, ValidationError,
};
pub use job::{Job, JobState, JobToken};
pub use key::{CacheKey, KeyCategory};
pub use lease::{LeaseOutcome, LockLease};
pub use source::{
    BuildArtifact, IndexBuilder, IndexEntry, RemoteParams, RemoteSearchClient, SearchHit,
    SourceDescriptor, SourceKind, SourceRegistry,
};

/// Unix timestamp in seconds, the time unit for all expiry math.
pub type UnixSeconds = i64;

/// Current unix time in seconds.
pub fn now_unix() -> UnixSeconds {
    chrono::Utc::now().timestamp()
}
