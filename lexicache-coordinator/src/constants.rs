//! Default tuning values for the coordinators.
//!
//! Every constant has a matching `LEXICACHE_*` environment variable
//! read by the corresponding config's `from_env()`.

/// How long a created job waits for its first completed dispatch
/// before it expires and polls report `job_not_found` (seconds).
pub const DEFAULT_JOB_TTL_SECS: u64 = 300;

/// How long a completed job envelope lingers; the done flag only has
/// to outlive duplicate polls for the same request (seconds).
pub const DEFAULT_DONE_TTL_SECS: u64 = 60;

/// TTL for cached remote search results (seconds). One day.
pub const DEFAULT_RESULT_TTL_SECS: u64 = 86_400;

/// Advisory retry hint returned with pending jobs after a failed
/// dispatch (milliseconds).
pub const DEFAULT_RETRY_AFTER_MS: u64 = 2_000;

/// How often the background prune task runs (seconds). One hour.
pub const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 3_600;
