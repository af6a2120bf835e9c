//! Error types for Lexicache operations

use thiserror::Error;

/// Cache backend errors.
///
/// `Unavailable` is the only fatal variant at the request boundary
/// (surfaced as 500); everything else is isolated per item by the
/// coordinators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Envelope serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Envelope deserialization failed for {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("I/O error on {key}: {reason}")]
    Io { key: String, reason: String },
}

/// Index build errors, reported per source and never cached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("No index builder registered for kind {kind}")]
    NoBuilder { kind: String },

    #[error("Index build failed for source {source_id}: {reason}")]
    BuildFailed { source_id: String, reason: String },

    #[error("Source document for {source_id} is malformed: {reason}")]
    MalformedDocument { source_id: String, reason: String },
}

/// Upstream lookup errors, reported per affected job with a
/// retry-after hint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote lookup '{lookup_type}' failed: {reason}")]
    LookupFailed { lookup_type: String, reason: String },

    #[error("Rate limited on '{lookup_type}', retry after {retry_after_ms}ms")]
    RateLimited {
        lookup_type: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from '{lookup_type}': {reason}")]
    InvalidResponse { lookup_type: String, reason: String },
}

/// Request shape errors; fatal for the whole call (4xx).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all Lexicache errors.
#[derive(Debug, Clone, Error)]
pub enum LexicacheError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Result type alias for Lexicache operations.
pub type LexicacheResult<T> = Result<T, LexicacheError>;

// =============================================================================
// TESTS
// =============================================================================
