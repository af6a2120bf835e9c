//! Error Types for the Lexicache API Boundary
//!
//! Only whole-request failures surface here: a malformed request shape
//! or an unreachable cache backend. Per-source failures (build errors,
//! failed dispatches, unknown tokens) are embedded in the response
//! maps by the coordinators and never become an `ApiError`.
//!
//! The host owns the HTTP layer; `status()` exposes the intended
//! status code without pulling in a web framework.

use lexicache_core::{CacheError, LexicacheError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for whole-request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request validation failed (400)
    ValidationFailed,

    /// Request lacks the context required to execute (403)
    MissingContext,

    /// Cache backend unreachable (500)
    CacheUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::ValidationFailed => 400,
            ErrorCode::MissingContext => 403,
            ErrorCode::CacheUnavailable => 500,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::MissingContext => "Required request context is missing",
            ErrorCode::CacheUnavailable => "Cache backend unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for whole-request failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status(&self) -> u16 {
        self.code.status()
    }

    /// Create a ValidationFailed error.
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Create a ValidationFailed error for one missing field.
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::ValidationFailed,
            format!("Required field '{}' is missing", field),
        )
    }

    /// Create a MissingContext error.
    pub fn missing_context(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingContext, message)
    }

    /// Create a CacheUnavailable error.
    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<LexicacheError> for ApiError {
    fn from(e: LexicacheError) -> Self {
        match e {
            LexicacheError::Validation(v) => ApiError::validation_failed(v.to_string()),
            LexicacheError::Cache(CacheError::Unavailable { reason }) => {
                ApiError::cache_unavailable(reason)
            }
            // Any other error escaping the coordinators means a
            // per-item isolation path was missed; fail closed as 500.
            other => ApiError::cache_unavailable(other.to_string()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
