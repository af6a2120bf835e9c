//! Lexicache API - Wire Protocol and Request Boundary
//!
//! The typed surface the host mounts behind its own router: wire DTOs
//! for the search and poll protocol, request validation, and the
//! mapping from the internal error taxonomy to boundary error codes.
//! Lexicache deliberately ships no HTTP server of its own.

pub mod error;
pub mod handlers;
pub mod protocol;

pub use error::{ApiError, ErrorCode};
pub use handlers::{handle_poll, handle_search};
pub use protocol::{
    PendingEntry, PollRequest, PollResponse, SearchRequest, SearchResponse, WireHit,
};
