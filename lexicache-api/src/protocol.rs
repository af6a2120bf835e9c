//! Wire DTOs for the search and poll protocol.
//!
//! Field names are part of the protocol and must not change: clients
//! key everything by source id, `rid` ties a poll back to the search
//! that minted its tokens, and hit type rides under `type`.

use lexicache_core::SearchHit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One search hit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireHit {
    pub system: String,
    pub code: String,
    pub display: String,
    pub score: f64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub hit_type: Option<String>,
}

impl From<SearchHit> for WireHit {
    fn from(hit: SearchHit) -> Self {
        Self {
            system: hit.system,
            code: hit.code,
            display: hit.display,
            score: hit.score,
            hit_type: hit.hit_type,
        }
    }
}

/// A search call across one or more sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text.
    pub q: String,
    /// Request id; polls for the minted tokens must carry the same id.
    pub rid: i64,
    /// Sources to search; all registered sources when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<String>>,
}

/// Response to a search call. All maps are keyed by source id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub rid: i64,
    /// Completed lookups, best hit first.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, Vec<WireHit>>,
    /// Poll tokens for deferred lookups.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending: BTreeMap<String, String>,
    /// Soft per-source errors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    /// Call statistics, shape owned by the server.
    pub stats: serde_json::Value,
}

/// A poll for jobs minted by an earlier search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRequest {
    /// Request id of the originating search.
    pub rid: i64,
    /// Source id to token, as returned in `SearchResponse::pending`.
    pub pending: BTreeMap<String, String>,
}

/// A job still pending after a poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Token to present on the next poll.
    pub token: String,
    /// Advisory wait before polling again, in milliseconds.
    pub after_ms: u64,
}

/// Response to a poll call. All maps are keyed by source id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub rid: i64,
    /// Lookups completed this cycle (or served from cache).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, Vec<WireHit>>,
    /// Jobs to poll again.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending: BTreeMap<String, PendingEntry>,
    /// Soft per-source errors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

// ============================================================================
// TESTS
// ============================================================================
