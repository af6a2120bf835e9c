//! Typed request handlers.
//!
//! The host mounts these behind its own router and auth: validate the
//! request shape, delegate to the coordinators, and shape the wire
//! response. Shape problems fail the whole call; everything downstream
//! is already isolated per source by the coordinators.

use crate::error::ApiError;
use crate::protocol::{
    PendingEntry, PollRequest, PollResponse, SearchRequest, SearchResponse, WireHit,
};
use lexicache_coordinator::{JobCoordinator, SearchCoordinator};

/// Handle a search call.
pub async fn handle_search(
    coordinator: &SearchCoordinator,
    request: SearchRequest,
) -> Result<SearchResponse, ApiError> {
    if request.q.trim().is_empty() {
        return Err(ApiError::missing_field("q"));
    }
    if request.rid <= 0 {
        return Err(ApiError::validation_failed("'rid' must be positive"));
    }
    if let Some(source_ids) = &request.source_ids {
        if source_ids.is_empty() {
            return Err(ApiError::validation_failed("'source_ids' must not be empty when present"));
        }
    }

    let outcome = coordinator
        .search(request.rid, &request.q, request.source_ids.as_deref())
        .await?;

    tracing::debug!(
        rid = request.rid,
        sources = outcome.stats.sources,
        pending = outcome.pending.len(),
        errors = outcome.errors.len(),
        "Search handled"
    );

    Ok(SearchResponse {
        rid: request.rid,
        results: outcome
            .results
            .into_iter()
            .map(|(source_id, hits)| (source_id, hits.into_iter().map(WireHit::from).collect()))
            .collect(),
        pending: outcome
            .pending
            .into_iter()
            .map(|(source_id, token)| (source_id, token.as_str().to_string()))
            .collect(),
        errors: outcome.errors,
        stats: serde_json::to_value(outcome.stats).unwrap_or_default(),
    })
}

/// Handle a poll call.
pub async fn handle_poll(
    coordinator: &JobCoordinator,
    request: PollRequest,
) -> Result<PollResponse, ApiError> {
    if request.rid <= 0 {
        return Err(ApiError::validation_failed("'rid' must be positive"));
    }
    if request.pending.is_empty() {
        return Err(ApiError::missing_field("pending"));
    }

    let outcome = coordinator.poll(request.rid, &request.pending).await?;

    tracing::debug!(
        rid = request.rid,
        resolved = outcome.results.len(),
        still_pending = outcome.pending.len(),
        errors = outcome.errors.len(),
        "Poll handled"
    );

    Ok(PollResponse {
        rid: request.rid,
        results: outcome
            .results
            .into_iter()
            .map(|(source_id, hits)| (source_id, hits.into_iter().map(WireHit::from).collect()))
            .collect(),
        pending: outcome
            .pending
            .into_iter()
            .map(|(source_id, job)| {
                (
                    source_id,
                    PendingEntry {
                        token: job.token.as_str().to_string(),
                        after_ms: job.after_ms,
                    },
                )
            })
            .collect(),
        errors: outcome.errors,
    })
}

// ============================================================================
// TESTS
// ============================================================================
