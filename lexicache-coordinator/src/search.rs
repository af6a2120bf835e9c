//! Search fan-out across sources.
//!
//! One search call touches many sources, and each source resolves
//! independently: local sources answer from their built index, remote
//! sources answer from cache or mint a poll job. A failing source
//! contributes a per-source error; partial results always beat total
//! failure.

use crate::build::BuildCoordinator;
use crate::jobs::JobCoordinator;
use lexicache_core::{
    BuildArtifact, CacheKey, IndexEntry, JobToken, LexicacheError, LexicacheResult, SearchHit,
    SourceDescriptor, SourceRegistry,
};
use lexicache_storage::CacheStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counters for one search call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    /// Sources the call fanned out to.
    pub sources: usize,
    /// Cumulative cache hits on the backing store.
    pub cache_hits: u64,
    /// Cumulative cache misses on the backing store.
    pub cache_misses: u64,
}

/// Per-source outcome of one search call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    /// Hits per source, best first.
    pub results: BTreeMap<String, Vec<SearchHit>>,
    /// Poll tokens for sources whose lookup was deferred.
    pub pending: BTreeMap<String, JobToken>,
    /// Soft per-source errors.
    pub errors: BTreeMap<String, String>,
    pub stats: SearchStats,
}

/// Fans a query out across the requested sources.
pub struct SearchCoordinator {
    store: CacheStore,
    registry: Arc<dyn SourceRegistry>,
    builds: BuildCoordinator,
    jobs: Arc<JobCoordinator>,
}

impl SearchCoordinator {
    pub fn new(
        store: CacheStore,
        registry: Arc<dyn SourceRegistry>,
        builds: BuildCoordinator,
        jobs: Arc<JobCoordinator>,
    ) -> Self {
        Self {
            store,
            registry,
            builds,
            jobs,
        }
    }

    /// Search `query` across `source_ids`, or across every registered
    /// source when none are named.
    pub async fn search(
        &self,
        request_id: i64,
        query: &str,
        source_ids: Option<&[String]>,
    ) -> LexicacheResult<SearchOutcome> {
        let source_ids: Vec<String> = match source_ids {
            Some(ids) => ids.to_vec(),
            None => self.registry.source_ids(),
        };

        let mut outcome = SearchOutcome::default();
        outcome.stats.sources = source_ids.len();

        for source_id in &source_ids {
            let descriptor = match self.registry.resolve(source_id) {
                Some(descriptor) => descriptor,
                None => {
                    outcome
                        .errors
                        .insert(source_id.clone(), "unknown_source".to_string());
                    continue;
                }
            };

            if descriptor.remote.is_some() {
                self.search_remote(request_id, query, &descriptor, &mut outcome)
                    .await?;
            } else {
                self.search_local(query, &descriptor, &mut outcome).await?;
            }
        }

        let cache = self.store.stats();
        outcome.stats.cache_hits = cache.hits;
        outcome.stats.cache_misses = cache.misses;
        Ok(outcome)
    }

    /// Remote source: cached results or a freshly minted job.
    async fn search_remote(
        &self,
        request_id: i64,
        query: &str,
        descriptor: &SourceDescriptor,
        outcome: &mut SearchOutcome,
    ) -> LexicacheResult<()> {
        // Presence checked by the caller.
        let Some(remote) = &descriptor.remote else {
            return Ok(());
        };
        let result_key = CacheKey::remote(&descriptor.source_id, query, &remote.params);
        if let Some(payload) = self.store.get_payload(&result_key).await? {
            let hits: Vec<SearchHit> = serde_json::from_value(payload).unwrap_or_default();
            outcome.results.insert(descriptor.source_id.clone(), hits);
            return Ok(());
        }

        // Minting is not lease-gated: concurrent identical searches may
        // each register a token. The duplicates converge at poll time,
        // where grouping collapses them into one dispatch and the
        // shared result key satisfies every token afterwards.
        let token = self
            .jobs
            .create_job(request_id, &descriptor.source_id, query)
            .await?;
        outcome.pending.insert(descriptor.source_id.clone(), token);
        Ok(())
    }

    /// Local source: ensure the index is current, then rank entries.
    ///
    /// Build failures stay per-source; only cache outages abort the
    /// whole call.
    async fn search_local(
        &self,
        query: &str,
        descriptor: &SourceDescriptor,
        outcome: &mut SearchOutcome,
    ) -> LexicacheResult<()> {
        if let Err(e) = self.builds.ensure_index(descriptor).await {
            match e {
                LexicacheError::Build(build) => {
                    tracing::warn!(
                        source_id = %descriptor.source_id,
                        error = %build,
                        "Local index unavailable for search"
                    );
                    outcome
                        .errors
                        .insert(descriptor.source_id.clone(), build.to_string());
                    return Ok(());
                }
                other => return Err(other),
            }
        }

        let key = CacheKey::index(&descriptor.source_id, descriptor.doc_version);
        let artifact: BuildArtifact = match self.store.get_payload(&key).await? {
            Some(payload) => serde_json::from_value(payload).map_err(|e| {
                lexicache_core::CacheError::Deserialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            })?,
            // ensure_index just ran; an absent artifact means the
            // backend lost it between write and read.
            None => {
                outcome
                    .errors
                    .insert(descriptor.source_id.clone(), "index_unavailable".to_string());
                return Ok(());
            }
        };

        let hits = rank_entries(query, &artifact.entries);
        outcome.results.insert(descriptor.source_id.clone(), hits);
        Ok(())
    }
}

/// Score index entries against the query and return matches, best
/// first. Matching is case-insensitive over display, code and
/// synonyms.
fn rank_entries(query: &str, entries: &[IndexEntry]) -> Vec<SearchHit> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit> = entries
        .iter()
        .filter_map(|entry| {
            score_entry(&needle, entry).map(|score| SearchHit {
                system: entry.system.clone(),
                code: entry.code.clone(),
                display: entry.display.clone(),
                score,
                hit_type: None,
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

fn score_entry(needle: &str, entry: &IndexEntry) -> Option<f64> {
    let display = entry.display.to_lowercase();
    let code = entry.code.to_lowercase();

    let mut best: Option<f64> = None;
    let mut consider = |score: f64| {
        if best.map_or(true, |b| score > b) {
            best = Some(score);
        }
    };

    if display == *needle || code == *needle {
        consider(1.0);
    } else if display.starts_with(needle) {
        consider(0.8);
    } else if display.contains(needle) {
        consider(0.5);
    }
    for synonym in &entry.synonyms {
        let synonym = synonym.to_lowercase();
        if synonym == *needle {
            consider(0.9);
        } else if synonym.contains(needle) {
            consider(0.4);
        }
    }
    best
}

// =============================================================================
// TESTS
// =============================================================================
