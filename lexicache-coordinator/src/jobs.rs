//! Job coordination for the asynchronous poll protocol.
//!
//! Remote terminology lookups are slow and rate limited, so a cache
//! miss never blocks a search call. Instead the first caller registers
//! a job and hands its token to the client; subsequent poll calls
//! drive the job forward. All job state lives in the cache medium --
//! there is no coordinator-side table, and a job that nobody completes
//! simply expires with its TTL.
//!
//! Polls batch aggressively: jobs sharing the same underlying remote
//! request (`lookup_type` + params + query) are dispatched once per
//! poll cycle and the results fanned back out per source. A failed
//! dispatch only affects jobs of that one batch; other batches in the
//! same poll proceed normally.

use crate::constants::{
    DEFAULT_DONE_TTL_SECS, DEFAULT_JOB_TTL_SECS, DEFAULT_RESULT_TTL_SECS, DEFAULT_RETRY_AFTER_MS,
};
use lexicache_core::{
    now_unix, CacheKey, Job, JobToken, LexicacheResult, RemoteParams, RemoteSearchClient,
    SearchHit, SourceRegistry,
};
use lexicache_storage::CacheStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for the job coordinator.
#[derive(Debug, Clone)]
pub struct JobCoordinatorConfig {
    /// TTL of a job envelope from creation until its first completed
    /// dispatch (default: 300 seconds).
    pub job_ttl: Duration,

    /// TTL of a job envelope after completion; only needs to outlive
    /// duplicate polls for the same request (default: 60 seconds).
    pub done_ttl: Duration,

    /// TTL of cached remote search results (default: 1 day).
    pub result_ttl: Duration,

    /// Advisory retry hint attached to jobs left pending by a failed
    /// dispatch (default: 2000 ms).
    pub retry_after_ms: u64,
}

impl Default for JobCoordinatorConfig {
    fn default() -> Self {
        Self {
            job_ttl: Duration::from_secs(DEFAULT_JOB_TTL_SECS),
            done_ttl: Duration::from_secs(DEFAULT_DONE_TTL_SECS),
            result_ttl: Duration::from_secs(DEFAULT_RESULT_TTL_SECS),
            retry_after_ms: DEFAULT_RETRY_AFTER_MS,
        }
    }
}

impl JobCoordinatorConfig {
    /// Create a JobCoordinatorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEXICACHE_JOB_TTL_SECS`: Job TTL before first completion (default: 300)
    /// - `LEXICACHE_DONE_TTL_SECS`: Job TTL after completion (default: 60)
    /// - `LEXICACHE_RESULT_TTL_SECS`: Remote result TTL (default: 86400)
    /// - `LEXICACHE_RETRY_AFTER_MS`: Retry hint for failed dispatches (default: 2000)
    pub fn from_env() -> Self {
        let job_ttl = Duration::from_secs(
            std::env::var("LEXICACHE_JOB_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_JOB_TTL_SECS),
        );

        let done_ttl = Duration::from_secs(
            std::env::var("LEXICACHE_DONE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DONE_TTL_SECS),
        );

        let result_ttl = Duration::from_secs(
            std::env::var("LEXICACHE_RESULT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RESULT_TTL_SECS),
        );

        let retry_after_ms = std::env::var("LEXICACHE_RETRY_AFTER_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_MS);

        Self {
            job_ttl,
            done_ttl,
            result_ttl,
            retry_after_ms,
        }
    }

    /// Configuration for development/testing with short TTLs.
    pub fn development() -> Self {
        Self {
            job_ttl: Duration::from_secs(30),
            done_ttl: Duration::from_secs(10),
            result_ttl: Duration::from_secs(60),
            retry_after_ms: 100,
        }
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// A job still waiting for results after this poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub token: JobToken,
    /// Milliseconds the client should wait before polling again.
    pub after_ms: u64,
}

/// Per-source outcome of one poll cycle. Sub-request failures are
/// embedded per source; the batch itself never fails except on a
/// cache outage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutcome {
    /// Completed lookups, keyed by source id.
    pub results: BTreeMap<String, Vec<SearchHit>>,
    /// Jobs to poll again, keyed by source id.
    pub pending: BTreeMap<String, PendingJob>,
    /// Soft per-source errors (`job_not_found`, `unknown_source`, ...).
    pub errors: BTreeMap<String, String>,
}

/// One resolved job, ready for grouping into a dispatch batch.
struct ResolvedJob {
    source_id: String,
    token: JobToken,
    job: Job,
    remote: RemoteParams,
}

/// Batching identity: jobs with equal groups share one dispatch.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct DispatchGroup {
    lookup_type: String,
    params: BTreeMap<String, String>,
    query: String,
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Drives the poll protocol over the cache store.
pub struct JobCoordinator {
    store: CacheStore,
    registry: Arc<dyn SourceRegistry>,
    remote: Arc<dyn RemoteSearchClient>,
    config: JobCoordinatorConfig,
}

impl JobCoordinator {
    pub fn new(
        store: CacheStore,
        registry: Arc<dyn SourceRegistry>,
        remote: Arc<dyn RemoteSearchClient>,
        config: JobCoordinatorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            remote,
            config,
        }
    }

    /// Register a deferred lookup and return its poll token.
    pub async fn create_job(
        &self,
        request_id: i64,
        source_id: &str,
        query: &str,
    ) -> LexicacheResult<JobToken> {
        let token = JobToken::generate();
        let job = Job::new(request_id, source_id, query, now_unix());
        self.write_job(&token, &job, self.config.job_ttl).await?;

        tracing::debug!(
            source_id,
            token = %token,
            request_id,
            "Job created"
        );
        Ok(token)
    }

    /// Run one poll cycle over `pending`, a map of source id to token.
    ///
    /// Every token is resolved independently; tokens that cannot be
    /// resolved produce a soft per-source error and never fail the
    /// batch. The remaining jobs are grouped by underlying remote
    /// request and dispatched at most once per group.
    pub async fn poll(
        &self,
        request_id: i64,
        pending: &BTreeMap<String, String>,
    ) -> LexicacheResult<PollOutcome> {
        let mut outcome = PollOutcome::default();
        let mut to_dispatch: Vec<ResolvedJob> = Vec::new();

        for (source_id, raw_token) in pending {
            let token = JobToken::from_raw(raw_token.clone());
            match self.resolve(request_id, source_id, &token).await? {
                Resolution::Error(message) => {
                    outcome.errors.insert(source_id.clone(), message);
                }
                Resolution::Cached(hits) => {
                    outcome.results.insert(source_id.clone(), hits);
                }
                Resolution::Dispatch(resolved) => to_dispatch.push(resolved),
            }
        }

        let mut groups: BTreeMap<DispatchGroup, Vec<ResolvedJob>> = BTreeMap::new();
        for resolved in to_dispatch {
            let group = DispatchGroup {
                lookup_type: resolved.remote.lookup_type.clone(),
                params: resolved.remote.params.clone(),
                query: resolved.job.query.clone(),
            };
            groups.entry(group).or_default().push(resolved);
        }

        for (group, members) in groups {
            self.dispatch_group(&group, members, &mut outcome).await?;
        }

        Ok(outcome)
    }

    /// Resolve one token to its job, or a soft error, or a cached
    /// result that requires no dispatch.
    async fn resolve(
        &self,
        request_id: i64,
        source_id: &str,
        token: &JobToken,
    ) -> LexicacheResult<Resolution> {
        let job_key = CacheKey::job(token);
        let job: Job = match self.store.get_payload(&job_key).await? {
            Some(payload) => match serde_json::from_value(payload) {
                Ok(job) => job,
                Err(_) => return Ok(Resolution::Error("job_not_found".to_string())),
            },
            // Expired and never-existed are indistinguishable on
            // purpose: the token alone must not leak job lifetimes.
            None => return Ok(Resolution::Error("job_not_found".to_string())),
        };

        if job.request_id != request_id || job.source_id != source_id {
            return Ok(Resolution::Error("job_not_found".to_string()));
        }

        let descriptor = match self.registry.resolve(source_id) {
            Some(descriptor) => descriptor,
            None => return Ok(Resolution::Error("unknown_source".to_string())),
        };
        let remote = match descriptor.remote {
            Some(remote) => remote,
            None => return Ok(Resolution::Error("unsupported_source".to_string())),
        };

        // A completed dispatch leaves its results under the r: key;
        // serve them straight from the cache without re-dispatching.
        let result_key = CacheKey::remote(source_id, &job.query, &remote.params);
        if let Some(payload) = self.store.get_payload(&result_key).await? {
            let hits: Vec<SearchHit> = serde_json::from_value(payload).unwrap_or_default();
            return Ok(Resolution::Cached(hits));
        }

        // A completed job whose result has since expired is over; the
        // token does not entitle a fresh dispatch. A new search mints a
        // new job instead.
        if job.done {
            return Ok(Resolution::Error("job_not_found".to_string()));
        }

        Ok(Resolution::Dispatch(ResolvedJob {
            source_id: source_id.to_string(),
            token: token.clone(),
            job,
            remote,
        }))
    }

    /// Dispatch one group and fan the outcome out to its members.
    async fn dispatch_group(
        &self,
        group: &DispatchGroup,
        members: Vec<ResolvedJob>,
        outcome: &mut PollOutcome,
    ) -> LexicacheResult<()> {
        match self
            .remote
            .search(&group.lookup_type, &group.query, &group.params)
            .await
        {
            Ok(hits) => {
                tracing::debug!(
                    lookup_type = %group.lookup_type,
                    hit_count = hits.len(),
                    member_count = members.len(),
                    "Remote dispatch completed"
                );
                let payload = serde_json::to_value(&hits).map_err(|e| {
                    lexicache_core::CacheError::Serialization {
                        key: group.lookup_type.clone(),
                        reason: e.to_string(),
                    }
                })?;
                for member in members {
                    let result_key =
                        CacheKey::remote(&member.source_id, &member.job.query, &member.remote.params);
                    self.store
                        .set_payload(
                            &result_key,
                            payload.clone(),
                            self.config.result_ttl.as_secs() as i64,
                            None,
                        )
                        .await?;
                    self.write_job(
                        &member.token,
                        &member.job.completed(),
                        self.config.done_ttl,
                    )
                    .await?;
                    outcome.results.insert(member.source_id, hits.clone());
                }
            }
            Err(e) => {
                tracing::warn!(
                    lookup_type = %group.lookup_type,
                    member_count = members.len(),
                    error = %e,
                    "Remote dispatch failed, members stay pending"
                );
                let message = e.to_string();
                for member in members {
                    outcome.pending.insert(
                        member.source_id.clone(),
                        PendingJob {
                            token: member.token,
                            after_ms: self.config.retry_after_ms,
                        },
                    );
                    outcome.errors.insert(member.source_id, message.clone());
                }
            }
        }
        Ok(())
    }

    async fn write_job(&self, token: &JobToken, job: &Job, ttl: Duration) -> LexicacheResult<()> {
        let key = CacheKey::job(token);
        let payload =
            serde_json::to_value(job).map_err(|e| lexicache_core::CacheError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        self.store
            .set_payload(&key, payload, ttl.as_secs() as i64, None)
            .await
    }
}

enum Resolution {
    /// Soft per-source error message.
    Error(String),
    /// Results already cached, no dispatch needed.
    Cached(Vec<SearchHit>),
    /// Job needs a dispatch this cycle.
    Dispatch(ResolvedJob),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lexicache_core::{RemoteError, SourceDescriptor, SourceKind};
    use lexicache_storage::LogCacheBackend;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct MapRegistry {
        sources: HashMap<String, SourceDescriptor>,
    }

    impl SourceRegistry for MapRegistry {
        fn resolve(&self, source_id: &str) -> Option<SourceDescriptor> {
            self.sources.get(source_id).cloned()
        }

        fn source_ids(&self) -> Vec<String> {
            self.sources.keys().cloned().collect()
        }
    }

    struct ScriptedClient {
        calls: AtomicU32,
        fail: AtomicBool,
        fail_lookup_type: std::sync::Mutex<Option<String>>,
    }

    impl ScriptedClient {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: AtomicBool::new(false),
                fail_lookup_type: std::sync::Mutex::new(None),
            }
        }

        fn fails_for(&self, lookup_type: &str) -> bool {
            self.fail.load(Ordering::SeqCst)
                || self
                    .fail_lookup_type
                    .lock()
                    .expect("lock should not be poisoned")
                    .as_deref()
                    == Some(lookup_type)
        }
    }

    #[async_trait::async_trait]
    impl RemoteSearchClient for ScriptedClient {
        async fn search(
            &self,
            lookup_type: &str,
            query: &str,
            _params: &BTreeMap<String, String>,
        ) -> Result<Vec<SearchHit>, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails_for(lookup_type) {
                return Err(RemoteError::LookupFailed {
                    lookup_type: lookup_type.to_string(),
                    reason: "upstream timeout".to_string(),
                });
            }
            Ok(vec![SearchHit {
                system: "http://remote.example".to_string(),
                code: "c1".to_string(),
                display: format!("hit for {query}"),
                score: 0.9,
                hit_type: None,
            }])
        }
    }

    fn remote_source(source_id: &str, lookup_type: &str) -> SourceDescriptor {
        SourceDescriptor {
            source_id: source_id.to_string(),
            doc_version: 1,
            kind: SourceKind::RemoteLookup,
            title: source_id.to_string(),
            description: None,
            remote: Some(RemoteParams {
                lookup_type: lookup_type.to_string(),
                params: BTreeMap::new(),
            }),
        }
    }

    fn harness(sources: Vec<SourceDescriptor>) -> (JobCoordinator, Arc<ScriptedClient>) {
        let store = CacheStore::new(Arc::new(LogCacheBackend::new()));
        let registry = Arc::new(MapRegistry {
            sources: sources
                .into_iter()
                .map(|s| (s.source_id.clone(), s))
                .collect(),
        });
        let client = Arc::new(ScriptedClient::new());
        let coordinator = JobCoordinator::new(
            store,
            registry,
            client.clone(),
            JobCoordinatorConfig::default(),
        );
        (coordinator, client)
    }

    async fn pending_map(
        coordinator: &JobCoordinator,
        request_id: i64,
        jobs: &[(&str, &str)],
    ) -> BTreeMap<String, String> {
        let mut pending = BTreeMap::new();
        for (source_id, query) in jobs {
            let token = coordinator
                .create_job(request_id, source_id, query)
                .await
                .expect("create_job should succeed");
            pending.insert(source_id.to_string(), token.as_str().to_string());
        }
        pending
    }

    #[tokio::test]
    async fn test_same_lookup_type_jobs_share_one_dispatch() {
        let (coordinator, client) = harness(vec![
            remote_source("src_a", "concept-search"),
            remote_source("src_b", "concept-search"),
            remote_source("src_c", "concept-search"),
        ]);
        let pending = pending_map(
            &coordinator,
            7,
            &[
                ("src_a", "heart failure"),
                ("src_b", "heart failure"),
                ("src_c", "heart failure"),
            ],
        )
        .await;

        let outcome = coordinator.poll(7, &pending).await.expect("poll should succeed");

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.pending.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_done_job_with_expired_result_is_not_redispatched() {
        let (coordinator, client) = harness(vec![remote_source("src_a", "concept-search")]);

        // A finished job whose cached result has already aged out: the
        // job record outlives the result, but polling it must not
        // trigger a fresh dispatch.
        let token = JobToken::generate();
        let job = Job::new(7, "src_a", "heart failure", now_unix()).completed();
        coordinator
            .write_job(&token, &job, Duration::from_secs(60))
            .await
            .expect("write_job should succeed");

        let mut pending = BTreeMap::new();
        pending.insert("src_a".to_string(), token.as_str().to_string());

        let outcome = coordinator.poll(7, &pending).await.expect("poll should succeed");

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.results.is_empty());
        assert!(outcome.pending.is_empty());
        assert_eq!(
            outcome.errors.get("src_a").map(String::as_str),
            Some("job_not_found")
        );
    }

    #[tokio::test]
    async fn test_distinct_queries_dispatch_separately() {
        let (coordinator, client) = harness(vec![
            remote_source("src_a", "concept-search"),
            remote_source("src_b", "concept-search"),
        ]);
        let pending = pending_map(
            &coordinator,
            7,
            &[("src_a", "insulin"), ("src_b", "metformin")],
        )
        .await;

        coordinator.poll(7, &pending).await.expect("poll should succeed");

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_dispatch_leaves_all_members_pending() {
        let (coordinator, client) = harness(vec![
            remote_source("src_a", "concept-search"),
            remote_source("src_b", "concept-search"),
            remote_source("src_c", "concept-search"),
        ]);
        client.fail.store(true, Ordering::SeqCst);
        let pending = pending_map(
            &coordinator,
            7,
            &[("src_a", "q"), ("src_b", "q"), ("src_c", "q")],
        )
        .await;

        let outcome = coordinator.poll(7, &pending).await.expect("poll should succeed");

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.pending.len(), 3);
        assert_eq!(outcome.errors.len(), 3);
        let hints: Vec<u64> = outcome.pending.values().map(|p| p.after_ms).collect();
        assert!(hints.iter().all(|h| *h == hints[0]));

        // Nothing was marked done, so the next poll retries the dispatch.
        client.fail.store(false, Ordering::SeqCst);
        let retry = coordinator.poll(7, &pending).await.expect("poll should succeed");
        assert_eq!(retry.results.len(), 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_isolated_per_lookup_type() {
        let (coordinator, client) = harness(vec![
            remote_source("src_a", "concept-search"),
            remote_source("src_b", "code-search"),
        ]);
        *client
            .fail_lookup_type
            .lock()
            .expect("lock should not be poisoned") = Some("code-search".to_string());
        let pending = pending_map(&coordinator, 7, &[("src_a", "q"), ("src_b", "q")]).await;

        let outcome = coordinator.poll(7, &pending).await.expect("poll should succeed");

        // The concept-search group completed even though code-search failed.
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results.contains_key("src_a"));
        assert_eq!(outcome.pending.len(), 1);
        assert!(outcome.pending.contains_key("src_b"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_completed_job_served_from_cache() {
        let (coordinator, client) = harness(vec![remote_source("src_a", "concept-search")]);
        let pending = pending_map(&coordinator, 7, &[("src_a", "q")]).await;

        coordinator.poll(7, &pending).await.expect("poll should succeed");
        let second = coordinator.poll(7, &pending).await.expect("poll should succeed");

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.results.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_soft_error() {
        let (coordinator, _client) = harness(vec![remote_source("src_a", "concept-search")]);
        let mut pending = BTreeMap::new();
        pending.insert("src_a".to_string(), "no-such-token".to_string());

        let outcome = coordinator.poll(7, &pending).await.expect("poll should succeed");

        assert_eq!(outcome.errors.get("src_a").map(String::as_str), Some("job_not_found"));
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_request_id_is_soft_error() {
        let (coordinator, _client) = harness(vec![remote_source("src_a", "concept-search")]);
        let pending = pending_map(&coordinator, 7, &[("src_a", "q")]).await;

        let outcome = coordinator.poll(8, &pending).await.expect("poll should succeed");

        assert_eq!(outcome.errors.get("src_a").map(String::as_str), Some("job_not_found"));
    }

    #[tokio::test]
    async fn test_unknown_source_is_soft_error() {
        let (coordinator, _client) = harness(vec![remote_source("src_a", "concept-search")]);
        let token = coordinator
            .create_job(7, "src_gone", "q")
            .await
            .expect("create_job should succeed");
        let mut pending = BTreeMap::new();
        pending.insert("src_gone".to_string(), token.as_str().to_string());

        let outcome = coordinator.poll(7, &pending).await.expect("poll should succeed");

        assert_eq!(
            outcome.errors.get("src_gone").map(String::as_str),
            Some("unknown_source")
        );
    }

    #[tokio::test]
    async fn test_local_source_is_unsupported_for_polling() {
        let mut local = remote_source("src_local", "unused");
        local.remote = None;
        local.kind = SourceKind::ValueList;
        let (coordinator, _client) = harness(vec![local]);
        let pending = pending_map(&coordinator, 7, &[("src_local", "q")]).await;

        let outcome = coordinator.poll(7, &pending).await.expect("poll should succeed");

        assert_eq!(
            outcome.errors.get("src_local").map(String::as_str),
            Some("unsupported_source")
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = JobCoordinatorConfig::default();
        assert_eq!(config.job_ttl, Duration::from_secs(DEFAULT_JOB_TTL_SECS));
        assert_eq!(config.done_ttl, Duration::from_secs(DEFAULT_DONE_TTL_SECS));
        assert_eq!(
            config.result_ttl,
            Duration::from_secs(DEFAULT_RESULT_TTL_SECS)
        );
        assert_eq!(config.retry_after_ms, DEFAULT_RETRY_AFTER_MS);
    }

    #[test]
    fn test_config_development() {
        let config = JobCoordinatorConfig::development();
        assert!(config.job_ttl < JobCoordinatorConfig::default().job_ttl);
        assert_eq!(config.retry_after_ms, 100);
    }
}
