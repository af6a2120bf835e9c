//! The uniform cache store.
//!
//! `CacheStore` is the public cache API: payload get/set with TTL
//! semantics enforced in one place, the `remember_or_build` dogpile
//! primitive, and pruning. It is indifferent to which backend is
//! active.

use lexicache_core::{
    now_unix, CacheEnvelope, CacheKey, LeaseOutcome, LexicacheResult,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::backend::{CacheBackend, PruneReport, PrunePolicy};

/// Default lease duration for `remember_or_build`.
///
/// Builders run within a single request, so leases are short: a
/// caller that dies mid-build only delays competitors by this long.
pub const DEFAULT_BUILD_LEASE: Duration = Duration::from_secs(5);

/// Outcome of `remember_or_build`.
///
/// `Pending` is the dogpile sentinel: another caller holds the build
/// lease, and this caller should poll again later instead of
/// blocking. It is distinct from both an empty payload and an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Remembered {
    /// The payload was already cached.
    Hit(serde_json::Value),
    /// This caller won the lease causing the payload to be built and cached.
    Built(serde_json::Value),
    /// Another caller is building; try again later.
    Pending,
}

impl Remembered {
    /// The payload, if this outcome carries one.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Remembered::Hit(v) | Remembered::Built(v) => Some(v),
            Remembered::Pending => None,
        }
    }

    /// Returns true for the pending sentinel.
    pub fn is_pending(&self) -> bool {
        matches!(self, Remembered::Pending)
    }
}

/// Hit/miss counters for one store instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStoreStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStoreStats {
    /// Hit rate between 0.0 and 1.0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Backend-agnostic cache store.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CacheStore {
    /// Create a store over a backend.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The stored payload, or `None` if absent or expired.
    ///
    /// A miss is never an error; backend failures still propagate.
    pub async fn get_payload(&self, key: &CacheKey) -> LexicacheResult<Option<serde_json::Value>> {
        match self.backend.get_envelope(key).await? {
            Some(envelope) if envelope.is_live(now_unix()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(envelope.payload))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store a payload with a TTL in seconds.
    ///
    /// `ttl_secs == 0` marks the entry immortal; use this only with
    /// version-qualified keys, since a version change produces a new
    /// key instead of an update.
    pub async fn set_payload(
        &self,
        key: &CacheKey,
        payload: serde_json::Value,
        ttl_secs: i64,
        meta: Option<serde_json::Value>,
    ) -> LexicacheResult<()> {
        let envelope = CacheEnvelope::new(payload, ttl_secs, now_unix(), meta);
        self.backend.set_envelope(key, envelope).await
    }

    /// Get the payload or build it under a short advisory lease.
    ///
    /// On a hit the cached payload is returned. On a miss the store
    /// tries to acquire a lease on `lock:<key>`: if acquired, the
    /// builder runs exactly once, the result is stored with `ttl_secs`
    /// and the lease is released on every exit path -- including
    /// builder failure, in which case nothing is cached and the error
    /// propagates to this caller only. If the lease is unavailable the
    /// pending sentinel is returned instead of blocking.
    ///
    /// The lease is optimistic, not exclusive: builders must be safe
    /// to run redundantly for the same key.
    pub async fn remember_or_build<F, Fut>(
        &self,
        key: &CacheKey,
        ttl_secs: i64,
        meta: Option<serde_json::Value>,
        lease: Duration,
        builder: F,
    ) -> LexicacheResult<Remembered>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LexicacheResult<serde_json::Value>>,
    {
        if let Some(payload) = self.get_payload(key).await? {
            return Ok(Remembered::Hit(payload));
        }

        let lock_key = CacheKey::lock(key);
        let owner_id = Uuid::now_v7().simple().to_string();
        match self.backend.acquire_lock(&lock_key, &owner_id, lease).await? {
            LeaseOutcome::Unavailable => {
                tracing::debug!(key = %key, "Build lease unavailable, reporting pending");
                return Ok(Remembered::Pending);
            }
            LeaseOutcome::Acquired(_) => {}
        }

        // Another caller may have finished between our miss and the
        // lease grant; re-check before spending the build.
        match self.get_payload(key).await {
            Ok(Some(payload)) => {
                self.backend.release_lock(&lock_key, &owner_id).await?;
                return Ok(Remembered::Hit(payload));
            }
            Ok(None) => {}
            Err(e) => {
                self.backend.release_lock(&lock_key, &owner_id).await?;
                return Err(e);
            }
        }

        let payload = match builder().await {
            Ok(payload) => payload,
            Err(e) => {
                self.backend.release_lock(&lock_key, &owner_id).await?;
                return Err(e);
            }
        };

        // Store before releasing: a competitor that grabs the lease
        // after release must find the payload at the double-check read,
        // not a miss that triggers a second build.
        let stored = self.set_payload(key, payload.clone(), ttl_secs, meta).await;
        let released = self.backend.release_lock(&lock_key, &owner_id).await;
        stored?;
        released?;
        tracing::debug!(key = %key, ttl_secs, "Built and cached payload");
        Ok(Remembered::Built(payload))
    }

    /// Run one bounded pruning pass with the given policy.
    pub async fn prune(&self, policy: &PrunePolicy) -> LexicacheResult<PruneReport> {
        self.backend.prune(policy).await
    }

    /// Hit/miss counters since this store was created.
    pub fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_backend::LogCacheBackend;
    use lexicache_core::{BuildError, LexicacheError};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU32;

    fn new_store() -> CacheStore {
        CacheStore::new(Arc::new(LogCacheBackend::new()))
    }

    fn remote_key(source: &str, query: &str) -> CacheKey {
        CacheKey::remote(source, query, &BTreeMap::new())
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let store = new_store();
        let key = remote_key("s1", "insulin");

        store
            .set_payload(&key, json!({"hits": [1, 2]}), 60, None)
            .await
            .expect("set should succeed");

        let payload = store
            .get_payload(&key)
            .await
            .expect("get should succeed")
            .expect("payload should exist");
        assert_eq!(payload, json!({"hits": [1, 2]}));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let backend = Arc::new(LogCacheBackend::new());
        let store = CacheStore::new(backend.clone());
        let key = remote_key("s1", "expired");

        // Write an already-expired envelope directly at the backend.
        let envelope = CacheEnvelope::new(json!("stale"), 10, now_unix() - 100, None);
        backend
            .set_envelope(&key, envelope)
            .await
            .expect("set should succeed");

        assert!(store
            .get_payload(&key)
            .await
            .expect("get should succeed")
            .is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_immortal_entry_stays_retrievable() {
        let store = new_store();
        let key = CacheKey::index("s1", 42);

        store
            .set_payload(&key, json!("artifact"), 0, None)
            .await
            .expect("set should succeed");

        let payload = store
            .get_payload(&key)
            .await
            .expect("get should succeed")
            .expect("payload should exist");
        assert_eq!(payload, json!("artifact"));
    }

    #[tokio::test]
    async fn test_remember_builds_once() {
        let store = new_store();
        let key = remote_key("s1", "build me");
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let outcome = store
                .remember_or_build(&key, 60, None, DEFAULT_BUILD_LEASE, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("built"))
                })
                .await
                .expect("remember should succeed");
            assert_eq!(outcome.payload(), Some(&json!("built")));
        }

        // Idempotent: the builder only ever ran for the first call.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_builder_failure_caches_nothing() {
        let store = new_store();
        let key = remote_key("s1", "fails");

        let result = store
            .remember_or_build(&key, 60, None, DEFAULT_BUILD_LEASE, || async {
                Err(LexicacheError::Build(BuildError::BuildFailed {
                    source_id: "s1".to_string(),
                    reason: "boom".to_string(),
                }))
            })
            .await;
        assert!(result.is_err());

        // Nothing cached, and the lease was released so a retry can
        // build immediately.
        let outcome = store
            .remember_or_build(&key, 60, None, DEFAULT_BUILD_LEASE, || async {
                Ok(json!("second try"))
            })
            .await
            .expect("retry should succeed");
        assert_eq!(outcome, Remembered::Built(json!("second try")));
    }

    #[tokio::test]
    async fn test_contended_build_returns_pending() {
        let backend = Arc::new(LogCacheBackend::new());
        let store = CacheStore::new(backend.clone());
        let key = remote_key("s1", "contended");

        // Simulate a competing caller holding the build lease.
        let lock_key = CacheKey::lock(&key);
        let outcome = backend
            .acquire_lock(&lock_key, "competitor", Duration::from_secs(30))
            .await
            .expect("acquire should succeed");
        assert!(outcome.is_acquired());

        let ran = Arc::new(AtomicU32::new(0));
        let remembered = {
            let ran = ran.clone();
            store
                .remember_or_build(&key, 60, None, DEFAULT_BUILD_LEASE, move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("must not be built"))
                })
                .await
                .expect("remember should succeed")
        };
        assert!(remembered.is_pending());
        // The builder never ran while the lease was held elsewhere.
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    /// Backend that pauses the first result write, exposing the window
    /// between build completion and storage.
    struct StallingBackend {
        inner: crate::file_backend::FileCacheBackend,
        entered: tokio::sync::Notify,
        resume: tokio::sync::Notify,
        stalled: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl CacheBackend for StallingBackend {
        async fn get_envelope(&self, key: &CacheKey) -> LexicacheResult<Option<CacheEnvelope>> {
            self.inner.get_envelope(key).await
        }

        async fn set_envelope(&self, key: &CacheKey, envelope: CacheEnvelope) -> LexicacheResult<()> {
            if key.category() == lexicache_core::KeyCategory::Remote
                && !self.stalled.swap(true, Ordering::SeqCst)
            {
                self.entered.notify_one();
                self.resume.notified().await;
            }
            self.inner.set_envelope(key, envelope).await
        }

        async fn acquire_lock(
            &self,
            lock_key: &CacheKey,
            owner_id: &str,
            lease: Duration,
        ) -> LexicacheResult<LeaseOutcome> {
            self.inner.acquire_lock(lock_key, owner_id, lease).await
        }

        async fn release_lock(&self, lock_key: &CacheKey, owner_id: &str) -> LexicacheResult<()> {
            self.inner.release_lock(lock_key, owner_id).await
        }

        async fn prune(&self, policy: &PrunePolicy) -> LexicacheResult<PruneReport> {
            self.inner.prune(policy).await
        }
    }

    #[tokio::test]
    async fn test_lease_held_until_payload_stored() {
        let dir = tempfile::TempDir::new().expect("tempdir should succeed");
        let backend = Arc::new(StallingBackend {
            inner: crate::file_backend::FileCacheBackend::new(dir.path())
                .expect("backend should open"),
            entered: tokio::sync::Notify::new(),
            resume: tokio::sync::Notify::new(),
            stalled: std::sync::atomic::AtomicBool::new(false),
        });
        let store = CacheStore::new(backend.clone());
        let key = remote_key("s1", "stalled");

        let first = tokio::spawn({
            let store = store.clone();
            let key = key.clone();
            async move {
                store
                    .remember_or_build(&key, 60, None, DEFAULT_BUILD_LEASE, || async {
                        Ok(json!("first"))
                    })
                    .await
            }
        });
        backend.entered.notified().await;

        // The first caller has built and is mid-store. The lease must
        // still be held, so a competitor neither builds nor misses its
        // way into a second build.
        let ran = Arc::new(AtomicU32::new(0));
        let competitor = {
            let ran = ran.clone();
            store
                .remember_or_build(&key, 60, None, DEFAULT_BUILD_LEASE, move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("second"))
                })
                .await
                .expect("remember should succeed")
        };
        assert!(competitor.is_pending());
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        backend.resume.notify_one();
        let first = first
            .await
            .expect("task should join")
            .expect("remember should succeed");
        assert_eq!(first, Remembered::Built(json!("first")));
        assert_eq!(
            store.get_payload(&key).await.expect("get should succeed"),
            Some(json!("first"))
        );
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let store = new_store();
        let key = remote_key("s1", "stats");

        assert!(store
            .get_payload(&key)
            .await
            .expect("get should succeed")
            .is_none());
        store
            .set_payload(&key, json!(1), 60, None)
            .await
            .expect("set should succeed");
        store
            .get_payload(&key)
            .await
            .expect("get should succeed");

        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
