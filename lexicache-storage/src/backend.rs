//! Cache backend trait and pruning types.
//!
//! All backends implement the same contract; only the storage medium
//! differs. Backends store envelopes raw -- TTL interpretation lives
//! in [`crate::CacheStore`], which treats an expired envelope as a
//! miss -- while pruning uses write age so that dead entries and
//! superseded records are eventually removed from the medium itself.

use async_trait::async_trait;
use lexicache_core::{CacheEnvelope, CacheKey, KeyCategory, LeaseOutcome, LexicacheResult};
use std::time::Duration;

/// Per-category age thresholds for pruning, in seconds.
///
/// Categories are independently configurable because immutable index
/// artifacts should live far longer than remote-search caches, and
/// lock records are garbage minutes after their lease expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunePolicy {
    /// Delete lock records older than this many seconds.
    pub lock_max_age_secs: i64,
    /// Delete remote-result (and job) entries older than this.
    pub remote_max_age_secs: i64,
    /// Delete index artifacts older than this.
    pub index_max_age_secs: i64,
    /// Maximum entries removed per pass, to bound maintenance latency.
    pub batch_size: usize,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            lock_max_age_secs: 300,                // 5 minutes
            remote_max_age_secs: 7 * 24 * 3600,    // 1 week
            index_max_age_secs: 180 * 24 * 3600,   // ~6 months of orphans
            batch_size: 500,
        }
    }
}

impl PrunePolicy {
    /// The age threshold for a key category.
    pub fn max_age_for(&self, category: KeyCategory) -> i64 {
        match category {
            KeyCategory::Lock => self.lock_max_age_secs,
            KeyCategory::Remote => self.remote_max_age_secs,
            KeyCategory::Index => self.index_max_age_secs,
        }
    }
}

/// Deletion counts per key category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub lock: u64,
    pub remote: u64,
    pub index: u64,
}

impl CategoryCounts {
    /// Bump the counter for one category.
    pub fn bump(&mut self, category: KeyCategory) {
        match category {
            KeyCategory::Lock => self.lock += 1,
            KeyCategory::Remote => self.remote += 1,
            KeyCategory::Index => self.index += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.lock + self.remote + self.index
    }
}

/// Outcome of one bounded pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Entries examined this pass.
    pub scanned: u64,
    /// Entries deleted, by category.
    pub deleted: CategoryCounts,
    /// True when the pass stopped at `batch_size` with work remaining.
    pub truncated: bool,
}

/// Contract implemented by every cache backend.
///
/// `acquire_lock`/`release_lock` take the already-wrapped `lock:` key.
/// Acquisition is best-effort and non-blocking: an unavailable lock is
/// reported as [`LeaseOutcome::Unavailable`], never waited on.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Latest envelope stored for `key`, expired or not.
    async fn get_envelope(&self, key: &CacheKey) -> LexicacheResult<Option<CacheEnvelope>>;

    /// Store an envelope for `key`, superseding any previous one.
    async fn set_envelope(&self, key: &CacheKey, envelope: CacheEnvelope) -> LexicacheResult<()>;

    /// Try to acquire a time-bounded advisory lease on a lock key.
    async fn acquire_lock(
        &self,
        lock_key: &CacheKey,
        owner_id: &str,
        lease: Duration,
    ) -> LexicacheResult<LeaseOutcome>;

    /// Release a lease if held by `owner_id`. Backends where leases
    /// simply expire may treat this as a no-op.
    async fn release_lock(&self, lock_key: &CacheKey, owner_id: &str) -> LexicacheResult<()>;

    /// Delete entries older than the per-category thresholds, at most
    /// `policy.batch_size` per pass.
    async fn prune(&self, policy: &PrunePolicy) -> LexicacheResult<PruneReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_thresholds_per_category() {
        let policy = PrunePolicy {
            lock_max_age_secs: 60,
            remote_max_age_secs: 1,
            index_max_age_secs: 999_999,
            batch_size: 10,
        };
        assert_eq!(policy.max_age_for(KeyCategory::Lock), 60);
        assert_eq!(policy.max_age_for(KeyCategory::Remote), 1);
        assert_eq!(policy.max_age_for(KeyCategory::Index), 999_999);
    }

    #[test]
    fn test_category_counts_bump_and_total() {
        let mut counts = CategoryCounts::default();
        counts.bump(KeyCategory::Lock);
        counts.bump(KeyCategory::Remote);
        counts.bump(KeyCategory::Remote);
        assert_eq!(counts.lock, 1);
        assert_eq!(counts.remote, 2);
        assert_eq!(counts.index, 0);
        assert_eq!(counts.total(), 3);
    }
}
