//! Append-only log cache backend.
//!
//! Every write appends a record; a read returns the most recently
//! appended record for a key ("latest write wins"). This avoids
//! read-modify-write races on hot paths at the cost of garbage that
//! pruning later reclaims.
//!
//! # Locking
//!
//! Acquiring a lock appends a lease record and then re-reads the
//! latest record for that lock key to confirm it is still the
//! caller's own and unexpired (insert-then-verify). This is an
//! **optimistic, best-effort** lock: two truly simultaneous appends
//! can in rare cases both pass verification, so exclusivity is NOT
//! guaranteed and guarded builders must be safe to run redundantly.
//! Release is a no-op; leases expire and are reclaimed by pruning.
//!
//! All state is owned by the backend instance -- no globals; tests
//! instantiate fresh instances per case.

use async_trait::async_trait;
use lexicache_core::{
    now_unix, CacheEnvelope, CacheError, CacheKey, LeaseOutcome, LexicacheResult, LockLease,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::backend::{CacheBackend, PruneReport, PrunePolicy};

/// One appended record.
#[derive(Debug, Clone)]
struct LogRecord {
    seq: u64,
    key: String,
    written_at: i64,
    envelope: CacheEnvelope,
}

/// Append-only log backend.
pub struct LogCacheBackend {
    records: RwLock<Vec<LogRecord>>,
    seq: AtomicU64,
}

impl LogCacheBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Number of records currently in the log, live and superseded.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    async fn append(&self, key: &CacheKey, envelope: CacheEnvelope) {
        let record = LogRecord {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            key: key.as_str().to_string(),
            written_at: now_unix(),
            envelope,
        };
        self.records.write().await.push(record);
    }

    /// Latest envelope for `key`, scanning newest-first.
    async fn latest(&self, key: &CacheKey) -> Option<CacheEnvelope> {
        let records = self.records.read().await;
        records
            .iter()
            .rev()
            .find(|r| r.key == key.as_str())
            .map(|r| r.envelope.clone())
    }

    fn decode_lease(key: &CacheKey, envelope: &CacheEnvelope) -> LexicacheResult<LockLease> {
        serde_json::from_value(envelope.payload.clone()).map_err(|e| {
            CacheError::Deserialization {
                key: key.as_str().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl Default for LogCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for LogCacheBackend {
    async fn get_envelope(&self, key: &CacheKey) -> LexicacheResult<Option<CacheEnvelope>> {
        Ok(self.latest(key).await)
    }

    async fn set_envelope(&self, key: &CacheKey, envelope: CacheEnvelope) -> LexicacheResult<()> {
        self.append(key, envelope).await;
        Ok(())
    }

    async fn acquire_lock(
        &self,
        lock_key: &CacheKey,
        owner_id: &str,
        lease: Duration,
    ) -> LexicacheResult<LeaseOutcome> {
        let now = now_unix();

        // Fast reject: a live foreign lease means no appending at all.
        if let Some(existing) = self.latest(lock_key).await {
            let held = Self::decode_lease(lock_key, &existing)?;
            if held.covers(now) && held.owner_id != owner_id {
                return Ok(LeaseOutcome::Unavailable);
            }
        }

        // Insert-then-verify: append our lease, then re-read the
        // latest record. A simultaneous appender can still win the
        // re-read, which is the accepted weak guarantee here.
        let claim = LockLease::new(owner_id, lease, now);
        let ttl = lease.as_secs() as i64;
        let envelope = CacheEnvelope::new(
            serde_json::to_value(&claim).map_err(|e| CacheError::Serialization {
                key: lock_key.as_str().to_string(),
                reason: e.to_string(),
            })?,
            ttl.max(1),
            now,
            None,
        );
        self.append(lock_key, envelope).await;

        match self.latest(lock_key).await {
            Some(latest) => {
                let winner = Self::decode_lease(lock_key, &latest)?;
                if winner.held_by(owner_id, now) {
                    Ok(LeaseOutcome::Acquired(claim))
                } else {
                    Ok(LeaseOutcome::Unavailable)
                }
            }
            None => Ok(LeaseOutcome::Unavailable),
        }
    }

    async fn release_lock(&self, _lock_key: &CacheKey, _owner_id: &str) -> LexicacheResult<()> {
        // Leases expire on their own and pruning reclaims the records.
        Ok(())
    }

    async fn prune(&self, policy: &PrunePolicy) -> LexicacheResult<PruneReport> {
        let now = now_unix();
        let mut records = self.records.write().await;

        let mut report = PruneReport::default();
        let mut kept = Vec::with_capacity(records.len());
        for record in records.drain(..) {
            report.scanned += 1;
            let category = CacheKey::parse_category(&record.key);
            let age = now - record.written_at;
            let over_budget = report.deleted.total() as usize >= policy.batch_size;
            if age > policy.max_age_for(category) && !over_budget {
                report.deleted.bump(category);
            } else {
                if age > policy.max_age_for(category) {
                    report.truncated = true;
                }
                kept.push(record);
            }
        }
        kept.sort_by_key(|r| r.seq);
        *records = kept;
        Ok(report)
    }
}
