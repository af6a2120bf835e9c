//! Directory/file cache backend.
//!
//! Each key maps deterministically to a path under the backend root:
//! `<root>/<category>/<hh>/<sha256(key)>.json`, where `hh` is the
//! first two hex characters of the digest. Writes go to a temp file
//! in the target directory and are renamed into place, so readers
//! never observe a partial envelope.
//!
//! # Locking
//!
//! Locks are OS-level advisory, non-blocking exclusive file locks
//! (`fs2`), scoped to the lease duration and the calling process.
//! Failure to acquire immediately is reported as lock-unavailable
//! rather than waiting. Lock handles are owned by the backend
//! instance, not a process-wide map; a crashed holder's OS lock dies
//! with its process and the stale lock file is reclaimed by pruning.

use async_trait::async_trait;
use fs2::FileExt;
use lexicache_core::{
    now_unix, CacheEnvelope, CacheError, CacheKey, KeyCategory, LeaseOutcome, LexicacheResult,
    LockLease,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::backend::{CacheBackend, PruneReport, PrunePolicy};

/// A lease currently held by this backend instance.
struct HeldLock {
    file: File,
    lease: LockLease,
    path: PathBuf,
}

/// File-based cache backend.
pub struct FileCacheBackend {
    root: PathBuf,
    /// Lock handles held by this instance, keyed by lock-key string.
    held: Mutex<HashMap<String, HeldLock>>,
}

impl FileCacheBackend {
    /// Create a backend rooted at `root`, creating the category
    /// directories if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> LexicacheResult<Self> {
        let root = root.as_ref().to_path_buf();
        for category in [KeyCategory::Remote, KeyCategory::Index, KeyCategory::Lock] {
            fs::create_dir_all(root.join(category.as_str()))
                .map_err(|e| io_error("<root>", &e))?;
        }
        Ok(Self {
            root,
            held: Mutex::new(HashMap::new()),
        })
    }

    /// Deterministic path for a key.
    fn path_for(&self, key: &CacheKey) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_str().as_bytes()));
        self.root
            .join(key.category().as_str())
            .join(&digest[..2])
            .join(format!("{}.json", digest))
    }

    fn read_envelope(&self, key: &CacheKey) -> LexicacheResult<Option<CacheEnvelope>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => {
                let envelope = serde_json::from_slice(&bytes).map_err(|e| {
                    CacheError::Deserialization {
                        key: key.as_str().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(envelope))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key.as_str(), &e).into()),
        }
    }

    fn write_envelope(&self, key: &CacheKey, envelope: &CacheEnvelope) -> LexicacheResult<()> {
        let path = self.path_for(key);
        let dir = path.parent().expect("key paths always have a parent");
        fs::create_dir_all(dir).map_err(|e| io_error(key.as_str(), &e))?;

        let bytes = serde_json::to_vec(envelope).map_err(|e| CacheError::Serialization {
            key: key.as_str().to_string(),
            reason: e.to_string(),
        })?;

        // Write-to-temp then rename keeps the visible file complete.
        let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::now_v7().simple()));
        let mut file = File::create(&tmp).map_err(|e| io_error(key.as_str(), &e))?;
        file.write_all(&bytes).map_err(|e| io_error(key.as_str(), &e))?;
        file.sync_all().map_err(|e| io_error(key.as_str(), &e))?;
        drop(file);
        fs::rename(&tmp, &path).map_err(|e| io_error(key.as_str(), &e))?;
        Ok(())
    }

    /// Delete files older than the category threshold under one
    /// category directory, stopping once the batch budget is spent.
    fn prune_category(
        &self,
        category: KeyCategory,
        policy: &PrunePolicy,
        now: SystemTime,
        report: &mut PruneReport,
    ) -> LexicacheResult<()> {
        let max_age = Duration::from_secs(policy.max_age_for(category).max(0) as u64);
        let dir = self.root.join(category.as_str());
        let buckets = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(category.as_str(), &e).into()),
        };

        for bucket in buckets.flatten() {
            let files = match fs::read_dir(bucket.path()) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in files.flatten() {
                if report.deleted.total() as usize >= policy.batch_size {
                    report.truncated = true;
                    return Ok(());
                }
                report.scanned += 1;
                let Ok(meta) = entry.metadata() else { continue };
                let Ok(modified) = meta.modified() else { continue };
                let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
                if age > max_age && fs::remove_file(entry.path()).is_ok() {
                    report.deleted.bump(category);
                }
            }
        }
        Ok(())
    }
}

fn io_error(key: &str, e: &std::io::Error) -> CacheError {
    CacheError::Io {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl CacheBackend for FileCacheBackend {
    async fn get_envelope(&self, key: &CacheKey) -> LexicacheResult<Option<CacheEnvelope>> {
        self.read_envelope(key)
    }

    async fn set_envelope(&self, key: &CacheKey, envelope: CacheEnvelope) -> LexicacheResult<()> {
        self.write_envelope(key, &envelope)
    }

    async fn acquire_lock(
        &self,
        lock_key: &CacheKey,
        owner_id: &str,
        lease: Duration,
    ) -> LexicacheResult<LeaseOutcome> {
        let now = now_unix();
        let raw = lock_key.as_str().to_string();

        let mut held = self
            .held
            .lock()
            .map_err(|_| CacheError::Unavailable {
                reason: "lock table poisoned".to_string(),
            })?;

        // Reclaim our own expired lease before checking availability.
        if let Some(existing) = held.get(&raw) {
            if existing.lease.covers(now) {
                return Ok(LeaseOutcome::Unavailable);
            }
            if let Some(stale) = held.remove(&raw) {
                let _ = fs2::FileExt::unlock(&stale.file);
                let _ = fs::remove_file(&stale.path);
            }
        }

        let path = self.path_for(lock_key);
        let dir = path.parent().expect("key paths always have a parent");
        fs::create_dir_all(dir).map_err(|e| io_error(&raw, &e))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error(&raw, &e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(LeaseOutcome::Unavailable),
            Err(e) => return Err(io_error(&raw, &e).into()),
        }

        // Holding the OS lock is authoritative; any lease text left by
        // a dead process is stale and gets overwritten.
        let claim = LockLease::new(owner_id, lease, now);
        let bytes = serde_json::to_vec(&claim).map_err(|e| CacheError::Serialization {
            key: raw.clone(),
            reason: e.to_string(),
        })?;
        file.set_len(0).map_err(|e| io_error(&raw, &e))?;
        (&file)
            .write_all(&bytes)
            .map_err(|e| io_error(&raw, &e))?;

        held.insert(
            raw,
            HeldLock {
                file,
                lease: claim.clone(),
                path,
            },
        );
        Ok(LeaseOutcome::Acquired(claim))
    }

    async fn release_lock(&self, lock_key: &CacheKey, owner_id: &str) -> LexicacheResult<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| CacheError::Unavailable {
                reason: "lock table poisoned".to_string(),
            })?;
        let raw = lock_key.as_str();
        if held.get(raw).map(|h| h.lease.owner_id == owner_id) == Some(true) {
            if let Some(entry) = held.remove(raw) {
                let _ = fs2::FileExt::unlock(&entry.file);
                let _ = fs::remove_file(&entry.path);
            }
        }
        Ok(())
    }

    async fn prune(&self, policy: &PrunePolicy) -> LexicacheResult<PruneReport> {
        let now = SystemTime::now();
        let mut report = PruneReport::default();
        for category in [KeyCategory::Lock, KeyCategory::Remote, KeyCategory::Index] {
            self.prune_category(category, policy, now, &mut report)?;
            if report.truncated {
                break;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn create_test_backend() -> (FileCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            FileCacheBackend::new(temp_dir.path()).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    fn remote_key(source: &str, query: &str) -> CacheKey {
        CacheKey::remote(source, query, &BTreeMap::new())
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (backend, _temp_dir) = create_test_backend();
        let key = remote_key("s1", "aspirin");

        let envelope = CacheEnvelope::new(json!({"hits": 3}), 60, now_unix(), None);
        backend
            .set_envelope(&key, envelope.clone())
            .await
            .expect("set should succeed");

        let read = backend
            .get_envelope(&key)
            .await
            .expect("get should succeed")
            .expect("envelope should exist");
        assert_eq!(read, envelope);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (backend, _temp_dir) = create_test_backend();
        let key = remote_key("s1", "nothing here");
        assert!(backend
            .get_envelope(&key)
            .await
            .expect("get should succeed")
            .is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_envelope() {
        let (backend, _temp_dir) = create_test_backend();
        let key = CacheKey::index("s1", 2);

        backend
            .set_envelope(&key, CacheEnvelope::immortal(json!("old"), None))
            .await
            .expect("set should succeed");
        backend
            .set_envelope(&key, CacheEnvelope::immortal(json!("new"), None))
            .await
            .expect("set should succeed");

        let read = backend
            .get_envelope(&key)
            .await
            .expect("get should succeed")
            .expect("envelope should exist");
        assert_eq!(read.payload, json!("new"));
    }

    #[tokio::test]
    async fn test_lock_unavailable_while_held() {
        let (backend, _temp_dir) = create_test_backend();
        let lock_key = CacheKey::lock(&remote_key("s1", "q"));

        let first = backend
            .acquire_lock(&lock_key, "owner-a", Duration::from_secs(5))
            .await
            .expect("acquire should succeed");
        assert!(first.is_acquired());

        let second = backend
            .acquire_lock(&lock_key, "owner-b", Duration::from_secs(5))
            .await
            .expect("acquire should succeed");
        assert_eq!(second, LeaseOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_release_then_reacquire() {
        let (backend, _temp_dir) = create_test_backend();
        let lock_key = CacheKey::lock(&remote_key("s1", "q"));

        backend
            .acquire_lock(&lock_key, "owner-a", Duration::from_secs(5))
            .await
            .expect("acquire should succeed");
        backend
            .release_lock(&lock_key, "owner-a")
            .await
            .expect("release should succeed");

        let outcome = backend
            .acquire_lock(&lock_key, "owner-b", Duration::from_secs(5))
            .await
            .expect("acquire should succeed");
        assert!(outcome.is_acquired());
    }

    #[tokio::test]
    async fn test_expired_lease_reclaimed_in_process() {
        let (backend, _temp_dir) = create_test_backend();
        let lock_key = CacheKey::lock(&remote_key("s1", "q"));

        backend
            .acquire_lock(&lock_key, "owner-a", Duration::from_secs(0))
            .await
            .expect("acquire should succeed");

        let outcome = backend
            .acquire_lock(&lock_key, "owner-b", Duration::from_secs(5))
            .await
            .expect("acquire should succeed");
        assert!(outcome.is_acquired());
    }

    #[tokio::test]
    async fn test_release_wrong_owner_keeps_lock() {
        let (backend, _temp_dir) = create_test_backend();
        let lock_key = CacheKey::lock(&remote_key("s1", "q"));

        backend
            .acquire_lock(&lock_key, "owner-a", Duration::from_secs(5))
            .await
            .expect("acquire should succeed");
        backend
            .release_lock(&lock_key, "owner-b")
            .await
            .expect("release should succeed");

        let outcome = backend
            .acquire_lock(&lock_key, "owner-c", Duration::from_secs(5))
            .await
            .expect("acquire should succeed");
        assert_eq!(outcome, LeaseOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_prune_by_category_age() {
        let (backend, _temp_dir) = create_test_backend();
        let remote = remote_key("s1", "q");
        let index = CacheKey::index("s1", 1);

        backend
            .set_envelope(&remote, CacheEnvelope::new(json!("r"), 60, now_unix(), None))
            .await
            .expect("set should succeed");
        backend
            .set_envelope(&index, CacheEnvelope::immortal(json!("i"), None))
            .await
            .expect("set should succeed");

        tokio::time::sleep(Duration::from_millis(1200)).await;

        let policy = PrunePolicy {
            lock_max_age_secs: 0,
            remote_max_age_secs: 0,
            index_max_age_secs: 999_999,
            batch_size: 100,
        };
        backend.prune(&policy).await.expect("prune should succeed");

        assert!(backend
            .get_envelope(&remote)
            .await
            .expect("get should succeed")
            .is_none());
        assert!(backend
            .get_envelope(&index)
            .await
            .expect("get should succeed")
            .is_some());
    }
}
