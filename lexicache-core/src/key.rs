//! Namespaced cache keys with deterministic derivation.
//!
//! Every key carries a category prefix that determines its pruning
//! policy and storage partition:
//!
//! - `r:<sourceId>:<hash24>` -- remote search result, hashed from the
//!   normalized query plus sorted extra params
//! - `idx:<sourceId>:<docVersion>` -- versioned local index artifact
//! - `lock:<wrappedKey>` -- lock namespace wrapping any other key
//!
//! Keys can only be constructed through the derivation methods, so
//! equal normalized inputs always produce equal keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Remote-result key prefix.
const PREFIX_REMOTE: &str = "r:";
/// Index-artifact key prefix.
const PREFIX_INDEX: &str = "idx:";
/// Lock key prefix.
const PREFIX_LOCK: &str = "lock:";

/// Length of the truncated hex digest embedded in remote keys.
const HASH_LEN: usize = 24;

/// Key category, derived from the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCategory {
    /// Remote search result (`r:`), short-lived.
    Remote,
    /// Versioned local index artifact (`idx:`), immortal.
    Index,
    /// Advisory lock record (`lock:`), ephemeral.
    Lock,
}

impl KeyCategory {
    /// Directory / partition name for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyCategory::Remote => "r",
            KeyCategory::Index => "idx",
            KeyCategory::Lock => "lock",
        }
    }
}

impl fmt::Display for KeyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An opaque, namespaced cache key.
///
/// The inner string is private; keys are built via [`CacheKey::remote`],
/// [`CacheKey::index`], [`CacheKey::lock`], or [`CacheKey::job`], which
/// keeps the derivation deterministic and the grammar closed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a remote-search-result key from a normalized query and
    /// its extra parameters.
    ///
    /// The hash covers the normalized query joined with the sorted
    /// `key=value` params, so callers issuing the same logical lookup
    /// always land on the same key.
    pub fn remote(source_id: &str, query: &str, params: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_query(query).as_bytes());
        for (k, v) in params {
            hasher.update(b"\x1f");
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        CacheKey(format!("{}{}:{}", PREFIX_REMOTE, source_id, &digest[..HASH_LEN]))
    }

    /// Derive the key for a versioned local index artifact.
    pub fn index(source_id: &str, doc_version: i64) -> Self {
        CacheKey(format!("{}{}:{}", PREFIX_INDEX, source_id, doc_version))
    }

    /// Derive the lock key wrapping another key.
    pub fn lock(wrapped: &CacheKey) -> Self {
        CacheKey(format!("{}{}", PREFIX_LOCK, wrapped.0))
    }

    /// Derive the key a poll job is persisted under.
    ///
    /// Jobs are ordinary payloads with remote-cache lifetimes, so they
    /// live in the remote category and are pruned with it.
    pub fn job(token: &crate::JobToken) -> Self {
        CacheKey(format!("{}job:{}", PREFIX_REMOTE, token.as_str()))
    }

    /// The category this key belongs to.
    ///
    /// `lock:` wins over the wrapped key's own prefix.
    pub fn category(&self) -> KeyCategory {
        Self::parse_category(&self.0)
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Category of a raw key string, for backends that persist keys
    /// as plain text.
    pub fn parse_category(raw: &str) -> KeyCategory {
        if raw.starts_with(PREFIX_LOCK) {
            KeyCategory::Lock
        } else if raw.starts_with(PREFIX_INDEX) {
            KeyCategory::Index
        } else {
            KeyCategory::Remote
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a query for hashing: trim, lowercase, collapse runs of
/// whitespace to single spaces.
fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
