//! Lexicache Storage - Cache Backends and the Uniform Cache Store
//!
//! Two interchangeable backends implement one [`CacheBackend`]
//! contract: an append-only log ([`LogCacheBackend`], latest write
//! wins) and a directory/file store ([`FileCacheBackend`], atomic
//! temp+rename writes). [`CacheStore`] sits on top and enforces TTL
//! semantics uniformly, so callers never care which backend is active.
//!
//! Locking is advisory and time-bounded in both backends; see the
//! backend docs for the (deliberately weak) guarantees.

pub mod backend;
pub mod file_backend;
pub mod log_backend;
pub mod store;

pub use backend::{CacheBackend, CategoryCounts, PrunePolicy, PruneReport};
pub use file_backend::FileCacheBackend;
pub use log_backend::LogCacheBackend;
pub use store::{CacheStoreStats, CacheStore, Remembered, DEFAULT_BUILD_LEASE};
