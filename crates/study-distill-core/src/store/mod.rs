//! Storage abstraction for the result cache.
//!
//! The [`CacheStore`] trait is the persistence seam behind the application's
//! single-flight result cache. Backends only store and expire entries; the
//! at-most-one-computation guarantee lives above them.
//!
//! Timestamps are Unix milliseconds supplied by the caller, so stores never
//! read the clock and tests control time directly.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::CacheEntry;

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: i64,
    /// Sum of `access_count` over all entries.
    pub total_hits: i64,
    pub oldest_access: Option<i64>,
    pub newest_access: Option<i64>,
}

/// Abstract backend for memoized pipeline results.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](CacheStore::get) | Look up and touch an entry; expired entries are removed and miss |
/// | [`put`](CacheStore::put) | Insert or overwrite an entry |
/// | [`remove`](CacheStore::remove) | Delete one entry |
/// | [`prune_expired`](CacheStore::prune_expired) | Delete entries created before a cutoff |
/// | [`evict_lru`](CacheStore::evict_lru) | Delete least-recently-accessed entries above a cap |
/// | [`stats`](CacheStore::stats) | Aggregate statistics |
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up `fingerprint`. A live entry has `accessed_at` set to `now`
    /// and `access_count` incremented, and the updated entry is returned.
    /// An entry created before `expired_before` is deleted and reported as
    /// a miss.
    async fn get(&self, fingerprint: &str, now: i64, expired_before: i64)
        -> Result<Option<CacheEntry>>;

    /// Insert or overwrite the entry for `entry.fingerprint`.
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Delete an entry. Returns whether it existed.
    async fn remove(&self, fingerprint: &str) -> Result<bool>;

    /// Delete every entry created before `expired_before`. Returns the count.
    async fn prune_expired(&self, expired_before: i64) -> Result<u64>;

    /// Delete least-recently-accessed entries until at most `max_entries`
    /// remain. Returns the count.
    async fn evict_lru(&self, max_entries: usize) -> Result<u64>;

    async fn stats(&self) -> Result<CacheStats>;

    /// Release backend resources. Default: nothing to release.
    async fn close(&self) {}
}
