//! In-memory [`CacheStore`] implementation for tests and cache-less embedding.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. A poisoned lock surfaces as
//! an error, which the result cache treats like any other store failure.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::CacheEntry;

use super::{CacheStats, CacheStore};

pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("in-memory cache lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .write()
            .map_err(|_| anyhow!("in-memory cache lock poisoned"))
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(
        &self,
        fingerprint: &str,
        now: i64,
        expired_before: i64,
    ) -> Result<Option<CacheEntry>> {
        let mut entries = self.write()?;
        let expired = match entries.get_mut(fingerprint) {
            None => return Ok(None),
            Some(entry) if entry.created_at < expired_before => true,
            Some(entry) => {
                entry.accessed_at = now;
                entry.access_count += 1;
                return Ok(Some(entry.clone()));
            }
        };
        if expired {
            entries.remove(fingerprint);
        }
        Ok(None)
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.write()?
            .insert(entry.fingerprint.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.write()?.remove(fingerprint).is_some())
    }

    async fn prune_expired(&self, expired_before: i64) -> Result<u64> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| e.created_at >= expired_before);
        Ok((before - entries.len()) as u64)
    }

    async fn evict_lru(&self, max_entries: usize) -> Result<u64> {
        let mut entries = self.write()?;
        if entries.len() <= max_entries {
            return Ok(0);
        }
        let mut by_access: Vec<(i64, String)> = entries
            .values()
            .map(|e| (e.accessed_at, e.fingerprint.clone()))
            .collect();
        by_access.sort();
        let excess = entries.len() - max_entries;
        for (_, fingerprint) in by_access.into_iter().take(excess) {
            entries.remove(&fingerprint);
        }
        Ok(excess as u64)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.read()?;
        Ok(CacheStats {
            entries: entries.len() as i64,
            total_hits: entries.values().map(|e| e.access_count).sum(),
            oldest_access: entries.values().map(|e| e.accessed_at).min(),
            newest_access: entries.values().map(|e| e.accessed_at).max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fp: &str, created: i64, accessed: i64) -> CacheEntry {
        CacheEntry {
            fingerprint: fp.into(),
            result: format!("{{\"fp\":\"{}\"}}", fp),
            created_at: created,
            accessed_at: accessed,
            access_count: 1,
        }
    }

    #[tokio::test]
    async fn test_get_touches_and_counts() {
        let store = InMemoryCacheStore::new();
        store.put(&entry("a", 100, 100)).await.unwrap();

        let hit = store.get("a", 200, 0).await.unwrap().unwrap();
        assert_eq!(hit.access_count, 2);
        assert_eq!(hit.accessed_at, 200);
        assert_eq!(hit.result, "{\"fp\":\"a\"}");

        let hit = store.get("a", 300, 0).await.unwrap().unwrap();
        assert_eq!(hit.access_count, 3);
        assert!(store.get("missing", 300, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_removed() {
        let store = InMemoryCacheStore::new();
        store.put(&entry("old", 10, 10)).await.unwrap();
        assert!(store.get("old", 500, 100).await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_prune_then_evict_lru() {
        let store = InMemoryCacheStore::new();
        store.put(&entry("expired", 1, 1)).await.unwrap();
        store.put(&entry("cold", 100, 150)).await.unwrap();
        store.put(&entry("warm", 100, 400)).await.unwrap();
        store.put(&entry("hot", 100, 900)).await.unwrap();

        assert_eq!(store.prune_expired(50).await.unwrap(), 1);
        assert_eq!(store.evict_lru(2).await.unwrap(), 1);
        assert!(store.get("cold", 1000, 0).await.unwrap().is_none());
        assert!(store.get("warm", 1000, 0).await.unwrap().is_some());
        assert!(store.get("hot", 1000, 0).await.unwrap().is_some());
        assert_eq!(store.evict_lru(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = InMemoryCacheStore::new();
        assert_eq!(store.stats().await.unwrap(), CacheStats::default());
        store.put(&entry("a", 1, 5)).await.unwrap();
        store.put(&entry("b", 1, 9)).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_hits, 2);
        assert_eq!(stats.oldest_access, Some(5));
        assert_eq!(stats.newest_access, Some(9));
        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
    }
}
