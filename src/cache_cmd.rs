//! `distill cache stats` and `distill cache prune`.

use anyhow::Result;
use std::sync::Arc;

use study_distill_core::store::CacheStore;

use crate::cache::{now_ms, ResultCache};
use crate::config::{CacheConfig, Config};
use crate::sqlite_store::SqliteCacheStore;

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteCacheStore::open(&config.db).await?;
    let stats = store.stats().await?;

    println!("Study Distill — Result Cache");
    println!("============================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!(
        "  Policy:        {} · retention {} days · cap {} entries",
        if config.cache.enabled { "enabled" } else { "disabled" },
        config.cache.retention_days,
        config.cache.max_entries
    );
    println!();
    println!("  Entries:       {}", stats.entries);
    println!("  Total hits:    {}", stats.total_hits);
    println!("  Oldest access: {}", format_access(stats.oldest_access));
    println!("  Newest access: {}", format_access(stats.newest_access));
    println!();

    store.close().await;
    Ok(())
}

/// Remove expired entries and enforce the LRU cap, even when the cache is
/// disabled for runs.
pub async fn run_prune(config: &Config) -> Result<()> {
    let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::open(&config.db).await?);
    let policy = CacheConfig {
        enabled: true,
        ..config.cache.clone()
    };
    let cache = ResultCache::new(Some(store), &policy);
    let (expired, evicted) = cache.prune().await?;
    let remaining = cache.stats().await?.entries;
    cache.close().await;

    println!("expired entries removed: {}", expired);
    println!("lru entries evicted: {}", evicted);
    println!("entries remaining: {}", remaining);
    println!("ok");
    Ok(())
}

fn format_access(ts_ms: Option<i64>) -> String {
    let Some(ts_ms) = ts_ms else {
        return "never".to_string();
    };
    let delta = (now_ms() - ts_ms) / 1000;
    if delta < 0 {
        return format_ts_iso(ts_ms);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_ms)
    }
}

fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_access() {
        assert_eq!(format_access(None), "never");
        assert_eq!(format_access(Some(now_ms())), "just now");
        assert_eq!(format_access(Some(now_ms() - 5 * 60_000)), "5 mins ago");
        assert_eq!(format_access(Some(0)), "1970-01-01 00:00");
    }
}
