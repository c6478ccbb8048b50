//! SQLite-backed [`CacheStore`] implementation.
//!
//! One row per fingerprint in `cache_entries` (see [`crate::migrate`]).
//! Lookups touch the row in place with `UPDATE ... RETURNING`, so the
//! access count and recency are updated atomically with the read.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use study_distill_core::models::CacheEntry;
use study_distill_core::store::{CacheStats, CacheStore};

use crate::config::DbConfig;
use crate::{db, migrate};

/// SQLite implementation of the [`CacheStore`] trait.
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(db: &DbConfig) -> Result<Self> {
        let pool = db::connect(db).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry> {
    Ok(CacheEntry {
        fingerprint: row.try_get("fingerprint")?,
        result: row.try_get("result")?,
        created_at: row.try_get("created_at")?,
        accessed_at: row.try_get("accessed_at")?,
        access_count: row.try_get("access_count")?,
    })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(
        &self,
        fingerprint: &str,
        now: i64,
        expired_before: i64,
    ) -> Result<Option<CacheEntry>> {
        sqlx::query("DELETE FROM cache_entries WHERE fingerprint = ? AND created_at < ?")
            .bind(fingerprint)
            .bind(expired_before)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query(
            r#"
            UPDATE cache_entries
            SET accessed_at = ?, access_count = access_count + 1
            WHERE fingerprint = ?
            RETURNING fingerprint, result, created_at, accessed_at, access_count
            "#,
        )
        .bind(now)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (fingerprint, result, created_at, accessed_at, access_count)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                result = excluded.result,
                created_at = excluded.created_at,
                accessed_at = excluded.accessed_at,
                access_count = excluded.access_count
            "#,
        )
        .bind(&entry.fingerprint)
        .bind(&entry.result)
        .bind(entry.created_at)
        .bind(entry.accessed_at)
        .bind(entry.access_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn prune_expired(&self, expired_before: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE created_at < ?")
            .bind(expired_before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn evict_lru(&self, max_entries: usize) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        let excess = count - max_entries as i64;
        if excess <= 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM cache_entries
            WHERE fingerprint IN (
                SELECT fingerprint FROM cache_entries
                ORDER BY accessed_at ASC, fingerprint ASC
                LIMIT ?
            )
            "#,
        )
        .bind(excess)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS entries,
                   COALESCE(SUM(access_count), 0) AS total_hits,
                   MIN(accessed_at) AS oldest_access,
                   MAX(accessed_at) AS newest_access
            FROM cache_entries
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            entries: row.try_get("entries")?,
            total_hits: row.try_get("total_hits")?,
            oldest_access: row.try_get("oldest_access")?,
            newest_access: row.try_get("newest_access")?,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
