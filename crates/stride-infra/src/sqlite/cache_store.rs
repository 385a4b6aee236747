//! SQLite persistent tier for the response cache.
//!
//! Implements `CacheStore` from `stride-core`. Entries survive process
//! restarts; the hot in-memory tier lives in the core cache. Tags are
//! stored as a JSON array and matched exactly via `json_each`, so a tag
//! that is a substring of another never over-invalidates.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;

use stride_core::cache::CacheStore;
use stride_types::cache::{CacheEntry, CacheError};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CacheStore`.
pub struct SqliteCacheStore {
    pool: DatabasePool,
}

impl SqliteCacheStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn store_err(e: impl std::fmt::Display) -> CacheError {
    CacheError::Store {
        reason: e.to_string(),
    }
}

impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query("SELECT * FROM response_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let key: String = row.try_get("key").map_err(store_err)?;
        let value: String = row.try_get("value").map_err(store_err)?;
        let created_at: String = row.try_get("created_at").map_err(store_err)?;
        let ttl_secs: i64 = row.try_get("ttl_secs").map_err(store_err)?;
        let tags: String = row.try_get("tags").map_err(store_err)?;

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(store_err)?;
        let tags: Vec<String> = serde_json::from_str(&tags).map_err(store_err)?;

        Ok(Some(CacheEntry {
            key,
            value,
            created_at,
            ttl: Duration::from_secs(ttl_secs.max(0) as u64),
            tags,
        }))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let tags = serde_json::to_string(&entry.tags).map_err(store_err)?;
        sqlx::query(
            r#"INSERT OR REPLACE INTO response_cache (key, value, created_at, ttl_secs, tags)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.ttl.as_secs() as i64)
        .bind(tags)
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM response_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let result = sqlx::query(
            r#"DELETE FROM response_cache
               WHERE EXISTS (
                   SELECT 1 FROM json_each(response_cache.tags)
                   WHERE json_each.value = ?
               )"#,
        )
        .bind(tag)
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query(
            r#"DELETE FROM response_cache
               WHERE datetime(created_at, '+' || ttl_secs || ' seconds') <= datetime('now')"#,
        )
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected())
    }
}
