//! Shared Cache Tier
//!
//! SQLite-backed cache shared between processes, accessed through an r2d2
//! connection pool. Entries carry an absolute expiry timestamp so staleness
//! checks work across process restarts. All operations are best-effort from
//! the gateway's point of view; a broken shared tier degrades to local-only
//! caching.

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::types::{GatewayError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    expires_at  INTEGER NOT NULL,
    created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
"#;

/// SQLite-backed cross-process cache tier
pub struct SharedCache {
    pool: Pool<SqliteConnectionManager>,
}

impl SharedCache {
    /// Open the shared cache at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);
        Self::build(manager, 4)
    }

    /// Open an in-memory shared cache for testing
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(Self::configure_connection);
        // In-memory sqlite databases are per-connection; a pool of one keeps
        // every caller on the same database.
        Self::build(manager, 1)
    }

    fn build(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|e| GatewayError::Storage(format!("Failed to create cache pool: {}", e)))?;

        let cache = Self { pool };
        cache.conn()?.execute_batch(SCHEMA)?;
        Ok(cache)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| GatewayError::Storage(format!("Failed to acquire cache connection: {}", e)))
    }

    /// Look up an unexpired value
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM cache_entries
                 WHERE key = ?1 AND expires_at > strftime('%s', 'now')",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a value with the given TTL
    pub fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, expires_at)
             VALUES (?1, ?2, strftime('%s', 'now') + ?3)",
            params![key, value.to_string(), ttl.as_secs() as i64],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    /// Remove expired rows, returning the number removed
    pub fn sweep(&self) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= strftime('%s', 'now')",
            [],
        )?;
        Ok(removed)
    }

    /// Number of live entries
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at > strftime('%s', 'now')",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_roundtrip() {
        let cache = SharedCache::open_in_memory().unwrap();
        cache
            .set("k1", &json!({"answer": 42}), Duration::from_secs(60))
            .unwrap();

        let value = cache.get("k1").unwrap().unwrap();
        assert_eq!(value["answer"], 42);
    }

    #[test]
    fn test_expired_entry_not_returned() {
        let cache = SharedCache::open_in_memory().unwrap();
        cache.set("k1", &json!(1), Duration::from_secs(0)).unwrap();

        assert!(cache.get("k1").unwrap().is_none());
    }

    #[test]
    fn test_sweep_removes_expired_rows() {
        let cache = SharedCache::open_in_memory().unwrap();
        cache.set("stale", &json!(1), Duration::from_secs(0)).unwrap();
        cache.set("fresh", &json!(2), Duration::from_secs(60)).unwrap();

        let removed = cache.sweep().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = SharedCache::open_in_memory().unwrap();
        cache.set("a", &json!(1), Duration::from_secs(60)).unwrap();
        cache.set("b", &json!(2), Duration::from_secs(60)).unwrap();

        assert!(cache.delete("a").unwrap());
        assert!(!cache.delete("a").unwrap());

        cache.clear().unwrap();
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_replace_updates_value() {
        let cache = SharedCache::open_in_memory().unwrap();
        cache.set("k", &json!(1), Duration::from_secs(60)).unwrap();
        cache.set("k", &json!(2), Duration::from_secs(60)).unwrap();

        assert_eq!(cache.get("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_file_backed_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.db");

        {
            let cache = SharedCache::open(&path).unwrap();
            cache.set("k", &json!("v"), Duration::from_secs(60)).unwrap();
        }

        let reopened = SharedCache::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap(), Some(json!("v")));
    }
}
