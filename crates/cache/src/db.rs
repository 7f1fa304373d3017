//! SQLite-backed cache store.
//!
//! Persists listing cache entries across process invocations, so repeated
//! operator commands against the same bucket don't each pay for a full
//! listing.

use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

use crate::error::{ErrorKind, Result};
use crate::store::{CacheStore, Tag};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Cache traffic is one small query per listing; a handful is plenty.
const MAX_CONNECTIONS: u32 = 4;

/// SQLite cache store.
///
/// Entries are rows of `(key, tag, value, expires_at)`; expiry is a unix
/// timestamp compared on read, and expired rows are purged on connect.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // This is IMPORTANT to apply the query-based PRAGMAs to EVERY
            // connection (set by max connections) instead of only the
            // first connection returned by the pool.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let store = Self { pool };
        store.migrate().await?;
        store.purge_expired().await?;
        Ok(store)
    }

    /// Connect to the cache database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Database)?;
        }
        let options = Self::base_options().filename(path).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // In-memory database must either use the same cache `.shared_cache(true)`,
        // or be limited to one connection. Otherwise parallel connections will
        // see different databases that contain different data.
        Self::new(options, Some(1)).await
    }

    /// Base connection options shared between file and in-memory databases.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // Enable WAL mode for better concurrent read performance
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // PRAGMA synchronous = NORMAL (balance between safety and speed)
            .synchronous(SqliteSynchronous::Normal)
            // Two CLI invocations sharing one cache file must wait on each
            // other rather than fail with SQLITE_BUSY.
            .busy_timeout(std::time::Duration::from_millis(1500))
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    #[instrument("performing cache database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Delete rows whose lifetime has elapsed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/purge_expired.sql"))
            .bind(OffsetDateTime::now_utc().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(include_str!("../queries/get_entry.sql"))
            .bind(key)
            .bind(OffsetDateTime::now_utc().unix_timestamp())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn set(&self, key: &str, value: String, tag: Tag, lifetime: Duration) -> Result<()> {
        let lifetime = i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX);
        let expires_at = OffsetDateTime::now_utc().unix_timestamp().saturating_add(lifetime);
        sqlx::query(include_str!("../queries/set_entry.sql"))
            .bind(key)
            .bind(tag.as_str())
            .bind(value)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn flush_tag(&self, tag: Tag) -> Result<()> {
        sqlx::query(include_str!("../queries/flush_tag.sql"))
            .bind(tag.as_str())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        sqlx::query(include_str!("../queries/flush_all.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_connect_in_memory() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        assert!(!store.pool.is_closed());
        store.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        // Running migrate again should succeed (already applied)
        store.migrate().await.unwrap();
        store.close().await;
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("cache.sqlite");
        let store = SqliteStore::connect(&path).await.unwrap();
        store.set("k", "v".to_string(), Tag::File, HOUR).await.unwrap();
        store.close().await;
        assert!(path.exists());
        // Entries survive reconnecting.
        let store = SqliteStore::connect(&path).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.close().await;
    }

    #[tokio::test]
    async fn test_set_replaces_wholesale() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store.set("k", "one".to_string(), Tag::File, HOUR).await.unwrap();
        store.set("k", "two".to_string(), Tag::Folder, HOUR).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
        // The tag moved along with the value.
        store.flush_tag(Tag::File).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
        store.flush_tag(Tag::Folder).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flush_all() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store.set("a", "1".to_string(), Tag::File, HOUR).await.unwrap();
        store.set("b", "2".to_string(), Tag::Folder, HOUR).await.unwrap();
        store.flush().await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store.set("k", "v".to_string(), Tag::File, Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }
}
