//! The host's file catalog.
//!
//! One row per file the host knows about: which storage scope holds it and
//! under which identifier. Migrations select their work from here and
//! re-point rows at the target scope once a file has moved.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
const MAX_CONNECTIONS: u32 = 2;

/// A catalogued file.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CatalogFile {
    pub uid: i64,
    /// File identifier within its storage (`/photos/beach.jpg`).
    pub identifier: String,
    /// Name of the storage scope currently holding the file.
    pub storage: String,
}

/// `offset,limit` window over the selected rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}
impl FromStr for Window {
    type Err = crate::error::Error;

    /// Either `limit` or `offset,limit`; blank parts are ignored.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).filter(|part| !part.is_empty()).collect();
        let number = |part: &str| part.parse::<u64>().or_raise(|| ErrorKind::InvalidSelection(s.to_string()));
        match parts.as_slice() {
            [] => Ok(Self::default()),
            [limit] => Ok(Self {
                offset: None,
                limit: Some(number(*limit)?),
            }),
            [offset, limit] => Ok(Self {
                offset: Some(number(*offset)?),
                limit: Some(number(*limit)?),
            }),
            _ => exn::bail!(ErrorKind::InvalidSelection(s.to_string())),
        }
    }
}

/// Which files of a storage scope to migrate.
///
/// Patterns use SQL `LIKE` syntax against the identifier (`%.pdf`,
/// `/_temp/%`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub include: Option<String>,
    pub exclude: Vec<String>,
    pub window: Window,
}
impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.include = (!pattern.trim().is_empty()).then_some(pattern);
        self
    }

    /// Comma-separated exclude patterns, appended to any already set.
    pub fn exclude(mut self, patterns: &str) -> Self {
        self.exclude.extend(
            patterns.split(',').map(str::trim).filter(|pattern| !pattern.is_empty()).map(str::to_string),
        );
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
    read_only: bool,
}

impl Catalog {
    async fn pool(options: SqliteConnectOptions, max: u32) -> Result<SqlitePool> {
        SqlitePoolOptions::new()
            .max_connections(max)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Catalog)
    }

    /// Open the host's catalog database at `path`.
    ///
    /// The database belongs to the host: nothing is created or migrated, it
    /// only has to carry a `files` table already.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(path.as_ref()).create_if_missing(false);
        let pool = Self::pool(options, MAX_CONNECTIONS).await?;
        let tables: i64 = sqlx::query_scalar(include_str!("../queries/has_files_table.sql"))
            .fetch_one(&pool)
            .await
            .or_raise(|| ErrorKind::Catalog)?;
        if tables == 0 {
            pool.close().await;
            exn::bail!(ErrorKind::NotACatalog);
        }
        Ok(Self { pool, read_only: false })
    }

    /// Connect to an empty in-memory catalog (useful for testing).
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(":memory:");
        let pool = Self::pool(options, 1).await?;
        MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::Catalog)?;
        Ok(Self { pool, read_only: false })
    }

    /// Turn [`reassign`](Self::reassign) into a logged no-op. Used for dry runs.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Add a file row, returning its uid.
    pub async fn insert(&self, identifier: &str, storage: &str, missing: bool) -> Result<i64> {
        sqlx::query_scalar(include_str!("../queries/insert_file.sql"))
            .bind(identifier)
            .bind(storage)
            .bind(i64::from(missing))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Catalog)
    }

    pub async fn get(&self, uid: i64) -> Result<Option<CatalogFile>> {
        sqlx::query_as(include_str!("../queries/get_file.sql"))
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Catalog)
    }

    /// Files of `storage` not flagged as missing, in uid order, narrowed by
    /// `selection`.
    pub async fn select(&self, storage: &str, selection: &Selection) -> Result<Vec<CatalogFile>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT uid, identifier, storage FROM files WHERE missing = 0 AND storage = ");
        query.push_bind(storage);
        if let Some(include) = &selection.include {
            query.push(" AND identifier LIKE ").push_bind(include);
        }
        for exclude in &selection.exclude {
            query.push(" AND identifier NOT LIKE ").push_bind(exclude);
        }
        query.push(" ORDER BY uid");
        let Window { offset, limit } = selection.window;
        if limit.is_some() || offset.is_some() {
            // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
            let limit = limit.map_or(Ok(-1), i64::try_from).or_raise(|| ErrorKind::Catalog)?;
            query.push(" LIMIT ").push_bind(limit);
            if let Some(offset) = offset {
                let offset = i64::try_from(offset).or_raise(|| ErrorKind::Catalog)?;
                query.push(" OFFSET ").push_bind(offset);
            }
        }
        query.build_query_as::<CatalogFile>().fetch_all(&self.pool).await.or_raise(|| ErrorKind::Catalog)
    }

    /// Point a file row at another storage scope.
    pub async fn reassign(&self, uid: i64, storage: &str) -> Result<()> {
        if self.read_only {
            tracing::info!(uid, storage, "Skipping catalog update during read-only mode");
            return Ok(());
        }
        let result = sqlx::query(include_str!("../queries/reassign_file.sql"))
            .bind(storage)
            .bind(uid)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Catalog)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::Catalog);
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
