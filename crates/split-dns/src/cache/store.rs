use std::path::{Path, PathBuf};
use std::str::FromStr as _;
use std::time::Duration;

use anyhow::Context as _;
use split_dns_lib::QueryType;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

/// One table per cached query type, so A and AAAA entries never share keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTable {
    A,
    Aaaa,
}

impl CacheTable {
    pub const ALL: [CacheTable; 2] = [CacheTable::A, CacheTable::Aaaa];

    /// `None` for the types that aren't cached
    pub fn for_query_type(query_type: QueryType) -> Option<Self> {
        match query_type {
            QueryType::A => Some(CacheTable::A),
            QueryType::AAAA => Some(CacheTable::Aaaa),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CacheTable::A => "a_cache",
            CacheTable::Aaaa => "aaaa_cache",
        }
    }
}

/// `<user cache dir>/split-dns/cache.db`
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("split-dns").join("cache.db"))
}

#[derive(Debug, Clone)]
pub struct SqliteDb {
    connection_pool: SqlitePool,
}

impl SqliteDb {
    pub async fn new(path: &Path) -> anyhow::Result<Self> {
        // Ensure that all directories exist
        tokio::fs::create_dir_all(path.parent().unwrap_or(Path::new("/")))
            .await
            .context("error while creating parent directories for the cache DB")?;

        // Queries read and write through several pooled connections at once
        let connect_options = SqliteConnectOptions::new()
            .create_if_missing(true)
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let connection_pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .max_lifetime(Duration::from_secs(60 * 60 * 8))
            .connect_with(connect_options)
            .await
            .with_context(|| format!("error while opening the cache DB at {:?}", path))?;

        Ok(SqliteDb { connection_pool })
    }

    /// Every pooled connection would get its own empty in-memory database, hence the single
    /// connection that is never recycled.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let connect_options =
            SqliteConnectOptions::from_str("sqlite::memory:").context("invalid in-memory DB options")?;

        let connection_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context("error while opening an in-memory SQLite DB")?;

        Ok(SqliteDb { connection_pool })
    }

    pub async fn init_tables(&self) -> anyhow::Result<()> {
        for table in CacheTable::ALL {
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    domain TEXT PRIMARY KEY,
                    records TEXT NOT NULL
                )",
                table.name()
            );
            sqlx::query(&sql)
                .execute(&self.connection_pool)
                .await
                .with_context(|| format!("error while initializing the '{}' table", table.name()))?;
        }

        Ok(())
    }

    pub async fn get(&self, table: CacheTable, domain: &str) -> anyhow::Result<Option<String>> {
        let sql = format!("SELECT records FROM {} WHERE domain = ?", table.name());
        sqlx::query_scalar::<_, String>(&sql)
            .bind(domain)
            .fetch_optional(&self.connection_pool)
            .await
            .with_context(|| format!("error while reading '{}' from '{}'", domain, table.name()))
    }

    /// Last write wins
    pub async fn set(&self, table: CacheTable, domain: &str, records: &str) -> anyhow::Result<()> {
        let sql = format!(
            "INSERT INTO {} (domain, records) VALUES (?, ?)
            ON CONFLICT(domain) DO UPDATE SET records = excluded.records",
            table.name()
        );
        sqlx::query(&sql)
            .bind(domain)
            .bind(records)
            .execute(&self.connection_pool)
            .await
            .with_context(|| format!("error while writing '{}' into '{}'", domain, table.name()))?;

        Ok(())
    }

    pub async fn close(&self) {
        self.connection_pool.close().await;
    }
}
