//! Connection pool and schema migrations.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::StoreResult;

/// Maximum pooled connections for file-backed databases.
const MAX_CONNECTIONS: u32 = 4;

/// A SQLite database with the scanner schema applied.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `url` and run migrations.
    ///
    /// `sqlite::memory:` URLs get a single connection that is never recycled,
    /// so every query sees the same in-memory database.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        debug!(url, "Connecting to database");

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = if is_memory_url(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(Duration::from_secs(30))
                .connect_with(options.pragma("journal_mode", "WAL"))
                .await?
        };

        let db = Self { pool };
        db.migrate().await?;
        info!(url, "Database ready");
        Ok(db)
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
