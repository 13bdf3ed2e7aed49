//! SQLite pool setup and schema migrations

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Result;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open (creating if needed) the database at `url` and apply migrations
pub async fn init_db(url: &str, max_connections: u32) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with migrations applied.
///
/// The connection is never recycled; dropping it would drop the database.
pub async fn init_memory_db() -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Log queries that hold the database for too long
pub(crate) fn warn_if_slow(label: &str, started: Instant) {
    let elapsed = started.elapsed().as_millis();
    if elapsed >= 1000 {
        tracing::warn!("Long Query: {} took {}ms", label, elapsed);
    }
}
