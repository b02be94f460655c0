//! Pool creation and migration for the embedded local cache, grounded in the
//! teacher's `sqlx`-based sqlite pool setup.

pub mod cache;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

pub async fn create_pool(db_path: &str) -> Result<SqlitePool> {
    info!(db_path, "opening local cache");
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./db/migration/sqlite").run(&pool).await?;

    Ok(pool)
}
