mod error;
mod filter;
pub mod migrations;
mod record;
mod store;

pub use error::StoreError;
pub use filter::{Filter, ParentKey, Tombstones};
pub use migrations::SCHEMA_VERSION;
pub use record::{Record, SqliteQuery, Table};
pub use store::Store;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// UI writes and sync apply share one connection and never interleave.
/// Never hold a connection while calling a pool-level [`Store`] method.
const MAX_CONNECTIONS: u32 = 1;

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: impl AsRef<Path>) -> Result<SqlitePool, StoreError> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    migrations::run(&pool).await?;

    Ok(pool)
}

/// Opens the database at `path` and wraps it in a [`Store`].
pub async fn open_store(path: impl AsRef<Path>) -> Result<Store, StoreError> {
    let pool = init_db(path).await?;
    Ok(Store::new(pool))
}
