//! Persistent sync bookkeeping in the `sync_state` table.

use sqlx::{Sqlite, SqliteConnection};

use crate::clock::Millis;
use crate::db::StoreError;

const LAST_SYNCED_AT: &str = "last_synced_at";
const LAST_ERROR: &str = "last_error";

async fn read(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>, StoreError> {
    let value = sqlx::query_scalar::<Sqlite, String>("SELECT value FROM sync_state WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value)
}

async fn write(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO sync_state (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn remove(conn: &mut SqliteConnection, key: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM sync_state WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Server timestamp of the last successful pull, if any.
pub async fn last_synced_at(conn: &mut SqliteConnection) -> Result<Option<Millis>, StoreError> {
    // An unparseable value is treated as never synced, which forces a full pull
    Ok(read(conn, LAST_SYNCED_AT)
        .await?
        .and_then(|raw| raw.parse::<Millis>().ok()))
}

/// Advances the checkpoint to `timestamp`. It never moves backwards.
///
/// Returns the stored checkpoint.
pub async fn advance(conn: &mut SqliteConnection, timestamp: Millis) -> Result<Millis, StoreError> {
    let next = match last_synced_at(conn).await? {
        Some(current) if current >= timestamp => return Ok(current),
        _ => timestamp,
    };
    write(conn, LAST_SYNCED_AT, &next.to_string()).await?;
    Ok(next)
}

pub async fn last_error(conn: &mut SqliteConnection) -> Result<Option<String>, StoreError> {
    read(conn, LAST_ERROR).await
}

/// Records the outcome of the latest round. `None` clears a previous error.
pub async fn record_error(
    conn: &mut SqliteConnection,
    error: Option<&str>,
) -> Result<(), StoreError> {
    match error {
        Some(message) => write(conn, LAST_ERROR, message).await,
        None => remove(conn, LAST_ERROR).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_checkpoint_starts_empty_and_advances() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(last_synced_at(&mut conn).await.unwrap(), None);

        assert_eq!(advance(&mut conn, 100).await.unwrap(), 100);
        assert_eq!(last_synced_at(&mut conn).await.unwrap(), Some(100));

        // Never regresses
        assert_eq!(advance(&mut conn, 40).await.unwrap(), 100);
        assert_eq!(last_synced_at(&mut conn).await.unwrap(), Some(100));

        assert_eq!(advance(&mut conn, 250).await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_checkpoint_rolls_back_with_transaction() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();

        {
            let mut tx = pool.begin().await.unwrap();
            advance(&mut tx, 500).await.unwrap();
            tx.rollback().await.unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(last_synced_at(&mut conn).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_error_set_and_cleared() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        record_error(&mut conn, Some("Offline")).await.unwrap();
        assert_eq!(last_error(&mut conn).await.unwrap().as_deref(), Some("Offline"));

        record_error(&mut conn, None).await.unwrap();
        assert_eq!(last_error(&mut conn).await.unwrap(), None);
    }
}
