use futures::stream::{self, Stream};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::error::StoreError;
use super::filter::Filter;
use super::record::{bind_meta_without_id, Record, Table, META_COLUMNS};
use crate::clock::Millis;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Local store of synchronizable records.
///
/// Every write goes through a transaction; committed writes are announced on
/// a broadcast channel so observers can re-query.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    changes: broadcast::Sender<Table>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Announces a committed write to observers of `table`.
    pub fn notify(&self, table: Table) {
        // No receivers is fine
        let _ = self.changes.send(table);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Table> {
        self.changes.subscribe()
    }

    // ========== Pool-level operations ==========

    /// Inserts a new record. Fails with `ConstraintViolation` if the id exists.
    pub async fn insert<T: Record>(&self, record: &T) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        Self::insert_in(&mut tx, record).await?;
        tx.commit().await?;
        self.notify(T::TABLE);
        Ok(())
    }

    pub async fn get<T: Record>(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_in(&mut conn, id).await
    }

    /// Loads the row, applies `mutator` and persists the result atomically.
    pub async fn update<T, F>(&self, id: Uuid, mutator: F) -> Result<T, StoreError>
    where
        T: Record,
        F: FnOnce(&mut T) -> Result<(), StoreError>,
    {
        let mut tx = self.begin().await?;
        let mut record = Self::fetch_in::<T>(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found(T::TABLE, id))?;

        mutator(&mut record)?;
        Self::write_in(&mut tx, &record).await?;

        tx.commit().await?;
        self.notify(T::TABLE);
        Ok(record)
    }

    pub async fn query<T: Record>(&self, filter: &Filter) -> Result<Vec<T>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::query_in(&mut conn, filter).await
    }

    pub async fn count<T: Record>(&self, filter: &Filter) -> Result<i64, StoreError> {
        let (conditions, binds) = filter.to_sql();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            T::TABLE.name(),
            conditions
        );

        let mut query = sqlx::query_scalar::<Sqlite, i64>(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        Ok(query.fetch_one(&self.pool).await?)
    }

    /// Physically removes a row. Returns whether a row was removed.
    pub async fn purge<T: Record>(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;
        let removed = Self::purge_in(&mut tx, T::TABLE, id).await?;
        tx.commit().await?;
        if removed {
            self.notify(T::TABLE);
        }
        Ok(removed)
    }

    /// Live result-set snapshots for `filter`.
    ///
    /// Emits the current rows first, then a new snapshot after each committed
    /// write to the table that changes the result. The stream never ends on its
    /// own; drop it to unsubscribe.
    pub fn observe<T: Record>(
        &self,
        filter: Filter,
    ) -> impl Stream<Item = Result<Vec<T>, StoreError>> + Send + 'static {
        let receiver = self.subscribe();
        let state = (self.clone(), receiver, filter, None::<Vec<T>>, true);

        stream::unfold(
            state,
            |(store, mut receiver, filter, last, mut first)| async move {
                loop {
                    if !first {
                        match receiver.recv().await {
                            Ok(table) if table != T::TABLE => continue,
                            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                    first = false;

                    match store.query::<T>(&filter).await {
                        Ok(rows) if last.as_ref() == Some(&rows) => continue,
                        Ok(rows) => {
                            let snapshot = rows.clone();
                            return Some((Ok(snapshot), (store, receiver, filter, Some(rows), false)));
                        }
                        Err(e) => return Some((Err(e), (store, receiver, filter, last, false))),
                    }
                }
            },
        )
    }

    // ========== Connection-level operations ==========
    //
    // Used inside a caller-owned transaction so that several writes commit or
    // roll back together. Callers must `notify` after commit.

    pub async fn insert_in<T: Record>(
        conn: &mut SqliteConnection,
        record: &T,
    ) -> Result<(), StoreError> {
        let id = record.id();
        if Self::exists_in(conn, T::TABLE, id).await? {
            return Err(StoreError::ConstraintViolation { table: T::TABLE, id });
        }

        let columns: Vec<&str> = META_COLUMNS
            .iter()
            .chain(T::COLUMNS.iter())
            .copied()
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::TABLE.name(),
            columns.join(", "),
            placeholders
        );

        let query = sqlx::query(&sql).bind(id.to_string());
        let query = bind_meta_without_id(record.meta(), query);
        let query = record.bind_columns(query);

        query.execute(&mut *conn).await.map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::ConstraintViolation { table: T::TABLE, id }
            }
            e => StoreError::Database(e),
        })?;
        Ok(())
    }

    pub async fn fetch_in<T: Record>(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> Result<Option<T>, StoreError> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", T::TABLE.name());
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Overwrites every column of an existing row. Fails with `NotFound` if absent.
    pub async fn write_in<T: Record>(
        conn: &mut SqliteConnection,
        record: &T,
    ) -> Result<(), StoreError> {
        let assignments: Vec<String> = META_COLUMNS[1..]
            .iter()
            .chain(T::COLUMNS.iter())
            .map(|column| format!("{} = ?", column))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            T::TABLE.name(),
            assignments.join(", ")
        );

        let query = bind_meta_without_id(record.meta(), sqlx::query(&sql));
        let query = record.bind_columns(query).bind(record.id().to_string());

        let result = query.execute(&mut *conn).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(T::TABLE, record.id()));
        }
        Ok(())
    }

    pub async fn query_in<T: Record>(
        conn: &mut SqliteConnection,
        filter: &Filter,
    ) -> Result<Vec<T>, StoreError> {
        let (conditions, binds) = filter.to_sql();
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY created_at, id",
            T::TABLE.name(),
            conditions
        );

        let mut query = sqlx::query::<Sqlite>(&sql);
        for value in &binds {
            query = query.bind(value);
        }

        let rows = query.fetch_all(&mut *conn).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(T::from_row(row)?);
        }
        Ok(records)
    }

    pub async fn exists_in(
        conn: &mut SqliteConnection,
        table: Table,
        id: Uuid,
    ) -> Result<bool, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", table.name());
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id.to_string())
            .fetch_one(&mut *conn)
            .await?;
        Ok(count > 0)
    }

    pub async fn purge_in(
        conn: &mut SqliteConnection,
        table: Table,
        id: Uuid,
    ) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table.name());
        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Marks a live row synced, but only if it still carries the pushed version.
    pub async fn mark_synced_in(
        conn: &mut SqliteConnection,
        table: Table,
        id: Uuid,
        pushed_updated_at: Millis,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET sync_status = 'synced' WHERE id = ? AND updated_at = ? AND deleted_at IS NULL",
            table.name()
        );
        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(pushed_updated_at)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Physically removes a row only if it is still tombstoned.
    pub async fn purge_tombstone_in(
        conn: &mut SqliteConnection,
        table: Table,
        id: Uuid,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ? AND deleted_at IS NOT NULL",
            table.name()
        );
        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
