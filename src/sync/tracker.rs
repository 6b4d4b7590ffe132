//! Stamps every local write with sync metadata.
//!
//! All user-initiated creates, updates and deletes go through
//! [`MutationTracker`]: it sets `created_at`/`updated_at`, flips the row to
//! dirty and turns deletes into tombstones so they can be pushed.

use std::sync::Arc;

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::clock::{Clock, Millis};
use crate::db::{Filter, ParentKey, Record, Store, StoreError, Table};
use crate::models::{Invoice, Measurement, Order, SyncStatus};

#[derive(Clone)]
pub struct MutationTracker {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MutationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationTracker")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl MutationTracker {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn now(&self) -> Millis {
        self.clock.now()
    }

    /// Inserts a new dirty row with `created_at == updated_at == now`.
    pub async fn create<T: Record>(&self, mut record: T) -> Result<T, StoreError> {
        let now = self.clock.now();
        let meta = record.meta_mut();
        meta.created_at = now;
        meta.updated_at = now;
        meta.deleted_at = None;
        meta.sync_status = SyncStatus::Dirty;

        self.store.insert(&record).await?;
        Ok(record)
    }

    /// Applies `edit` to a live row's domain fields, then stamps it dirty.
    ///
    /// Metadata changes made by `edit` are discarded. Tombstoned rows are
    /// reported as `NotFound`.
    pub async fn update<T, F>(&self, id: Uuid, edit: F) -> Result<T, StoreError>
    where
        T: Record,
        F: FnOnce(&mut T),
    {
        let now = self.clock.now();
        self.store
            .update::<T, _>(id, |record| {
                if record.meta().is_deleted() {
                    return Err(StoreError::not_found(T::TABLE, id));
                }
                let meta = record.meta().clone();
                edit(record);
                *record.meta_mut() = meta;
                record.meta_mut().touch(now);
                Ok(())
            })
            .await
    }

    /// Soft-deletes a live row together with its dependents.
    ///
    /// Deleting a customer tombstones their measurements, orders and
    /// invoices; deleting an order tombstones its invoices. Everything
    /// commits in one transaction with the same `deleted_at`.
    pub async fn soft_delete<T: Record>(&self, id: Uuid) -> Result<T, StoreError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let record = tombstone_in::<T>(&mut tx, id, now).await?;
        let mut touched = vec![T::TABLE];

        match T::TABLE {
            Table::Customers => {
                if tombstone_children::<Measurement>(&mut tx, ParentKey::Customer, id, now).await?
                    > 0
                {
                    touched.push(Table::Measurements);
                }
                if tombstone_children::<Order>(&mut tx, ParentKey::Customer, id, now).await? > 0 {
                    touched.push(Table::Orders);
                }
                if tombstone_children::<Invoice>(&mut tx, ParentKey::Customer, id, now).await? > 0
                {
                    touched.push(Table::Invoices);
                }
            }
            Table::Orders => {
                if tombstone_children::<Invoice>(&mut tx, ParentKey::Order, id, now).await? > 0 {
                    touched.push(Table::Invoices);
                }
            }
            _ => {}
        }

        tx.commit().await?;
        for table in touched {
            self.store.notify(table);
        }

        tracing::debug!(table = %T::TABLE, %id, "Soft-deleted row");
        Ok(record)
    }
}

async fn tombstone_in<T: Record>(
    conn: &mut SqliteConnection,
    id: Uuid,
    now: Millis,
) -> Result<T, StoreError> {
    let mut record = Store::fetch_in::<T>(conn, id)
        .await?
        .filter(|r| !r.meta().is_deleted())
        .ok_or_else(|| StoreError::not_found(T::TABLE, id))?;

    record.meta_mut().tombstone(now);
    Store::write_in(conn, &record).await?;
    Ok(record)
}

async fn tombstone_children<C: Record>(
    conn: &mut SqliteConnection,
    key: ParentKey,
    parent_id: Uuid,
    now: Millis,
) -> Result<usize, StoreError> {
    let children = Store::query_in::<C>(conn, &Filter::new().child_of(key, parent_id)).await?;
    let count = children.len();
    for mut child in children {
        child.meta_mut().tombstone(now);
        Store::write_in(conn, &child).await?;
    }
    Ok(count)
}
