//! Change sets exchanged with the sync server.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::wire::{
    CustomerDto, InvoiceDto, MeasurementDto, MeasurementTemplateDto, OrderDto, Syncable,
};
use crate::clock::Millis;
use crate::db::{Filter, Store, StoreError, Table, Tombstones};
use crate::models::{Customer, Invoice, Measurement, MeasurementTemplate, Order, SyncStatus};

/// A deleted row. Servers may send bare ids; local pushes always carry the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TombstoneRepr", rename_all = "camelCase")]
pub struct Tombstone {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Millis>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TombstoneRepr {
    Id(String),
    #[serde(rename_all = "camelCase")]
    Full {
        id: String,
        #[serde(default)]
        deleted_at: Option<Millis>,
    },
}

impl From<TombstoneRepr> for Tombstone {
    fn from(repr: TombstoneRepr) -> Self {
        match repr {
            TombstoneRepr::Id(id) => Tombstone {
                id,
                deleted_at: None,
            },
            TombstoneRepr::Full { id, deleted_at } => Tombstone { id, deleted_at },
        }
    }
}

/// Changes for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "D: serde::de::DeserializeOwned"))]
pub struct EntityChanges<D> {
    #[serde(default)]
    pub created: Vec<D>,
    #[serde(default)]
    pub updated: Vec<D>,
    #[serde(default)]
    pub deleted: Vec<Tombstone>,
}

impl<D> Default for EntityChanges<D> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<D> EntityChanges<D> {
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every entity's changes, keyed on the wire by table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub customers: EntityChanges<CustomerDto>,
    #[serde(default)]
    pub measurement_templates: EntityChanges<MeasurementTemplateDto>,
    #[serde(default)]
    pub measurements: EntityChanges<MeasurementDto>,
    #[serde(default)]
    pub orders: EntityChanges<OrderDto>,
    #[serde(default)]
    pub invoices: EntityChanges<InvoiceDto>,
}

impl ChangeSet {
    pub fn len(&self) -> usize {
        self.customers.len()
            + self.measurement_templates.len()
            + self.measurements.len()
            + self.orders.len()
            + self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The version of a row that went into a push, used to acknowledge it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushedVersion {
    pub table: Table,
    pub id: Uuid,
    pub updated_at: Millis,
    pub deleted: bool,
}

/// A change set ready to push, plus the row versions it was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundBatch {
    pub changes: ChangeSet,
    pub versions: Vec<PushedVersion>,
}

impl OutboundBatch {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Collects every pending local change of `owner_id`.
///
/// Dirty live rows go to `created` when they were never modified after
/// creation and to `updated` otherwise; tombstoned rows go to `deleted`.
/// Run it inside a transaction to read a consistent snapshot.
pub async fn build_change_set(
    conn: &mut SqliteConnection,
    owner_id: &str,
) -> Result<OutboundBatch, StoreError> {
    let mut batch = OutboundBatch::default();

    collect::<Customer>(conn, owner_id, &mut batch).await?;
    collect::<MeasurementTemplate>(conn, owner_id, &mut batch).await?;
    collect::<Measurement>(conn, owner_id, &mut batch).await?;
    collect::<Order>(conn, owner_id, &mut batch).await?;
    collect::<Invoice>(conn, owner_id, &mut batch).await?;

    Ok(batch)
}

async fn collect<S: Syncable>(
    conn: &mut SqliteConnection,
    owner_id: &str,
    batch: &mut OutboundBatch,
) -> Result<(), StoreError> {
    let dirty =
        Store::query_in::<S>(conn, &Filter::owned_by(owner_id).status(SyncStatus::Dirty)).await?;
    let tombstoned = Store::query_in::<S>(
        conn,
        &Filter::owned_by(owner_id).tombstones(Tombstones::Only),
    )
    .await?;

    let slot = S::changes_mut(&mut batch.changes);

    for record in &dirty {
        let meta = record.meta();
        if meta.created_at == meta.updated_at {
            slot.created.push(record.to_dto());
        } else {
            slot.updated.push(record.to_dto());
        }
        batch.versions.push(PushedVersion {
            table: S::TABLE,
            id: meta.id,
            updated_at: meta.updated_at,
            deleted: false,
        });
    }

    for record in &tombstoned {
        let meta = record.meta();
        slot.deleted.push(Tombstone {
            id: meta.id.to_string(),
            deleted_at: meta.deleted_at,
        });
        batch.versions.push(PushedVersion {
            table: S::TABLE,
            id: meta.id,
            updated_at: meta.updated_at,
            deleted: true,
        });
    }

    Ok(())
}
