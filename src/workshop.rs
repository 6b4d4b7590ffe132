//! Owner-scoped entry point for application code.
//!
//! Every write goes through the [`MutationTracker`], so callers never touch
//! sync metadata. Reads only ever see live rows of the configured owner.

use std::sync::Arc;

use futures::Stream;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{Filter, ParentKey, Record, Store, StoreError, Table, Tombstones};
use crate::models::{Customer, Invoice, Measurement, MeasurementTemplate, Order, SyncStatus};
use crate::sync::{MutationTracker, SyncTriggers};

#[derive(Debug, Clone)]
pub struct Workshop {
    tracker: MutationTracker,
    owner_id: String,
    triggers: Option<SyncTriggers>,
}

/// Rows waiting to be pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pub dirty: i64,
    pub deleted: i64,
}

impl PendingChanges {
    pub fn total(&self) -> i64 {
        self.dirty + self.deleted
    }
}

impl Workshop {
    pub fn new(store: Store, clock: Arc<dyn Clock>, owner_id: impl Into<String>) -> Self {
        Self {
            tracker: MutationTracker::new(store, clock),
            owner_id: owner_id.into(),
            triggers: None,
        }
    }

    /// Requests a background sync after every successful write.
    pub fn with_triggers(mut self, triggers: SyncTriggers) -> Self {
        self.triggers = Some(triggers);
        self
    }

    pub fn store(&self) -> &Store {
        self.tracker.store()
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn filter(&self) -> Filter {
        Filter::owned_by(&self.owner_id)
    }

    fn written(&self) {
        if let Some(triggers) = &self.triggers {
            triggers.local_write();
        }
    }

    async fn create<T: Record>(&self, mut record: T) -> Result<T, StoreError> {
        record.meta_mut().owner_id = self.owner_id.clone();
        let record = self.tracker.create(record).await?;
        self.written();
        Ok(record)
    }

    /// Fails with `NotFound` unless `id` is a live row of this owner.
    async fn require<T: Record>(&self, id: Uuid) -> Result<T, StoreError> {
        self.get::<T>(id)
            .await?
            .ok_or_else(|| StoreError::not_found(T::TABLE, id))
    }

    // ========== Writes ==========

    pub async fn add_customer(&self, customer: Customer) -> Result<Customer, StoreError> {
        self.create(customer).await
    }

    pub async fn add_template(
        &self,
        template: MeasurementTemplate,
    ) -> Result<MeasurementTemplate, StoreError> {
        self.create(template).await
    }

    pub async fn add_measurement(
        &self,
        measurement: Measurement,
    ) -> Result<Measurement, StoreError> {
        self.require::<Customer>(measurement.customer_id).await?;
        self.create(measurement).await
    }

    pub async fn add_order(&self, order: Order) -> Result<Order, StoreError> {
        self.require::<Customer>(order.customer_id).await?;
        self.create(order).await
    }

    pub async fn add_invoice(&self, invoice: Invoice) -> Result<Invoice, StoreError> {
        self.require::<Customer>(invoice.customer_id).await?;
        self.require::<Order>(invoice.order_id).await?;
        self.create(invoice).await
    }

    /// Edits a live row's domain fields.
    pub async fn update<T, F>(&self, id: Uuid, edit: F) -> Result<T, StoreError>
    where
        T: Record,
        F: FnOnce(&mut T),
    {
        self.require::<T>(id).await?;
        let record = self.tracker.update(id, edit).await?;
        self.written();
        Ok(record)
    }

    /// Soft-deletes a live row and its dependents.
    pub async fn delete<T: Record>(&self, id: Uuid) -> Result<T, StoreError> {
        self.require::<T>(id).await?;
        let record = self.tracker.soft_delete::<T>(id).await?;
        self.written();
        Ok(record)
    }

    // ========== Reads ==========

    pub async fn get<T: Record>(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        Ok(self
            .store()
            .get::<T>(id)
            .await?
            .filter(|r| r.meta().owner_id == self.owner_id && !r.meta().is_deleted()))
    }

    pub async fn list<T: Record>(&self) -> Result<Vec<T>, StoreError> {
        self.store().query(&self.filter()).await
    }

    pub async fn customer_measurements(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Measurement>, StoreError> {
        self.store()
            .query(&self.filter().child_of(ParentKey::Customer, customer_id))
            .await
    }

    pub async fn customer_orders(&self, customer_id: Uuid) -> Result<Vec<Order>, StoreError> {
        self.store()
            .query(&self.filter().child_of(ParentKey::Customer, customer_id))
            .await
    }

    pub async fn order_invoices(&self, order_id: Uuid) -> Result<Vec<Invoice>, StoreError> {
        self.store()
            .query(&self.filter().child_of(ParentKey::Order, order_id))
            .await
    }

    /// Live snapshots of this owner's rows of `T`.
    pub fn observe<T: Record>(
        &self,
    ) -> impl Stream<Item = Result<Vec<T>, StoreError>> + Send + 'static {
        self.store().observe(self.filter())
    }

    /// Counts rows the next round would push.
    pub async fn pending_changes(&self) -> Result<PendingChanges, StoreError> {
        let mut pending = PendingChanges::default();
        for table in Table::ALL {
            let (dirty, deleted) = match table {
                Table::Customers => self.pending_in::<Customer>().await?,
                Table::MeasurementTemplates => self.pending_in::<MeasurementTemplate>().await?,
                Table::Measurements => self.pending_in::<Measurement>().await?,
                Table::Orders => self.pending_in::<Order>().await?,
                Table::Invoices => self.pending_in::<Invoice>().await?,
            };
            pending.dirty += dirty;
            pending.deleted += deleted;
        }
        Ok(pending)
    }

    async fn pending_in<T: Record>(&self) -> Result<(i64, i64), StoreError> {
        let dirty = self
            .store()
            .count::<T>(&self.filter().status(SyncStatus::Dirty))
            .await?;
        let deleted = self
            .store()
            .count::<T>(&self.filter().tombstones(Tombstones::Only))
            .await?;
        Ok((dirty, deleted))
    }
}
