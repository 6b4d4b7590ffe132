//! One push-then-pull sync round.
//!
//! A round pushes every pending local change, acknowledges what was pushed,
//! pulls everything newer than the checkpoint and applies it under
//! last-writer-wins. The apply and the checkpoint advance commit in one
//! transaction, so an interrupted round is simply repeated.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::changeset::{build_change_set, ChangeSet, PushedVersion};
use super::checkpoint;
use super::error::SyncError;
use super::transport::{PullResponse, PushRequest, Transport};
use super::wire::{parse_id, Syncable};
use crate::clock::Millis;
use crate::db::{Store, StoreError, Table, SCHEMA_VERSION};
use crate::models::{Customer, Invoice, Measurement, MeasurementTemplate, Order};

/// Where the engine is within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Pushing,
    Pulling,
    Applying,
    /// The last round failed. Cleared when the next round starts.
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Pushing => write!(f, "pushing"),
            SyncPhase::Pulling => write!(f, "pulling"),
            SyncPhase::Applying => write!(f, "applying"),
            SyncPhase::Failed => write!(f, "failed"),
        }
    }
}

/// What a successful round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Rows sent to the server.
    pub pushed: usize,
    /// Pushed rows marked synced afterwards.
    pub confirmed: usize,
    /// Pushed tombstones physically removed afterwards.
    pub purged: usize,
    /// Inbound rows inserted or overwritten.
    pub applied: usize,
    /// Inbound rows that lost last-writer-wins or hit a local tombstone.
    pub skipped: usize,
    /// Local rows removed by inbound deletions.
    pub removed: usize,
    /// Checkpoint after the round.
    pub checkpoint: Millis,
}

/// Inbound rows of one entity, already mapped to records.
struct Inbound<S> {
    upserts: Vec<S>,
    deletions: Vec<Uuid>,
}

fn take_inbound<S: Syncable>(
    changes: &mut ChangeSet,
    owner_id: &str,
) -> Result<Inbound<S>, SyncError> {
    let slot = std::mem::take(S::changes_mut(changes));

    let mut upserts = Vec::with_capacity(slot.created.len() + slot.updated.len());
    for dto in slot.created.into_iter().chain(slot.updated) {
        upserts.push(S::from_dto(dto, owner_id)?);
    }

    let mut deletions = Vec::with_capacity(slot.deleted.len());
    for tombstone in &slot.deleted {
        deletions.push(parse_id(S::TABLE, "id", &tombstone.id)?);
    }

    Ok(Inbound { upserts, deletions })
}

struct InboundBatch {
    customers: Inbound<Customer>,
    templates: Inbound<MeasurementTemplate>,
    measurements: Inbound<Measurement>,
    orders: Inbound<Order>,
    invoices: Inbound<Invoice>,
}

impl InboundBatch {
    /// Maps the whole pull before anything is written.
    fn map(mut changes: ChangeSet, owner_id: &str) -> Result<Self, SyncError> {
        Ok(Self {
            customers: take_inbound(&mut changes, owner_id)?,
            templates: take_inbound(&mut changes, owner_id)?,
            measurements: take_inbound(&mut changes, owner_id)?,
            orders: take_inbound(&mut changes, owner_id)?,
            invoices: take_inbound(&mut changes, owner_id)?,
        })
    }
}

#[derive(Debug, Default)]
struct ApplyCounts {
    applied: usize,
    skipped: usize,
    removed: usize,
    touched: BTreeSet<&'static str>,
}

/// Applies inbound rows of one entity under last-writer-wins.
///
/// An inbound row wins only with a strictly newer `updated_at`; ties keep
/// the local row. Local tombstones are terminal and never revived. An
/// inbound tombstone that wins removes the row.
async fn apply_entity<S: Syncable>(
    conn: &mut SqliteConnection,
    inbound: Inbound<S>,
    counts: &mut ApplyCounts,
) -> Result<(), StoreError> {
    for incoming in inbound.upserts {
        let id = incoming.id();
        match Store::fetch_in::<S>(conn, id).await? {
            None if incoming.meta().is_deleted() => counts.skipped += 1,
            None => {
                Store::insert_in(conn, &incoming).await?;
                counts.applied += 1;
                counts.touched.insert(S::TABLE.name());
            }
            Some(local) if local.meta().is_deleted() => {
                debug!(table = %S::TABLE, %id, "Keeping local tombstone");
                counts.skipped += 1;
            }
            Some(local) if incoming.meta().updated_at <= local.meta().updated_at => {
                debug!(
                    table = %S::TABLE,
                    %id,
                    local = local.meta().updated_at,
                    remote = incoming.meta().updated_at,
                    "Local row wins"
                );
                counts.skipped += 1;
            }
            Some(_) if incoming.meta().is_deleted() => {
                Store::purge_in(conn, S::TABLE, id).await?;
                counts.removed += 1;
                counts.touched.insert(S::TABLE.name());
            }
            Some(_) => {
                Store::write_in(conn, &incoming).await?;
                counts.applied += 1;
                counts.touched.insert(S::TABLE.name());
            }
        }
    }

    for id in inbound.deletions {
        if Store::purge_in(conn, S::TABLE, id).await? {
            counts.removed += 1;
            counts.touched.insert(S::TABLE.name());
        }
    }

    Ok(())
}

/// Runs sync rounds for one account against one transport.
pub struct SyncEngine<T> {
    store: Store,
    transport: T,
    owner_id: String,
    phase: watch::Sender<SyncPhase>,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(store: Store, transport: T, owner_id: impl Into<String>) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            store,
            transport,
            owner_id: owner_id.into(),
            phase,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn phases(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }

    /// Runs one full round: push, acknowledge, pull, apply.
    ///
    /// Callers must not run two rounds concurrently; the scheduler guards this.
    #[tracing::instrument(skip(self), fields(owner = %self.owner_id))]
    pub async fn run_round(&self) -> Result<RoundReport, SyncError> {
        match self.round().await {
            Ok(report) => {
                self.set_phase(SyncPhase::Idle);
                info!(
                    pushed = report.pushed,
                    applied = report.applied,
                    removed = report.removed,
                    checkpoint = report.checkpoint,
                    "Sync round complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_phase(SyncPhase::Failed);
                warn!(error = %e, "Sync round failed");
                Err(e)
            }
        }
    }

    async fn round(&self) -> Result<RoundReport, SyncError> {
        let mut report = RoundReport::default();

        let last_pulled_at = {
            let mut conn = self.store.pool().acquire().await.map_err(StoreError::from)?;
            checkpoint::last_synced_at(&mut conn).await?
        };

        // Push
        self.set_phase(SyncPhase::Pushing);
        let batch = {
            let mut tx = self.store.begin().await?;
            let batch = build_change_set(&mut tx, &self.owner_id).await?;
            tx.commit().await.map_err(StoreError::from)?;
            batch
        };

        if batch.is_empty() {
            debug!("Nothing to push");
        } else {
            report.pushed = batch.versions.len();
            debug!(rows = report.pushed, "Pushing local changes");

            let request = PushRequest {
                changes: batch.changes,
                last_pulled_at,
            };
            self.transport.push(&request).await?;

            let (confirmed, purged) = self.acknowledge(&batch.versions).await?;
            report.confirmed = confirmed;
            report.purged = purged;
        }

        // Pull
        self.set_phase(SyncPhase::Pulling);
        let response = self.transport.pull(last_pulled_at, SCHEMA_VERSION).await?;

        // Apply
        self.set_phase(SyncPhase::Applying);
        self.apply(response, &mut report).await?;

        Ok(report)
    }

    /// Marks pushed rows synced and removes pushed tombstones.
    ///
    /// A row edited again while the push was in flight no longer matches
    /// the pushed version and stays dirty for the next round.
    async fn acknowledge(&self, versions: &[PushedVersion]) -> Result<(usize, usize), SyncError> {
        let mut confirmed = 0;
        let mut purged = 0;
        let mut touched = BTreeSet::new();

        let mut tx = self.store.begin().await?;
        for version in versions {
            if version.deleted {
                if Store::purge_tombstone_in(&mut tx, version.table, version.id).await? {
                    purged += 1;
                    touched.insert(version.table.name());
                }
            } else if Store::mark_synced_in(&mut tx, version.table, version.id, version.updated_at)
                .await?
            {
                confirmed += 1;
                touched.insert(version.table.name());
            }
        }
        tx.commit().await.map_err(StoreError::from)?;

        self.notify(&touched);
        Ok((confirmed, purged))
    }

    /// Applies a pull and advances the checkpoint atomically.
    async fn apply(
        &self,
        response: PullResponse,
        report: &mut RoundReport,
    ) -> Result<(), SyncError> {
        let PullResponse { changes, timestamp } = response;
        let inbound = InboundBatch::map(changes, &self.owner_id)?;
        let mut counts = ApplyCounts::default();

        let checkpoint = self
            .apply_batch(inbound, timestamp, &mut counts)
            .await
            .map_err(SyncError::Apply)?;

        self.notify(&counts.touched);

        report.applied = counts.applied;
        report.skipped = counts.skipped;
        report.removed = counts.removed;
        report.checkpoint = checkpoint;
        Ok(())
    }

    async fn apply_batch(
        &self,
        inbound: InboundBatch,
        timestamp: Millis,
        counts: &mut ApplyCounts,
    ) -> Result<Millis, StoreError> {
        let mut tx = self.store.begin().await?;

        // Parents before children
        apply_entity(&mut tx, inbound.customers, counts).await?;
        apply_entity(&mut tx, inbound.templates, counts).await?;
        apply_entity(&mut tx, inbound.measurements, counts).await?;
        apply_entity(&mut tx, inbound.orders, counts).await?;
        apply_entity(&mut tx, inbound.invoices, counts).await?;

        let checkpoint = checkpoint::advance(&mut tx, timestamp).await?;
        tx.commit().await?;
        Ok(checkpoint)
    }

    fn notify(&self, touched: &BTreeSet<&'static str>) {
        for table in Table::ALL {
            if touched.contains(table.name()) {
                self.store.notify(table);
            }
        }
    }
}
