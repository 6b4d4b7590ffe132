//! In-memory reference backend for the sync protocol.
//!
//! Rows are kept per account and entity. Every accepted change gets a
//! server stamp that is strictly greater than any stamp issued before for
//! that account; pulls return rows stamped after the client's checkpoint.
//! Conflicts resolve by last-writer-wins on `updatedAt`, and tombstones are
//! terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use crate::clock::{Clock, Millis};
use crate::models::{Customer, Invoice, Measurement, MeasurementTemplate, Order};
use crate::sync::wire::{parse_id, MappingError, Syncable, WireRow};
use crate::sync::{ChangeSet, EntityChanges, PullResponse, PushRequest, Tombstone};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid change set: {0}")]
    Invalid(#[from] MappingError),

    #[error("Client schema version {client} is newer than server version {server}")]
    UnsupportedSchema { client: i64, server: i64 },
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushSummary {
    pub accepted: usize,
    pub ignored: usize,
}

#[derive(Debug, Clone)]
struct StoredRow<D> {
    dto: Option<D>,
    updated_at: Millis,
    deleted_at: Option<Millis>,
    first_stamp: Millis,
    stamp: Millis,
}

#[derive(Debug, Clone)]
struct EntityRows<D> {
    rows: HashMap<String, StoredRow<D>>,
}

impl<D> Default for EntityRows<D> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }
}

/// Issues strictly increasing stamps that never fall behind the wall clock.
#[derive(Debug, Clone, Copy, Default)]
struct Stamper {
    last: Millis,
}

impl Stamper {
    fn next(&mut self, now: Millis) -> Millis {
        self.last = now.max(self.last + 1);
        self.last
    }

    /// Current high-water mark; later stamps are strictly greater.
    fn watermark(&mut self, now: Millis) -> Millis {
        self.last = self.last.max(now);
        self.last
    }
}

#[derive(Debug, Default)]
struct Account {
    stamper: Stamper,
    customers: EntityRows<<Customer as Syncable>::Dto>,
    templates: EntityRows<<MeasurementTemplate as Syncable>::Dto>,
    measurements: EntityRows<<Measurement as Syncable>::Dto>,
    orders: EntityRows<<Order as Syncable>::Dto>,
    invoices: EntityRows<<Invoice as Syncable>::Dto>,
}

fn validate<S: Syncable>(
    changes: &EntityChanges<S::Dto>,
    owner_id: &str,
) -> Result<(), MappingError> {
    for dto in changes.created.iter().chain(&changes.updated) {
        S::from_dto(dto.clone(), owner_id)?;
    }
    for tombstone in &changes.deleted {
        parse_id(S::TABLE, "id", &tombstone.id)?;
    }
    Ok(())
}

fn push_entity<S: Syncable>(
    rows: &mut EntityRows<S::Dto>,
    changes: EntityChanges<S::Dto>,
    stamper: &mut Stamper,
    now: Millis,
    summary: &mut PushSummary,
) {
    for dto in changes.created.into_iter().chain(changes.updated) {
        let id = dto.id().to_string();
        match rows.rows.get_mut(&id) {
            Some(existing) if existing.deleted_at.is_some() => summary.ignored += 1,
            Some(existing) if dto.updated_at() <= existing.updated_at => summary.ignored += 1,
            Some(existing) => {
                existing.updated_at = dto.updated_at();
                existing.deleted_at = dto.deleted_at();
                existing.dto = Some(dto);
                existing.stamp = stamper.next(now);
                summary.accepted += 1;
            }
            None => {
                let stamp = stamper.next(now);
                rows.rows.insert(
                    id,
                    StoredRow {
                        updated_at: dto.updated_at(),
                        deleted_at: dto.deleted_at(),
                        dto: Some(dto),
                        first_stamp: stamp,
                        stamp,
                    },
                );
                summary.accepted += 1;
            }
        }
    }

    for Tombstone { id, deleted_at } in changes.deleted {
        let deleted_at = deleted_at.unwrap_or(now);
        match rows.rows.get_mut(&id) {
            Some(existing) if existing.deleted_at.is_some() => summary.ignored += 1,
            Some(existing) => {
                existing.deleted_at = Some(deleted_at);
                existing.updated_at = existing.updated_at.max(deleted_at);
                existing.stamp = stamper.next(now);
                summary.accepted += 1;
            }
            None => {
                let stamp = stamper.next(now);
                rows.rows.insert(
                    id,
                    StoredRow {
                        dto: None,
                        updated_at: deleted_at,
                        deleted_at: Some(deleted_at),
                        first_stamp: stamp,
                        stamp,
                    },
                );
                summary.accepted += 1;
            }
        }
    }
}

fn pull_entity<D: Clone>(rows: &EntityRows<D>, since: Option<Millis>) -> EntityChanges<D> {
    let mut changed: Vec<(&String, &StoredRow<D>)> = rows
        .rows
        .iter()
        .filter(|(_, row)| since.map_or(true, |since| row.stamp > since))
        .collect();
    changed.sort_by_key(|(_, row)| row.stamp);

    let mut changes = EntityChanges::default();
    for (id, row) in changed {
        if let Some(deleted_at) = row.deleted_at {
            changes.deleted.push(Tombstone {
                id: id.clone(),
                deleted_at: Some(deleted_at),
            });
            continue;
        }
        let Some(dto) = &row.dto else { continue };
        if since.map_or(true, |since| row.first_stamp > since) {
            changes.created.push(dto.clone());
        } else {
            changes.updated.push(dto.clone());
        }
    }
    changes
}

/// Shared in-memory backend.
pub struct Backend {
    accounts: Mutex<HashMap<String, Account>>,
    clock: Arc<dyn Clock>,
}

impl Backend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn accounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, Account>> {
        // Pushes validate before they mutate
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validates and applies a push atomically. Invalid pushes change nothing.
    pub fn push(&self, owner_id: &str, request: PushRequest) -> Result<PushSummary, BackendError> {
        let changes = request.changes;
        validate::<Customer>(&changes.customers, owner_id)?;
        validate::<MeasurementTemplate>(&changes.measurement_templates, owner_id)?;
        validate::<Measurement>(&changes.measurements, owner_id)?;
        validate::<Order>(&changes.orders, owner_id)?;
        validate::<Invoice>(&changes.invoices, owner_id)?;

        let now = self.clock.now();
        let mut summary = PushSummary::default();
        let mut accounts = self.accounts();
        let account = accounts.entry(owner_id.to_string()).or_default();
        let stamper = &mut account.stamper;

        push_entity::<Customer>(&mut account.customers, changes.customers, stamper, now, &mut summary);
        push_entity::<MeasurementTemplate>(
            &mut account.templates,
            changes.measurement_templates,
            stamper,
            now,
            &mut summary,
        );
        push_entity::<Measurement>(
            &mut account.measurements,
            changes.measurements,
            stamper,
            now,
            &mut summary,
        );
        push_entity::<Order>(&mut account.orders, changes.orders, stamper, now, &mut summary);
        push_entity::<Invoice>(&mut account.invoices, changes.invoices, stamper, now, &mut summary);

        tracing::debug!(
            owner = owner_id,
            accepted = summary.accepted,
            ignored = summary.ignored,
            "Applied push"
        );
        Ok(summary)
    }

    /// Every change stamped after `last_pulled_at`, or everything when `None`.
    pub fn pull(&self, owner_id: &str, last_pulled_at: Option<Millis>) -> PullResponse {
        let now = self.clock.now();
        let mut accounts = self.accounts();
        let account = accounts.entry(owner_id.to_string()).or_default();

        let changes = ChangeSet {
            customers: pull_entity(&account.customers, last_pulled_at),
            measurement_templates: pull_entity(&account.templates, last_pulled_at),
            measurements: pull_entity(&account.measurements, last_pulled_at),
            orders: pull_entity(&account.orders, last_pulled_at),
            invoices: pull_entity(&account.invoices, last_pulled_at),
        };

        PullResponse {
            changes,
            timestamp: account.stamper.watermark(now),
        }
    }

    /// Number of stored rows, tombstones included.
    pub fn row_count(&self, owner_id: &str) -> usize {
        self.accounts()
            .get(owner_id)
            .map(|a| {
                a.customers.rows.len()
                    + a.templates.rows.len()
                    + a.measurements.rows.len()
                    + a.orders.rows.len()
                    + a.invoices.rows.len()
            })
            .unwrap_or(0)
    }
}
