//! Table mapping for synchronizable records.

use std::collections::BTreeMap;
use std::fmt;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};
use uuid::Uuid;

use crate::models::{
    Customer, Invoice, Measurement, MeasurementTemplate, Order, SyncMeta, SyncStatus,
};

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Synchronizable tables, in push/apply order (parents before children).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Customers,
    MeasurementTemplates,
    Measurements,
    Orders,
    Invoices,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Customers,
        Table::MeasurementTemplates,
        Table::Measurements,
        Table::Orders,
        Table::Invoices,
    ];

    /// SQL table name, also used as the entity key on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Customers => "customers",
            Table::MeasurementTemplates => "measurement_templates",
            Table::Measurements => "measurements",
            Table::Orders => "orders",
            Table::Invoices => "invoices",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Table::ALL.into_iter().find(|t| t.name() == s)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Sync metadata columns shared by every table, in bind order.
pub const META_COLUMNS: [&str; 6] = [
    "id",
    "owner_id",
    "created_at",
    "updated_at",
    "deleted_at",
    "sync_status",
];

/// A row type stored in one of the synchronizable tables.
pub trait Record: fmt::Debug + Clone + PartialEq + Send + Sync + Unpin + 'static {
    const TABLE: Table;

    /// Domain columns, in the order `bind_columns` binds them.
    const COLUMNS: &'static [&'static str];

    fn meta(&self) -> &SyncMeta;

    fn meta_mut(&mut self) -> &mut SyncMeta;

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error>;

    fn id(&self) -> Uuid {
        self.meta().id
    }
}

fn decode_error(message: impl Into<String>) -> sqlx::Error {
    let message: String = message.into();
    sqlx::Error::Decode(message.into())
}

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| decode_error(format!("{}: {}", column, e)))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| decode_error(format!("{}: {}", column, e)))
}

fn parsed_column<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(decode_error)
}

/// Decodes the shared sync metadata columns.
pub fn meta_from_row(row: &SqliteRow) -> Result<SyncMeta, sqlx::Error> {
    Ok(SyncMeta {
        id: uuid_column(row, "id")?,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
        sync_status: parsed_column::<SyncStatus>(row, "sync_status")?,
    })
}

/// Binds the shared metadata columns, except `id`, in `META_COLUMNS` order.
pub fn bind_meta_without_id<'q>(meta: &'q SyncMeta, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
    query
        .bind(&meta.owner_id)
        .bind(meta.created_at)
        .bind(meta.updated_at)
        .bind(meta.deleted_at)
        .bind(meta.sync_status.to_string())
}

impl Record for Customer {
    const TABLE: Table = Table::Customers;
    const COLUMNS: &'static [&'static str] =
        &["full_name", "phone_number", "gender", "email", "notes"];

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(&self.full_name)
            .bind(&self.phone_number)
            .bind(&self.gender)
            .bind(&self.email)
            .bind(&self.notes)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Customer {
            meta: meta_from_row(row)?,
            full_name: row.try_get("full_name")?,
            phone_number: row.try_get("phone_number")?,
            gender: row.try_get("gender")?,
            email: row.try_get("email")?,
            notes: row.try_get("notes")?,
        })
    }
}

impl Record for Measurement {
    const TABLE: Table = Table::Measurements;
    const COLUMNS: &'static [&'static str] =
        &["customer_id", "name", "measurement_values", "unit", "notes"];

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        let values = serde_json::to_string(&self.values).unwrap_or_else(|_| "{}".to_string());
        query
            .bind(self.customer_id.to_string())
            .bind(&self.name)
            .bind(values)
            .bind(&self.unit)
            .bind(&self.notes)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Measurement {
            meta: meta_from_row(row)?,
            customer_id: uuid_column(row, "customer_id")?,
            name: row.try_get("name")?,
            values: json_column::<BTreeMap<String, f64>>(row, "measurement_values")?,
            unit: row.try_get("unit")?,
            notes: row.try_get("notes")?,
        })
    }
}

impl Record for MeasurementTemplate {
    const TABLE: Table = Table::MeasurementTemplates;
    const COLUMNS: &'static [&'static str] = &["name", "fields", "gender"];

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        let fields = serde_json::to_string(&self.fields).unwrap_or_else(|_| "[]".to_string());
        query.bind(&self.name).bind(fields).bind(&self.gender)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(MeasurementTemplate {
            meta: meta_from_row(row)?,
            name: row.try_get("name")?,
            fields: json_column(row, "fields")?,
            gender: row.try_get("gender")?,
        })
    }
}

impl Record for Order {
    const TABLE: Table = Table::Orders;
    const COLUMNS: &'static [&'static str] = &[
        "customer_id",
        "style",
        "description",
        "amount",
        "amount_paid",
        "status",
        "due_date",
        "notes",
    ];

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.customer_id.to_string())
            .bind(&self.style)
            .bind(&self.description)
            .bind(self.amount)
            .bind(self.amount_paid)
            .bind(self.status.to_string())
            .bind(self.due_date)
            .bind(&self.notes)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Order {
            meta: meta_from_row(row)?,
            customer_id: uuid_column(row, "customer_id")?,
            style: row.try_get("style")?,
            description: row.try_get("description")?,
            amount: row.try_get("amount")?,
            amount_paid: row.try_get("amount_paid")?,
            status: parsed_column(row, "status")?,
            due_date: row.try_get("due_date")?,
            notes: row.try_get("notes")?,
        })
    }
}

impl Record for Invoice {
    const TABLE: Table = Table::Invoices;
    const COLUMNS: &'static [&'static str] = &[
        "customer_id",
        "order_id",
        "invoice_number",
        "amount",
        "status",
        "due_date",
        "notes",
    ];

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.customer_id.to_string())
            .bind(self.order_id.to_string())
            .bind(&self.invoice_number)
            .bind(self.amount)
            .bind(self.status.to_string())
            .bind(self.due_date)
            .bind(&self.notes)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Invoice {
            meta: meta_from_row(row)?,
            customer_id: uuid_column(row, "customer_id")?,
            order_id: uuid_column(row, "order_id")?,
            invoice_number: row.try_get("invoice_number")?,
            amount: row.try_get("amount")?,
            status: parsed_column(row, "status")?,
            due_date: row.try_get("due_date")?,
            notes: row.try_get("notes")?,
        })
    }
}
