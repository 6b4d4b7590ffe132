use thiserror::Error;
use uuid::Uuid;

use super::record::Table;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{table} record not found: {id}")]
    NotFound { table: Table, id: Uuid },

    #[error("{table} record already exists: {id}")]
    ConstraintViolation { table: Table, id: Uuid },

    #[error("Migration to schema version {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(table: Table, id: Uuid) -> Self {
        StoreError::NotFound { table, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
