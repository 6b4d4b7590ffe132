//! Ordered, additive schema migrations keyed by `PRAGMA user_version`.
//!
//! Every step can run against a database where it was already applied:
//! tables and indexes use `IF NOT EXISTS`, and column additions are skipped
//! when `pragma_table_info` already lists the column.

use sqlx::{SqliteConnection, SqlitePool};

use super::error::StoreError;

/// Highest schema version known to this build. Sent to the server on pull.
pub const SCHEMA_VERSION: i64 = 4;

enum Step {
    Sql(&'static str),
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
}

struct Migration {
    version: i64,
    description: &'static str,
    steps: &'static [Step],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "customers, measurements and orders",
        steps: &[
            Step::Sql(
                r#"
                CREATE TABLE IF NOT EXISTS customers (
                    id TEXT PRIMARY KEY NOT NULL,
                    owner_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    sync_status TEXT NOT NULL DEFAULT 'dirty',
                    full_name TEXT NOT NULL,
                    phone_number TEXT,
                    gender TEXT,
                    notes TEXT
                )
                "#,
            ),
            Step::Sql(
                r#"
                CREATE TABLE IF NOT EXISTS measurements (
                    id TEXT PRIMARY KEY NOT NULL,
                    owner_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    sync_status TEXT NOT NULL DEFAULT 'dirty',
                    customer_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    measurement_values TEXT NOT NULL DEFAULT '{}',
                    unit TEXT NOT NULL DEFAULT 'in',
                    notes TEXT
                )
                "#,
            ),
            Step::Sql(
                r#"
                CREATE TABLE IF NOT EXISTS orders (
                    id TEXT PRIMARY KEY NOT NULL,
                    owner_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    sync_status TEXT NOT NULL DEFAULT 'dirty',
                    customer_id TEXT NOT NULL,
                    style TEXT NOT NULL,
                    description TEXT,
                    amount REAL NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'pending',
                    due_date INTEGER,
                    notes TEXT
                )
                "#,
            ),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_customers_owner ON customers(owner_id)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_customers_sync ON customers(sync_status)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_measurements_owner ON measurements(owner_id)"),
            Step::Sql(
                "CREATE INDEX IF NOT EXISTS idx_measurements_customer ON measurements(customer_id)",
            ),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_measurements_sync ON measurements(sync_status)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_orders_owner ON orders(owner_id)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_orders_sync ON orders(sync_status)"),
        ],
    },
    Migration {
        version: 2,
        description: "measurement templates and invoices",
        steps: &[
            Step::Sql(
                r#"
                CREATE TABLE IF NOT EXISTS measurement_templates (
                    id TEXT PRIMARY KEY NOT NULL,
                    owner_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    sync_status TEXT NOT NULL DEFAULT 'dirty',
                    name TEXT NOT NULL,
                    fields TEXT NOT NULL DEFAULT '[]',
                    gender TEXT
                )
                "#,
            ),
            Step::Sql(
                r#"
                CREATE TABLE IF NOT EXISTS invoices (
                    id TEXT PRIMARY KEY NOT NULL,
                    owner_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    deleted_at INTEGER,
                    sync_status TEXT NOT NULL DEFAULT 'dirty',
                    customer_id TEXT NOT NULL,
                    order_id TEXT NOT NULL,
                    invoice_number TEXT NOT NULL,
                    amount REAL NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'unpaid',
                    due_date INTEGER,
                    notes TEXT
                )
                "#,
            ),
            Step::Sql(
                "CREATE INDEX IF NOT EXISTS idx_templates_owner ON measurement_templates(owner_id)",
            ),
            Step::Sql(
                "CREATE INDEX IF NOT EXISTS idx_templates_sync ON measurement_templates(sync_status)",
            ),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_invoices_owner ON invoices(owner_id)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices(customer_id)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_invoices_order ON invoices(order_id)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_invoices_sync ON invoices(sync_status)"),
        ],
    },
    Migration {
        version: 3,
        description: "sync state",
        steps: &[Step::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )],
    },
    Migration {
        version: 4,
        description: "customer email and order payments",
        steps: &[
            Step::AddColumn {
                table: "customers",
                column: "email",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "orders",
                column: "amount_paid",
                definition: "REAL NOT NULL DEFAULT 0",
            },
        ],
    },
];

/// Reads the schema version recorded in the database header.
pub async fn current_version(pool: &SqlitePool) -> Result<i64, StoreError> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Applies every migration newer than the recorded schema version.
///
/// Returns the schema version after migrating.
pub async fn run(pool: &SqlitePool) -> Result<i64, StoreError> {
    let mut version = current_version(pool).await?;

    for migration in MIGRATIONS.iter().filter(move |m| m.version > version) {
        apply(pool, migration)
            .await
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                source,
            })?;
        tracing::info!(
            version = migration.version,
            "Applied migration: {}",
            migration.description
        );
        version = migration.version;
    }

    Ok(version)
}

async fn apply(pool: &SqlitePool, migration: &Migration) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for step in migration.steps {
        match step {
            Step::Sql(sql) => {
                sqlx::query(sql).execute(&mut *tx).await?;
            }
            Step::AddColumn {
                table,
                column,
                definition,
            } => {
                if column_exists(&mut *tx, table, column).await? {
                    tracing::debug!(table, column, "Column already present, skipping");
                    continue;
                }
                let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
                sqlx::query(&sql).execute(&mut *tx).await?;
            }
        }
    }

    // PRAGMA does not accept bound parameters
    let sql = format!("PRAGMA user_version = {}", migration.version);
    sqlx::query(&sql).execute(&mut *tx).await?;

    tx.commit().await
}

async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;
    Ok(columns.iter().any(|c| c == column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    async fn table_columns(pool: &SqlitePool, table: &str) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_reach_latest_version() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();

        assert_eq!(current_version(&pool).await.unwrap(), SCHEMA_VERSION);
        assert!(table_columns(&pool, "customers")
            .await
            .contains(&"email".to_string()));
        assert!(table_columns(&pool, "orders")
            .await
            .contains(&"amount_paid".to_string()));
    }

    #[tokio::test]
    async fn test_rerun_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();

        assert_eq!(run(&pool).await.unwrap(), SCHEMA_VERSION);
        assert_eq!(run(&pool).await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_partially_applied_migration_reruns_cleanly() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();

        // Columns from v4 exist but the version was never recorded
        sqlx::query("PRAGMA user_version = 3")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(run(&pool).await.unwrap(), SCHEMA_VERSION);
        let email_columns = table_columns(&pool, "customers")
            .await
            .into_iter()
            .filter(|c| c == "email")
            .count();
        assert_eq!(email_columns, 1);
    }

    #[tokio::test]
    async fn test_rerun_from_scratch_over_existing_tables() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();

        sqlx::query("PRAGMA user_version = 0")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(run(&pool).await.unwrap(), SCHEMA_VERSION);
    }
}
