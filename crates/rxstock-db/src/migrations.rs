//! # Database Migrations
//!
//! Embedded SQL migrations for rxstock.
//!
//! ```text
//! migrations/sqlite/
//! ├── 001_initial_schema.sql  products, batches, batch_movements, sequences
//! ├── 002_sales.sql           sales, sale_items
//! └── 003_purchasing.sql      purchase_invoices, items, vendor_payments, pricing_rules
//! ```
//!
//! Applied migrations are tracked in `_sqlx_migrations`. Never edit an
//! applied file; add the next `NNN_description.sql` instead.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations in filename order.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(embedded, applied)` migration counts.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;

    Ok((total, applied as usize))
}
