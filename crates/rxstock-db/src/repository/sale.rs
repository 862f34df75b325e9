//! # Sale Repository
//!
//! Sale headers, sale lines and return lines.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE (one transaction, all or nothing)                           │
//! │     └── insert_sale()  → Sale { status: COMPLETED }                    │
//! │     └── insert_item()  → SaleItem { quantity > 0, snapshot }           │
//! │                                                                         │
//! │  2. RETURN (one transaction per return line)                           │
//! │     └── insert_item()  → SaleItem { quantity < 0, return_of_item_id }  │
//! │     └── update_status() → PARTIALLY_RETURNED / RETURNED                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use crate::error::{DbError, DbResult};
use rxstock_core::{Sale, SaleItem, SaleStatus};

const SALE_COLUMNS: &str = "id, bill_no, order_no, bill_date, customer_id, subtotal_cents, \
     tax_cents, total_cents, status, created_by, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, sale_id, product_id, quantity, unit_price_cents, tax_cents, \
     line_total_cents, batch_allocations, batch_number, expiry_date, return_of_item_id, \
     return_reason, created_by, created_at";

/// A sale that consumed units of a given batch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchSale {
    pub sale_id: String,
    pub bill_no: i64,
    pub bill_date: NaiveDate,
    pub customer_id: Option<String>,
    pub quantity: i64,
    pub performed_at: DateTime<Utc>,
}

/// Persistence for sales. All functions run on the caller's connection.
pub struct SaleStore;

impl SaleStore {
    pub async fn insert_sale(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, bill_no = sale.bill_no, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, bill_no, order_no, bill_date, customer_id,
                subtotal_cents, tax_cents, total_cents, status,
                created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&sale.id)
        .bind(sale.bill_no)
        .bind(sale.order_no)
        .bind(sale.bill_date)
        .bind(&sale.customer_id)
        .bind(sale.subtotal_cents)
        .bind(sale.tax_cents)
        .bind(sale.total_cents)
        .bind(sale.status)
        .bind(&sale.created_by)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts a sale line or a return line.
    pub async fn insert_item(conn: &mut SqliteConnection, item: &SaleItem) -> DbResult<()> {
        debug!(
            id = %item.id,
            sale_id = %item.sale_id,
            quantity = item.quantity,
            "Inserting sale item"
        );

        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id, quantity, unit_price_cents, tax_cents,
                line_total_cents, batch_allocations, batch_number, expiry_date,
                return_of_item_id, return_reason, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.tax_cents)
        .bind(item.line_total_cents)
        .bind(&item.batch_allocations)
        .bind(&item.batch_number)
        .bind(item.expiry_date)
        .bind(&item.return_of_item_id)
        .bind(&item.return_reason)
        .bind(&item.created_by)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn find_sale(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(sale)
    }

    pub async fn get_sale(conn: &mut SqliteConnection, id: &str) -> DbResult<Sale> {
        Self::find_sale(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", id))
    }

    pub async fn find_by_bill_no(conn: &mut SqliteConnection, bill_no: i64) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE bill_no = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(bill_no)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(sale)
    }

    pub async fn get_item(conn: &mut SqliteConnection, id: &str) -> DbResult<SaleItem> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM sale_items WHERE id = ?1");
        sqlx::query_as::<_, SaleItem>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("SaleItem", id))
    }

    /// All lines of a sale, return lines included, in insertion order.
    pub async fn items_for_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY rowid ASC");
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(items)
    }

    /// Units already returned against a sale line (a positive number).
    pub async fn returned_quantity(conn: &mut SqliteConnection, sale_item_id: &str) -> DbResult<i64> {
        let returned: i64 = sqlx::query_scalar(
            "SELECT COALESCE(-SUM(quantity), 0) FROM sale_items WHERE return_of_item_id = ?1",
        )
        .bind(sale_item_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(returned)
    }

    /// Earlier return lines written against a sale line, oldest first.
    pub async fn returns_of_item(conn: &mut SqliteConnection, sale_item_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM sale_items WHERE return_of_item_id = ?1 ORDER BY rowid ASC");
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_item_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(items)
    }

    /// Units sold and returned over the whole sale: `(sold, returned)`.
    pub async fn quantity_totals(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<(i64, i64)> {
        let (sold, returned): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN quantity > 0 THEN quantity ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN quantity < 0 THEN -quantity ELSE 0 END), 0)
            FROM sale_items
            WHERE sale_id = ?1
            "#,
        )
        .bind(sale_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok((sold, returned))
    }

    pub async fn update_status(conn: &mut SqliteConnection, sale_id: &str, status: SaleStatus) -> DbResult<()> {
        let result = sqlx::query("UPDATE sales SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status)
            .bind(Utc::now())
            .bind(sale_id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", sale_id));
        }
        Ok(())
    }

    /// Sales whose SOLD movements drew on a batch, newest first.
    pub async fn sales_for_batch(conn: &mut SqliteConnection, batch_id: &str) -> DbResult<Vec<BatchSale>> {
        let rows = sqlx::query_as::<_, BatchSale>(
            r#"
            SELECT
                s.id AS sale_id,
                s.bill_no,
                s.bill_date,
                s.customer_id,
                m.quantity,
                m.performed_at
            FROM batch_movements m
            INNER JOIN sales s ON s.id = m.reference_id
            WHERE m.batch_id = ?1
              AND m.movement_type = 'SOLD'
              AND m.reference_type = 'SALE'
            ORDER BY m.performed_at DESC, m.rowid DESC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }
}
