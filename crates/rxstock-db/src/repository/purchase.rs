//! # Purchase Repository
//!
//! Purchase invoices (goods receipts) and their lines.
//!
//! ## Invoice Axes
//! ```text
//! status            OPEN ──complete──► COMPLETE
//! payment_status    UNPAID ──► PARTIAL ──► PAID      (derived from payments)
//! tax_status        PENDING ──reconcile──► RECONCILED
//! lifecycle_status  OPEN ──close──► CLOSED ──reopen──► OPEN
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use crate::error::{DbError, DbResult};
use rxstock_core::{
    InvoiceStatus, LifecycleStatus, PaymentStatus, PurchaseInvoice, PurchaseInvoiceItem, TaxStatus,
};

const INVOICE_COLUMNS: &str = "id, grn, invoice_no, vendor_id, invoice_date, status, \
     payment_status, tax_status, lifecycle_status, total_cents, paid_cents, tax_credit_cents, \
     closed_at, closed_by, closure_notes, created_by, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, invoice_id, product_id, batch_number, expiry_date, mfr_date, \
     pack_size, qty, free_qty, ptr_cents, mrp_cents, tax_rate_bps, taxable_cents, tax_cents, \
     total_cents, status, verified_by, verified_at, created_at";

/// Item counts by verification status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ItemCounts {
    pub total: i64,
    pub verified: i64,
    pub pending: i64,
    pub rejected: i64,
}

/// Persistence for purchase invoices. All functions run on the caller's connection.
pub struct PurchaseStore;

impl PurchaseStore {
    pub async fn insert_invoice(conn: &mut SqliteConnection, invoice: &PurchaseInvoice) -> DbResult<()> {
        debug!(id = %invoice.id, grn = invoice.grn, "Inserting purchase invoice");

        sqlx::query(
            r#"
            INSERT INTO purchase_invoices (
                id, grn, invoice_no, vendor_id, invoice_date, status,
                payment_status, tax_status, lifecycle_status, total_cents, paid_cents,
                tax_credit_cents, closed_at, closed_by, closure_notes,
                created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
        )
        .bind(&invoice.id)
        .bind(invoice.grn)
        .bind(&invoice.invoice_no)
        .bind(&invoice.vendor_id)
        .bind(invoice.invoice_date)
        .bind(invoice.status)
        .bind(invoice.payment_status)
        .bind(invoice.tax_status)
        .bind(invoice.lifecycle_status)
        .bind(invoice.total_cents)
        .bind(invoice.paid_cents)
        .bind(invoice.tax_credit_cents)
        .bind(invoice.closed_at)
        .bind(&invoice.closed_by)
        .bind(&invoice.closure_notes)
        .bind(&invoice.created_by)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn find_invoice(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<PurchaseInvoice>> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM purchase_invoices WHERE id = ?1");
        let invoice = sqlx::query_as::<_, PurchaseInvoice>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(invoice)
    }

    pub async fn get_invoice(conn: &mut SqliteConnection, id: &str) -> DbResult<PurchaseInvoice> {
        Self::find_invoice(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("PurchaseInvoice", id))
    }

    pub async fn insert_item(conn: &mut SqliteConnection, item: &PurchaseInvoiceItem) -> DbResult<()> {
        debug!(
            id = %item.id,
            invoice_id = %item.invoice_id,
            batch_number = %item.batch_number,
            "Inserting purchase item"
        );

        sqlx::query(
            r#"
            INSERT INTO purchase_invoice_items (
                id, invoice_id, product_id, batch_number, expiry_date, mfr_date,
                pack_size, qty, free_qty, ptr_cents, mrp_cents, tax_rate_bps,
                taxable_cents, tax_cents, total_cents, status, verified_by, verified_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
        )
        .bind(&item.id)
        .bind(&item.invoice_id)
        .bind(&item.product_id)
        .bind(&item.batch_number)
        .bind(item.expiry_date)
        .bind(item.mfr_date)
        .bind(item.pack_size)
        .bind(item.qty)
        .bind(item.free_qty)
        .bind(item.ptr_cents)
        .bind(item.mrp_cents)
        .bind(item.tax_rate_bps)
        .bind(item.taxable_cents)
        .bind(item.tax_cents)
        .bind(item.total_cents)
        .bind(item.status)
        .bind(&item.verified_by)
        .bind(item.verified_at)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get_item(conn: &mut SqliteConnection, id: &str) -> DbResult<PurchaseInvoiceItem> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM purchase_invoice_items WHERE id = ?1");
        sqlx::query_as::<_, PurchaseInvoiceItem>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("PurchaseInvoiceItem", id))
    }

    /// Lines of an invoice in insertion order.
    pub async fn items_for_invoice(
        conn: &mut SqliteConnection,
        invoice_id: &str,
    ) -> DbResult<Vec<PurchaseInvoiceItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM purchase_invoice_items WHERE invoice_id = ?1 ORDER BY rowid ASC"
        );
        let items = sqlx::query_as::<_, PurchaseInvoiceItem>(&sql)
            .bind(invoice_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(items)
    }

    /// Flips a NEW item to VERIFIED.
    ///
    /// ## Errors
    /// `Conflict` if the item was no longer NEW.
    pub async fn mark_verified(
        conn: &mut SqliteConnection,
        item_id: &str,
        verified_by: &str,
        verified_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_invoice_items
            SET status = 'VERIFIED', verified_by = ?1, verified_at = ?2
            WHERE id = ?3 AND status = 'NEW'
            "#,
        )
        .bind(verified_by)
        .bind(verified_at)
        .bind(item_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(DbError::Conflict(format!(
                "purchase item {item_id} changed status during verification"
            )));
        }
        Ok(())
    }

    /// Flips a NEW item to REJECTED.
    pub async fn mark_rejected(conn: &mut SqliteConnection, item_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE purchase_invoice_items SET status = 'REJECTED' WHERE id = ?1 AND status = 'NEW'",
        )
        .bind(item_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(DbError::Conflict(format!(
                "purchase item {item_id} is no longer NEW"
            )));
        }
        Ok(())
    }

    pub async fn item_counts(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<ItemCounts> {
        let counts = sqlx::query_as::<_, ItemCounts>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'VERIFIED' THEN 1 ELSE 0 END), 0) AS verified,
                COALESCE(SUM(CASE WHEN status = 'NEW' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'REJECTED' THEN 1 ELSE 0 END), 0) AS rejected
            FROM purchase_invoice_items
            WHERE invoice_id = ?1
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(counts)
    }

    /// Recomputes the invoice total from its non-rejected lines.
    pub async fn refresh_total(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total_cents), 0) FROM purchase_invoice_items
            WHERE invoice_id = ?1 AND status <> 'REJECTED'
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&mut *conn)
        .await?;

        Self::touch(
            conn,
            invoice_id,
            "UPDATE purchase_invoices SET total_cents = ?1, updated_at = ?2 WHERE id = ?3",
            total,
        )
        .await?;
        Ok(total)
    }

    /// Sum of tax over VERIFIED lines, the input credit the invoice earns.
    pub async fn verified_tax(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<i64> {
        let tax: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(tax_cents), 0) FROM purchase_invoice_items
            WHERE invoice_id = ?1 AND status = 'VERIFIED'
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(tax)
    }

    pub async fn mark_complete(conn: &mut SqliteConnection, invoice_id: &str, tax_credit_cents: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_invoices
            SET status = ?1, tax_credit_cents = ?2, updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(InvoiceStatus::Complete)
        .bind(tax_credit_cents)
        .bind(Utc::now())
        .bind(invoice_id)
        .execute(&mut *conn)
        .await?;
        expect_one(result.rows_affected(), invoice_id)
    }

    pub async fn set_payment(
        conn: &mut SqliteConnection,
        invoice_id: &str,
        paid_cents: i64,
        payment_status: PaymentStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_invoices
            SET paid_cents = ?1, payment_status = ?2, updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(paid_cents)
        .bind(payment_status)
        .bind(Utc::now())
        .bind(invoice_id)
        .execute(&mut *conn)
        .await?;
        expect_one(result.rows_affected(), invoice_id)
    }

    pub async fn set_tax_status(conn: &mut SqliteConnection, invoice_id: &str, status: TaxStatus) -> DbResult<()> {
        let result = sqlx::query("UPDATE purchase_invoices SET tax_status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status)
            .bind(Utc::now())
            .bind(invoice_id)
            .execute(&mut *conn)
            .await?;
        expect_one(result.rows_affected(), invoice_id)
    }

    pub async fn mark_closed(
        conn: &mut SqliteConnection,
        invoice_id: &str,
        closed_by: &str,
        notes: Option<&str>,
    ) -> DbResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE purchase_invoices
            SET lifecycle_status = ?1, closed_at = ?2, closed_by = ?3, closure_notes = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(LifecycleStatus::Closed)
        .bind(now)
        .bind(closed_by)
        .bind(notes)
        .bind(now)
        .bind(invoice_id)
        .execute(&mut *conn)
        .await?;
        expect_one(result.rows_affected(), invoice_id)
    }

    /// Reopens a closed invoice. The closure fields are cleared.
    pub async fn mark_reopened(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_invoices
            SET lifecycle_status = ?1, closed_at = NULL, closed_by = NULL, closure_notes = NULL, updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(LifecycleStatus::Open)
        .bind(Utc::now())
        .bind(invoice_id)
        .execute(&mut *conn)
        .await?;
        expect_one(result.rows_affected(), invoice_id)
    }

    async fn touch(conn: &mut SqliteConnection, invoice_id: &str, sql: &str, value: i64) -> DbResult<()> {
        let result = sqlx::query(sql)
            .bind(value)
            .bind(Utc::now())
            .bind(invoice_id)
            .execute(&mut *conn)
            .await?;
        expect_one(result.rows_affected(), invoice_id)
    }
}

fn expect_one(rows: u64, invoice_id: &str) -> DbResult<()> {
    if rows == 0 {
        return Err(DbError::not_found("PurchaseInvoice", invoice_id));
    }
    Ok(())
}
