//! # Vendor Payment Repository
//!
//! Payments made against purchase invoices. The invoice's `paid_cents` is
//! always the sum of these rows.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use rxstock_core::VendorPayment;

const PAYMENT_COLUMNS: &str =
    "id, invoice_id, amount_cents, method, reference, paid_on, created_by, created_at";

pub struct PaymentStore;

impl PaymentStore {
    pub async fn insert(conn: &mut SqliteConnection, payment: &VendorPayment) -> DbResult<()> {
        debug!(
            id = %payment.id,
            invoice_id = %payment.invoice_id,
            amount_cents = payment.amount_cents,
            "Inserting vendor payment"
        );

        sqlx::query(
            r#"
            INSERT INTO vendor_payments (
                id, invoice_id, amount_cents, method, reference, paid_on, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.invoice_id)
        .bind(payment.amount_cents)
        .bind(&payment.method)
        .bind(&payment.reference)
        .bind(payment.paid_on)
        .bind(&payment.created_by)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Payments of an invoice, oldest first.
    pub async fn for_invoice(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<Vec<VendorPayment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM vendor_payments WHERE invoice_id = ?1 ORDER BY paid_on ASC, rowid ASC"
        );
        let payments = sqlx::query_as::<_, VendorPayment>(&sql)
            .bind(invoice_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(payments)
    }

    pub async fn total_paid(conn: &mut SqliteConnection, invoice_id: &str) -> DbResult<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(amount_cents), 0) FROM vendor_payments WHERE invoice_id = ?1")
                .bind(invoice_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(total)
    }
}
