//! # Invoice Desk
//!
//! Purchase invoice lifecycle and the vendor payment ledger.
//!
//! ```text
//! create_invoice ──► OPEN/UNPAID/PENDING/OPEN   (GRN drawn, totals computed)
//!      │
//!      ├── add_item / reject_item          while OPEN on both axes
//!      ├── complete_invoice                every line VERIFIED or REJECTED
//!      ├── record_payment                  Σ payments <= total
//!      ├── reconcile_tax                   only once COMPLETE
//!      └── close_invoice ◄──► reopen_invoice
//!            needs COMPLETE + PAID + RECONCILED
//! ```
//!
//! Every mutation is its own `BEGIN IMMEDIATE` transaction, so the invoice
//! row read at the start is the one the update is checked against.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use rxstock_core::invoice::{
    check_payment, check_total_covers_payments, closure_check, derive_payment_status, line_amounts, ClosureCheck,
};
use rxstock_core::validation::{validate_batch_number, validate_payment_amount, validate_purchase_quantities};
use rxstock_core::{
    CoreError, InvoiceStatus, ItemStatus, LifecycleStatus, Money, PaymentStatus, PurchaseInvoice,
    PurchaseInvoiceItem, TaxRate, TaxStatus, ValidationError, VendorPayment,
};
use rxstock_db::repository::product;
use rxstock_db::sequence::GRN;
use rxstock_db::{Database, ItemCounts, PaymentStore, PurchaseStore, SequenceGenerator};

use crate::error::CommerceResult;

// =============================================================================
// Inputs
// =============================================================================

/// Header of a vendor invoice being received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub invoice_no: String,
    pub vendor_id: String,
    pub invoice_date: NaiveDate,
}

/// One line of a vendor invoice.
///
/// `pack_size` and `tax_rate_bps` fall back to the product's values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoiceItem {
    pub product_id: String,
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub mfr_date: Option<NaiveDate>,
    pub qty: i64,
    pub free_qty: i64,
    pub pack_size: Option<i64>,
    pub ptr_cents: i64,
    pub mrp_cents: i64,
    pub tax_rate_bps: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub amount_cents: i64,
    pub method: String,
    pub reference: Option<String>,
    /// Defaults to today.
    pub paid_on: Option<NaiveDate>,
}

// =============================================================================
// Outputs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    pub invoice: PurchaseInvoice,
    pub items: Vec<PurchaseInvoiceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedPayment {
    pub payment: VendorPayment,
    pub invoice: PurchaseInvoice,
}

/// Where an invoice stands on every axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSummary {
    pub invoice_id: String,
    pub grn: i64,
    pub status: InvoiceStatus,
    pub payment_status: PaymentStatus,
    pub tax_status: TaxStatus,
    pub lifecycle_status: LifecycleStatus,
    pub items: ItemCounts,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub balance_cents: i64,
    pub tax_credit_cents: i64,
    pub payments: usize,
    pub closure: ClosureCheck,
}

// =============================================================================
// Invoice Desk
// =============================================================================

pub struct InvoiceDesk {
    db: Database,
}

impl InvoiceDesk {
    pub fn new(db: Database) -> Self {
        InvoiceDesk { db }
    }

    /// Records a vendor invoice with its lines and assigns the next GRN.
    pub async fn create_invoice(
        &self,
        new: NewInvoice,
        items: Vec<NewInvoiceItem>,
        actor: &str,
    ) -> CommerceResult<InvoiceDetail> {
        require("invoice_no", &new.invoice_no)?;
        require("vendor_id", &new.vendor_id)?;
        require("actor", actor)?;

        let mut tx = self.db.begin_serializable().await?;

        let grn = SequenceGenerator::next(&mut tx, GRN).await?;
        let now = Utc::now();
        let mut invoice = PurchaseInvoice {
            id: Uuid::new_v4().to_string(),
            grn,
            invoice_no: new.invoice_no.trim().to_string(),
            vendor_id: new.vendor_id.trim().to_string(),
            invoice_date: new.invoice_date,
            status: InvoiceStatus::Open,
            payment_status: PaymentStatus::Unpaid,
            tax_status: TaxStatus::Pending,
            lifecycle_status: LifecycleStatus::Open,
            total_cents: 0,
            paid_cents: 0,
            tax_credit_cents: 0,
            closed_at: None,
            closed_by: None,
            closure_notes: None,
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };
        PurchaseStore::insert_invoice(&mut tx, &invoice).await?;

        let mut created = Vec::with_capacity(items.len());
        for item in items {
            created.push(insert_line(&mut tx, &invoice.id, item).await?);
        }
        invoice.total_cents = PurchaseStore::refresh_total(&mut tx, &invoice.id).await?;

        tx.commit().await?;

        info!(
            invoice_id = %invoice.id,
            grn,
            vendor_id = %invoice.vendor_id,
            items = created.len(),
            total_cents = invoice.total_cents,
            "Purchase invoice created"
        );
        Ok(InvoiceDetail {
            invoice,
            items: created,
        })
    }

    /// Adds a line to an invoice that is still open.
    pub async fn add_item(&self, invoice_id: &str, item: NewInvoiceItem) -> CommerceResult<PurchaseInvoiceItem> {
        let mut tx = self.db.begin_serializable().await?;

        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;
        ensure_editable(&invoice, "add item")?;

        let created = insert_line(&mut tx, invoice_id, item).await?;
        let total = PurchaseStore::refresh_total(&mut tx, invoice_id).await?;
        resync_payment_status(&mut tx, &invoice, total).await?;

        tx.commit().await?;

        debug!(invoice_id = %invoice_id, item_id = %created.id, total_cents = total, "Invoice item added");
        Ok(created)
    }

    /// Rejects a NEW line. Rejected lines carry no stock and no cost.
    pub async fn reject_item(&self, item_id: &str, actor: &str) -> CommerceResult<PurchaseInvoiceItem> {
        let mut tx = self.db.begin_serializable().await?;

        let mut item = PurchaseStore::get_item(&mut tx, item_id).await?;
        let invoice = PurchaseStore::get_invoice(&mut tx, &item.invoice_id).await?;
        ensure_editable(&invoice, "reject item")?;

        match item.status {
            ItemStatus::New => {}
            ItemStatus::Verified => {
                return Err(CoreError::AlreadyVerified {
                    item_id: item_id.to_string(),
                }
                .into())
            }
            ItemStatus::Rejected => {
                return Err(CoreError::InvalidItemStatus {
                    item_id: item_id.to_string(),
                    status: item.status.as_str().to_string(),
                }
                .into())
            }
        }

        PurchaseStore::mark_rejected(&mut tx, item_id).await?;
        let total = PurchaseStore::refresh_total(&mut tx, &invoice.id).await?;
        resync_payment_status(&mut tx, &invoice, total).await?;

        tx.commit().await?;

        item.status = ItemStatus::Rejected;
        info!(item_id = %item_id, invoice_id = %invoice.id, actor = %actor, total_cents = total, "Invoice item rejected");
        Ok(item)
    }

    /// Marks an invoice COMPLETE once no line awaits verification.
    ///
    /// The tax of the verified lines becomes the invoice's tax credit.
    pub async fn complete_invoice(&self, invoice_id: &str, actor: &str) -> CommerceResult<PurchaseInvoice> {
        let mut tx = self.db.begin_serializable().await?;

        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;
        ensure_editable(&invoice, "complete")?;

        let counts = PurchaseStore::item_counts(&mut tx, invoice_id).await?;
        if counts.pending > 0 {
            return Err(CoreError::InvoiceNotReady {
                invoice_id: invoice_id.to_string(),
                unverified: counts.pending,
            }
            .into());
        }
        if counts.verified == 0 {
            return Err(CoreError::from(ValidationError::Required {
                field: "verified items".to_string(),
            })
            .into());
        }

        let tax_credit = PurchaseStore::verified_tax(&mut tx, invoice_id).await?;
        PurchaseStore::refresh_total(&mut tx, invoice_id).await?;
        PurchaseStore::mark_complete(&mut tx, invoice_id, tax_credit).await?;
        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;

        tx.commit().await?;

        info!(
            invoice_id = %invoice_id,
            grn = invoice.grn,
            actor = %actor,
            verified = counts.verified,
            tax_credit_cents = tax_credit,
            "Purchase invoice completed"
        );
        Ok(invoice)
    }

    /// Records a vendor payment and re-derives the payment status.
    pub async fn record_payment(
        &self,
        invoice_id: &str,
        payment: NewPayment,
        actor: &str,
    ) -> CommerceResult<RecordedPayment> {
        validate_payment_amount(payment.amount_cents)?;
        require("method", &payment.method)?;

        let mut tx = self.db.begin_serializable().await?;

        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;
        if invoice.lifecycle_status == LifecycleStatus::Closed {
            return Err(invalid_state(&invoice, "record payment"));
        }
        check_payment(&invoice, Money::from_cents(payment.amount_cents))?;

        let now = Utc::now();
        let recorded = VendorPayment {
            id: Uuid::new_v4().to_string(),
            invoice_id: invoice_id.to_string(),
            amount_cents: payment.amount_cents,
            method: payment.method.trim().to_uppercase(),
            reference: payment.reference,
            paid_on: payment.paid_on.unwrap_or_else(|| now.date_naive()),
            created_by: actor.to_string(),
            created_at: now,
        };
        PaymentStore::insert(&mut tx, &recorded).await?;

        let paid = PaymentStore::total_paid(&mut tx, invoice_id).await?;
        let status = derive_payment_status(invoice.total(), Money::from_cents(paid));
        PurchaseStore::set_payment(&mut tx, invoice_id, paid, status).await?;
        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;

        tx.commit().await?;

        info!(
            invoice_id = %invoice_id,
            amount_cents = recorded.amount_cents,
            paid_cents = paid,
            payment_status = ?status,
            "Vendor payment recorded"
        );
        Ok(RecordedPayment {
            payment: recorded,
            invoice,
        })
    }

    /// Marks the tax credit of a COMPLETE invoice as reconciled.
    pub async fn reconcile_tax(&self, invoice_id: &str, actor: &str) -> CommerceResult<PurchaseInvoice> {
        let mut tx = self.db.begin_serializable().await?;

        let mut invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;
        if invoice.status != InvoiceStatus::Complete {
            return Err(invalid_state(&invoice, "reconcile tax"));
        }
        if invoice.tax_status == TaxStatus::Reconciled {
            debug!(invoice_id = %invoice_id, "Tax already reconciled");
            return Ok(invoice);
        }

        PurchaseStore::set_tax_status(&mut tx, invoice_id, TaxStatus::Reconciled).await?;
        tx.commit().await?;

        invoice.tax_status = TaxStatus::Reconciled;
        info!(invoice_id = %invoice_id, actor = %actor, tax_credit_cents = invoice.tax_credit_cents, "Tax reconciled");
        Ok(invoice)
    }

    pub async fn can_close(&self, invoice_id: &str) -> CommerceResult<ClosureCheck> {
        let mut conn = self.db.acquire().await?;
        let invoice = PurchaseStore::get_invoice(&mut conn, invoice_id).await?;
        Ok(closure_check(&invoice))
    }

    /// Closes an invoice. Every unmet condition is reported in `CannotClose`.
    pub async fn close_invoice(
        &self,
        invoice_id: &str,
        notes: Option<&str>,
        actor: &str,
    ) -> CommerceResult<PurchaseInvoice> {
        require("actor", actor)?;
        let mut tx = self.db.begin_serializable().await?;

        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;
        let check = closure_check(&invoice);
        if !check.can_close {
            return Err(CoreError::CannotClose {
                invoice_id: invoice_id.to_string(),
                reasons: check.reasons,
            }
            .into());
        }

        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        PurchaseStore::mark_closed(&mut tx, invoice_id, actor, notes).await?;
        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;

        tx.commit().await?;

        info!(invoice_id = %invoice_id, grn = invoice.grn, closed_by = %actor, "Purchase invoice closed");
        Ok(invoice)
    }

    /// Reopens a CLOSED invoice.
    pub async fn reopen_invoice(&self, invoice_id: &str, actor: &str) -> CommerceResult<PurchaseInvoice> {
        let mut tx = self.db.begin_serializable().await?;

        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;
        if invoice.lifecycle_status != LifecycleStatus::Closed {
            return Err(invalid_state(&invoice, "reopen"));
        }

        PurchaseStore::mark_reopened(&mut tx, invoice_id).await?;
        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;

        tx.commit().await?;

        info!(invoice_id = %invoice_id, actor = %actor, "Purchase invoice reopened");
        Ok(invoice)
    }

    pub async fn lifecycle_summary(&self, invoice_id: &str) -> CommerceResult<LifecycleSummary> {
        let mut conn = self.db.acquire().await?;

        let invoice = PurchaseStore::get_invoice(&mut conn, invoice_id).await?;
        let items = PurchaseStore::item_counts(&mut conn, invoice_id).await?;
        let payments = PaymentStore::for_invoice(&mut conn, invoice_id).await?;
        let closure = closure_check(&invoice);

        Ok(LifecycleSummary {
            invoice_id: invoice.id.clone(),
            grn: invoice.grn,
            status: invoice.status,
            payment_status: invoice.payment_status,
            tax_status: invoice.tax_status,
            lifecycle_status: invoice.lifecycle_status,
            items,
            total_cents: invoice.total_cents,
            paid_cents: invoice.paid_cents,
            balance_cents: invoice.balance().cents(),
            tax_credit_cents: invoice.tax_credit_cents,
            payments: payments.len(),
            closure,
        })
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> CommerceResult<InvoiceDetail> {
        let mut conn = self.db.acquire().await?;
        let invoice = PurchaseStore::get_invoice(&mut conn, invoice_id).await?;
        let items = PurchaseStore::items_for_invoice(&mut conn, invoice_id).await?;
        Ok(InvoiceDetail { invoice, items })
    }

    pub async fn payments(&self, invoice_id: &str) -> CommerceResult<Vec<VendorPayment>> {
        let mut conn = self.db.acquire().await?;
        PurchaseStore::get_invoice(&mut conn, invoice_id).await?;
        Ok(PaymentStore::for_invoice(&mut conn, invoice_id).await?)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Validates and inserts one invoice line with its billed amounts.
async fn insert_line(
    conn: &mut SqliteConnection,
    invoice_id: &str,
    new: NewInvoiceItem,
) -> CommerceResult<PurchaseInvoiceItem> {
    let product = product::get(conn, &new.product_id).await?;
    let pack_size = new.pack_size.unwrap_or(product.pack_size);
    let tax_rate_bps = new.tax_rate_bps.unwrap_or(product.tax_rate_bps);

    validate_batch_number(&new.batch_number)?;
    validate_purchase_quantities(new.qty, new.free_qty, pack_size)?;
    for (field, cents) in [("ptr", new.ptr_cents), ("mrp", new.mrp_cents)] {
        if cents < 0 {
            return Err(CoreError::from(ValidationError::MustNotBeNegative {
                field: field.to_string(),
            })
            .into());
        }
    }

    let amounts = line_amounts(new.qty, Money::from_cents(new.ptr_cents), TaxRate::from_bps(tax_rate_bps));
    let item = PurchaseInvoiceItem {
        id: Uuid::new_v4().to_string(),
        invoice_id: invoice_id.to_string(),
        product_id: product.id,
        batch_number: new.batch_number.trim().to_string(),
        expiry_date: new.expiry_date,
        mfr_date: new.mfr_date,
        pack_size,
        qty: new.qty,
        free_qty: new.free_qty,
        ptr_cents: new.ptr_cents,
        mrp_cents: new.mrp_cents,
        tax_rate_bps,
        taxable_cents: amounts.taxable.cents(),
        tax_cents: amounts.tax.cents(),
        total_cents: amounts.total.cents(),
        status: ItemStatus::New,
        verified_by: None,
        verified_at: None,
        created_at: Utc::now(),
    };
    PurchaseStore::insert_item(conn, &item).await?;
    Ok(item)
}

fn ensure_editable(invoice: &PurchaseInvoice, operation: &str) -> CommerceResult<()> {
    if invoice.is_editable() {
        Ok(())
    } else {
        Err(invalid_state(invoice, operation))
    }
}

/// Re-derives payment status after the invoice total changed.
///
/// Fails when the new total is below what was already paid; the caller's
/// transaction is then dropped and the line change rolls back.
async fn resync_payment_status(
    conn: &mut SqliteConnection,
    invoice: &PurchaseInvoice,
    new_total_cents: i64,
) -> CommerceResult<()> {
    let new_total = Money::from_cents(new_total_cents);
    check_total_covers_payments(invoice, new_total)?;

    let status = derive_payment_status(new_total, invoice.paid());
    if status != invoice.payment_status {
        PurchaseStore::set_payment(conn, &invoice.id, invoice.paid_cents, status).await?;
        debug!(invoice_id = %invoice.id, payment_status = ?status, "Payment status re-derived");
    }
    Ok(())
}

fn invalid_state(invoice: &PurchaseInvoice, operation: &str) -> crate::error::CommerceError {
    let state = match (invoice.lifecycle_status, invoice.status) {
        (LifecycleStatus::Closed, _) => "CLOSED",
        (LifecycleStatus::Open, InvoiceStatus::Complete) => "COMPLETE",
        (LifecycleStatus::Open, InvoiceStatus::Open) => "OPEN",
    };
    CoreError::InvalidInvoiceState {
        invoice_id: invoice.id.clone(),
        state: state.to_string(),
        operation: operation.to_string(),
    }
    .into()
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommerceError;
    use crate::testing::{self, days_from_today};

    fn desk(db: &Database) -> InvoiceDesk {
        InvoiceDesk::new(db.clone())
    }

    fn header(invoice_no: &str) -> NewInvoice {
        NewInvoice {
            invoice_no: invoice_no.to_string(),
            vendor_id: "vendor-3".to_string(),
            invoice_date: testing::today(),
        }
    }

    /// 10 packs of 1 at PTR 8.00, 12% tax: taxable 80.00, tax 9.60, total 89.60.
    fn line(product_id: &str, batch_number: &str) -> NewInvoiceItem {
        NewInvoiceItem {
            product_id: product_id.to_string(),
            batch_number: batch_number.to_string(),
            expiry_date: Some(days_from_today(365)),
            mfr_date: None,
            qty: 10,
            free_qty: 0,
            pack_size: Some(1),
            ptr_cents: 800,
            mrp_cents: 1120,
            tax_rate_bps: None,
        }
    }

    fn payment(amount_cents: i64) -> NewPayment {
        NewPayment {
            amount_cents,
            method: "bank".to_string(),
            reference: Some("NEFT-001".to_string()),
            paid_on: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_grn_and_totals() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Azithromycin 500mg").await;

        let first = desk(&db)
            .create_invoice(header("INV-1"), vec![line(&product.id, "AZ-1")], "buyer")
            .await
            .unwrap();
        let second = desk(&db).create_invoice(header("INV-2"), vec![], "buyer").await.unwrap();

        assert_eq!(first.invoice.grn, 1);
        assert_eq!(second.invoice.grn, 2);
        assert_eq!(first.invoice.total_cents, 8960);
        assert_eq!(first.items[0].taxable_cents, 8000);
        assert_eq!(first.items[0].tax_cents, 960);
        assert_eq!(first.items[0].tax_rate_bps, testing::TAX_RATE_BPS);
        assert_eq!(second.invoice.total_cents, 0);
    }

    #[tokio::test]
    async fn test_pack_size_defaults_from_product() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Ibuprofen 400mg").await;

        let created = desk(&db)
            .create_invoice(
                header("INV-9"),
                vec![NewInvoiceItem {
                    pack_size: None,
                    free_qty: 1,
                    ..line(&product.id, "IB-1")
                }],
                "buyer",
            )
            .await
            .unwrap();

        assert_eq!(created.items[0].pack_size, 10);
        assert_eq!(created.items[0].total_units(), 110);
        // Free packs are not billed
        assert_eq!(created.items[0].taxable_cents, 8000);
    }

    #[tokio::test]
    async fn test_failed_create_burns_no_grn() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Cefixime 200mg").await;

        let bad = NewInvoiceItem {
            qty: 0,
            ..line(&product.id, "CF-1")
        };
        let err = desk(&db)
            .create_invoice(header("INV-1"), vec![bad], "buyer")
            .await
            .unwrap_err();
        assert_eq!(err.category(), rxstock_core::ErrorCategory::Validation);
        assert_eq!(testing::sequence_value(&db, GRN).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_vendor_invoice_is_rejected() {
        let db = testing::memory_db().await;
        desk(&db).create_invoice(header("INV-7"), vec![], "buyer").await.unwrap();
        let err = desk(&db).create_invoice(header("INV-7"), vec![], "buyer").await.unwrap_err();
        assert!(matches!(err, CommerceError::Db(rxstock_db::DbError::UniqueViolation { .. })));
    }

    #[tokio::test]
    async fn test_complete_requires_verified_items() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Atorvastatin 10mg").await;
        let created = desk(&db)
            .create_invoice(header("INV-1"), vec![line(&product.id, "AT-1")], "buyer")
            .await
            .unwrap();

        let err = desk(&db).complete_invoice(&created.invoice.id, "buyer").await.unwrap_err();
        match err {
            CommerceError::Core(CoreError::InvoiceNotReady { unverified, .. }) => assert_eq!(unverified, 1),
            other => panic!("unexpected error: {other:?}"),
        }

        testing::verifier(&db).verify_item(&created.items[0].id, "pharmacist").await.unwrap();
        let invoice = desk(&db).complete_invoice(&created.invoice.id, "buyer").await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Complete);
        assert_eq!(invoice.tax_credit_cents, 960);

        // No more lines once complete
        let err = desk(&db)
            .add_item(&created.invoice.id, line(&product.id, "AT-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::InvalidInvoiceState { .. })));
    }

    #[tokio::test]
    async fn test_rejected_lines_leave_totals_and_tax() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Omeprazole 20mg").await;
        let created = desk(&db)
            .create_invoice(
                header("INV-1"),
                vec![line(&product.id, "OM-1"), line(&product.id, "OM-2")],
                "buyer",
            )
            .await
            .unwrap();
        assert_eq!(created.invoice.total_cents, 17920);

        let rejected = desk(&db).reject_item(&created.items[1].id, "buyer").await.unwrap();
        assert_eq!(rejected.status, ItemStatus::Rejected);

        testing::verifier(&db).verify_item(&created.items[0].id, "pharmacist").await.unwrap();
        let invoice = desk(&db).complete_invoice(&created.invoice.id, "buyer").await.unwrap();
        assert_eq!(invoice.total_cents, 8960);
        assert_eq!(invoice.tax_credit_cents, 960);

        let summary = desk(&db).lifecycle_summary(&created.invoice.id).await.unwrap();
        assert_eq!(summary.items.verified, 1);
        assert_eq!(summary.items.rejected, 1);
        assert_eq!(summary.items.pending, 0);
    }

    #[tokio::test]
    async fn test_payments_and_overpayment_guard() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Vitamin D3").await;
        let created = desk(&db)
            .create_invoice(header("INV-1"), vec![line(&product.id, "VD-1")], "buyer")
            .await
            .unwrap();
        let id = created.invoice.id.as_str();

        let first = desk(&db).record_payment(id, payment(5000), "accounts").await.unwrap();
        assert_eq!(first.invoice.payment_status, PaymentStatus::Partial);
        assert_eq!(first.payment.method, "BANK");

        let err = desk(&db).record_payment(id, payment(4000), "accounts").await.unwrap_err();
        match err {
            CommerceError::Core(CoreError::Overpayment { paid, attempted, .. }) => {
                assert_eq!(paid.cents(), 5000);
                assert_eq!(attempted.cents(), 4000);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = desk(&db).record_payment(id, payment(0), "accounts").await.unwrap_err();
        assert_eq!(err.category(), rxstock_core::ErrorCategory::Validation);

        let last = desk(&db).record_payment(id, payment(3960), "accounts").await.unwrap();
        assert_eq!(last.invoice.paid_cents, 8960);
        assert_eq!(last.invoice.payment_status, PaymentStatus::Paid);
        assert_eq!(desk(&db).payments(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reject_cannot_leave_paid_above_total() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Metformin 500mg").await;
        let created = desk(&db)
            .create_invoice(
                header("INV-1"),
                vec![line(&product.id, "MF-1"), line(&product.id, "MF-2")],
                "buyer",
            )
            .await
            .unwrap();
        let id = created.invoice.id.as_str();

        desk(&db).record_payment(id, payment(17920), "accounts").await.unwrap();

        let err = desk(&db).reject_item(&created.items[1].id, "buyer").await.unwrap_err();
        match err {
            CommerceError::Core(CoreError::PaymentsExceedTotal { total, paid, .. }) => {
                assert_eq!(total.cents(), 8960);
                assert_eq!(paid.cents(), 17920);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Nothing changed: the line is still NEW and the invoice still balances
        let detail = desk(&db).get_invoice(id).await.unwrap();
        assert_eq!(detail.items[1].status, ItemStatus::New);
        assert_eq!(detail.invoice.total_cents, 17920);
        assert_eq!(detail.invoice.paid_cents, 17920);
        assert_eq!(detail.invoice.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_total_changes_re_derive_payment_status() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Amlodipine 5mg").await;
        let created = desk(&db)
            .create_invoice(
                header("INV-1"),
                vec![line(&product.id, "AM-1"), line(&product.id, "AM-2")],
                "buyer",
            )
            .await
            .unwrap();
        let id = created.invoice.id.as_str();

        let paid = desk(&db).record_payment(id, payment(8960), "accounts").await.unwrap();
        assert_eq!(paid.invoice.payment_status, PaymentStatus::Partial);

        // Rejecting the second line brings the total down to what was paid
        desk(&db).reject_item(&created.items[1].id, "buyer").await.unwrap();
        let detail = desk(&db).get_invoice(id).await.unwrap();
        assert_eq!(detail.invoice.total_cents, 8960);
        assert_eq!(detail.invoice.payment_status, PaymentStatus::Paid);

        // A new line reopens a balance
        desk(&db).add_item(id, line(&product.id, "AM-3")).await.unwrap();
        let detail = desk(&db).get_invoice(id).await.unwrap();
        assert_eq!(detail.invoice.total_cents, 17920);
        assert_eq!(detail.invoice.payment_status, PaymentStatus::Partial);
    }

    #[tokio::test]
    async fn test_close_and_reopen() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Levocetirizine 5mg").await;
        let created = desk(&db)
            .create_invoice(header("INV-1"), vec![line(&product.id, "LC-1")], "buyer")
            .await
            .unwrap();
        let id = created.invoice.id.as_str();

        let check = desk(&db).can_close(id).await.unwrap();
        assert!(!check.can_close);
        assert_eq!(check.reasons.len(), 3);

        let err = desk(&db).reconcile_tax(id, "accounts").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::InvalidInvoiceState { .. })));

        testing::verifier(&db).verify_item(&created.items[0].id, "pharmacist").await.unwrap();
        desk(&db).complete_invoice(id, "buyer").await.unwrap();
        desk(&db).record_payment(id, payment(8960), "accounts").await.unwrap();

        let err = desk(&db).close_invoice(id, None, "accounts").await.unwrap_err();
        match err {
            CommerceError::Core(CoreError::CannotClose { reasons, .. }) => assert_eq!(reasons.len(), 1),
            other => panic!("unexpected error: {other:?}"),
        }

        desk(&db).reconcile_tax(id, "accounts").await.unwrap();
        let closed = desk(&db).close_invoice(id, Some("Settled"), "accounts").await.unwrap();
        assert_eq!(closed.lifecycle_status, LifecycleStatus::Closed);
        assert_eq!(closed.closed_by.as_deref(), Some("accounts"));
        assert_eq!(closed.closure_notes.as_deref(), Some("Settled"));

        let err = desk(&db).record_payment(id, payment(1), "accounts").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::InvalidInvoiceState { .. })));

        let reopened = desk(&db).reopen_invoice(id, "manager").await.unwrap();
        assert_eq!(reopened.lifecycle_status, LifecycleStatus::Open);
        assert!(reopened.closed_at.is_none());

        let err = desk(&db).reopen_invoice(id, "manager").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::InvalidInvoiceState { .. })));

        let summary = desk(&db).lifecycle_summary(id).await.unwrap();
        assert!(summary.closure.can_close);
        assert_eq!(summary.balance_cents, 0);
        assert_eq!(summary.payments, 1);
    }
}
