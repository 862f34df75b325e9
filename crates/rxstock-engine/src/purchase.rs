//! # Purchase Verification
//!
//! Turns verified purchase lines into stock.
//!
//! ## Per Item (all or nothing)
//! ```text
//! item NEW ──► checks ──► batch (received = remaining = (qty+free)×pack)
//!                   │     RECEIVED movement (PURCHASE_ITEM / item id)
//!                   │     item VERIFIED (verified_by, verified_at)
//!                   │
//!                   ├── VERIFIED           → AlreadyVerified
//!                   ├── REJECTED           → InvalidItemStatus
//!                   ├── expiry <= today    → ExpiredAtVerification
//!                   └── RECEIVED exists    → DuplicateStockRecord
//! ```
//!
//! ## Whole Invoice (best effort)
//! One transaction over every line. Rule failures on a line are counted and
//! skipped; database failures still abort everything.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use rxstock_core::validation::{validate_batch_number, validate_purchase_quantities};
use rxstock_core::{
    Batch, BatchMovement, CoreError, ItemStatus, PurchaseInvoice, PurchaseInvoiceItem, ReferenceType,
    ValidationError,
};
use rxstock_db::{BatchLedger, Database, MovementSource, NewBatch, PurchaseStore};

use crate::error::{CommerceError, CommerceResult};

/// What verifying one item produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedStock {
    pub item: PurchaseInvoiceItem,
    pub batch: Batch,
    pub movement: BatchMovement,
}

/// Counters of a whole-invoice verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySummary {
    /// Items verified by this call.
    pub verified: u32,
    /// Items that were VERIFIED before this call.
    pub already_verified: u32,
    /// Units put into stock by this call.
    pub stock_created: i64,
    pub batches_created: u32,
    pub skipped_expired: u32,
    pub skipped_duplicate: u32,
    pub skipped_rejected: u32,
    /// Items failing input checks (missing expiry, bad quantities...).
    pub skipped_invalid: u32,
}

pub struct PurchaseVerifier {
    db: Database,
}

impl PurchaseVerifier {
    pub fn new(db: Database) -> Self {
        PurchaseVerifier { db }
    }

    /// Verifies one purchase item and receives its stock.
    pub async fn verify_item(&self, item_id: &str, actor: &str) -> CommerceResult<VerifiedStock> {
        let today = Utc::now().date_naive();
        let mut tx = self.db.begin_serializable().await?;

        let item = PurchaseStore::get_item(&mut tx, item_id).await?;
        let invoice = PurchaseStore::get_invoice(&mut tx, &item.invoice_id).await?;

        let expiry = check_verifiable(&mut tx, &item, today).await?;
        let verified = receive_item(&mut tx, &invoice, item, expiry, actor, today).await?;

        tx.commit().await?;

        info!(
            item_id = %item_id,
            batch_id = %verified.batch.id,
            quantity = verified.batch.quantity_received,
            "Purchase item verified"
        );
        Ok(verified)
    }

    /// Verifies every NEW item of an invoice in one transaction.
    pub async fn verify_all_items(&self, invoice_id: &str, actor: &str) -> CommerceResult<VerifySummary> {
        let today = Utc::now().date_naive();
        let mut tx = self.db.begin_serializable().await?;

        let invoice = PurchaseStore::get_invoice(&mut tx, invoice_id).await?;
        let items = PurchaseStore::items_for_invoice(&mut tx, invoice_id).await?;
        let mut summary = VerifySummary::default();

        for item in items {
            let expiry = match check_verifiable(&mut tx, &item, today).await {
                Ok(expiry) => expiry,
                Err(CommerceError::Core(skip)) => {
                    match skip {
                        CoreError::AlreadyVerified { .. } => summary.already_verified += 1,
                        CoreError::ExpiredAtVerification { .. } => summary.skipped_expired += 1,
                        CoreError::DuplicateStockRecord { .. } => summary.skipped_duplicate += 1,
                        CoreError::InvalidItemStatus { .. } => summary.skipped_rejected += 1,
                        other => {
                            warn!(item_id = %item.id, error = %other, "Skipping invalid purchase item");
                            summary.skipped_invalid += 1;
                        }
                    }
                    continue;
                }
                Err(other) => return Err(other),
            };

            let verified = receive_item(&mut tx, &invoice, item, expiry, actor, today).await?;
            summary.verified += 1;
            summary.batches_created += 1;
            summary.stock_created += verified.batch.quantity_received;
        }

        tx.commit().await?;

        if summary.skipped_expired + summary.skipped_duplicate + summary.skipped_invalid > 0 {
            warn!(invoice_id = %invoice_id, ?summary, "Invoice verified with skipped items");
        } else {
            info!(invoice_id = %invoice_id, ?summary, "Invoice verified");
        }
        Ok(summary)
    }
}

/// Runs every pre-check and returns the expiry date to stock under.
async fn check_verifiable(
    conn: &mut SqliteConnection,
    item: &PurchaseInvoiceItem,
    today: NaiveDate,
) -> CommerceResult<NaiveDate> {
    match item.status {
        ItemStatus::New => {}
        ItemStatus::Verified => {
            return Err(CoreError::AlreadyVerified {
                item_id: item.id.clone(),
            }
            .into())
        }
        other => {
            return Err(CoreError::InvalidItemStatus {
                item_id: item.id.clone(),
                status: other.as_str().to_string(),
            }
            .into())
        }
    }

    let expiry = item.expiry_date.ok_or_else(|| ValidationError::Required {
        field: "expiry_date".to_string(),
    })?;
    if expiry <= today {
        return Err(CoreError::ExpiredAtVerification {
            item_id: item.id.clone(),
            expiry_date: expiry,
        }
        .into());
    }

    validate_batch_number(&item.batch_number)?;
    validate_purchase_quantities(item.qty, item.free_qty, item.pack_size)?;

    if BatchLedger::has_received_movement(conn, &item.id).await? {
        return Err(CoreError::DuplicateStockRecord {
            item_id: item.id.clone(),
        }
        .into());
    }

    Ok(expiry)
}

/// Creates the batch, its RECEIVED movement and flips the item to VERIFIED.
async fn receive_item(
    conn: &mut SqliteConnection,
    invoice: &PurchaseInvoice,
    mut item: PurchaseInvoiceItem,
    expiry: NaiveDate,
    actor: &str,
    today: NaiveDate,
) -> CommerceResult<VerifiedStock> {
    let source = MovementSource::new(ReferenceType::PurchaseItem, &item.id, actor)
        .with_notes(format!("GRN {} / invoice {}", invoice.grn, invoice.invoice_no));

    let (batch, movement) = BatchLedger::receive(
        conn,
        NewBatch {
            product_id: item.product_id.clone(),
            batch_number: item.batch_number.trim().to_string(),
            expiry_date: expiry,
            mfr_date: item.mfr_date,
            quantity: item.total_units(),
            unit_cost_cents: item.unit_cost().cents(),
            mrp_cents: item.unit_mrp().cents(),
            vendor_id: Some(invoice.vendor_id.clone()),
            purchase_item_id: Some(item.id.clone()),
            received_date: today,
        },
        &source,
    )
    .await?;

    let verified_at = Utc::now();
    PurchaseStore::mark_verified(conn, &item.id, actor, verified_at).await?;
    item.status = ItemStatus::Verified;
    item.verified_by = Some(actor.to_string());
    item.verified_at = Some(verified_at);

    debug!(item_id = %item.id, batch_id = %batch.id, units = batch.quantity_received, "Stock received");

    Ok(VerifiedStock { item, batch, movement })
}
