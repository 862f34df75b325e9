//! # Stock Desk
//!
//! Batch-level operations outside of sales and purchases: recalls,
//! adjustments, expiry write-offs and the read-side reports.
//!
//! ```text
//! recall_batch ───────► BatchLedger::recall      RECALLED
//! adjust_stock  (-n) ─► BatchLedger::deduct      ADJUSTED
//!               (+n) ─► BatchLedger::credit      RECEIVED / ADJUSTMENT
//! write_off_expired ──► BatchLedger::expire      EXPIRED
//!
//! batch_traceability   batch + product + movements + sales + supplier + balance
//! near_expiry_batches  ACTIVE stock expiring within N days
//! ```

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rxstock_core::validation::validate_reason;
use rxstock_core::{
    Batch, BatchMovement, BatchStatus, CoreError, MovementType, Product, PurchaseInvoice, PurchaseInvoiceItem,
    ReferenceType, ValidationError,
};
use rxstock_db::repository::product;
use rxstock_db::{
    BatchLedger, BatchSale, Database, DbError, LedgerReconciliation, MovementSource, NearExpiryBatch,
    PurchaseStore, SaleStore,
};

use crate::error::CommerceResult;

/// Longest near-expiry window accepted, in days.
pub const MAX_NEAR_EXPIRY_DAYS: i64 = 3650;

/// Everything known about one batch, from supplier to customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTraceability {
    pub batch: Batch,
    pub product: Option<Product>,
    pub effective_status: BatchStatus,
    pub days_to_expiry: i64,
    pub movements: Vec<BatchMovement>,
    pub sales: Vec<BatchSale>,
    pub purchase_item: Option<PurchaseInvoiceItem>,
    pub purchase_invoice: Option<PurchaseInvoice>,
    pub reconciliation: LedgerReconciliation,
}

pub struct StockDesk {
    db: Database,
    near_expiry_days: i64,
}

impl StockDesk {
    pub fn new(db: Database, near_expiry_days: i64) -> Self {
        StockDesk { db, near_expiry_days }
    }

    /// Recalls a batch. Its remaining units are never allocated again.
    pub async fn recall_batch(&self, batch_id: &str, reason: &str, actor: &str) -> CommerceResult<BatchMovement> {
        let mut tx = self.db.begin_serializable().await?;
        let movement = BatchLedger::recall(&mut tx, batch_id, reason, actor).await?;
        tx.commit().await?;
        Ok(movement)
    }

    /// Corrects the units on hand after a physical count.
    ///
    /// A negative `delta` removes units (ADJUSTED). A positive `delta` puts
    /// units back, up to the quantity originally received.
    pub async fn adjust_stock(&self, batch_id: &str, delta: i64, reason: &str, actor: &str) -> CommerceResult<Batch> {
        validate_reason("reason", reason)?;
        if delta == 0 {
            return Err(CoreError::InvalidQuantity { quantity: delta }.into());
        }

        let source = MovementSource::new(ReferenceType::Adjustment, batch_id, actor).with_notes(reason.trim());

        let mut tx = self.db.begin_serializable().await?;
        let batch = if delta < 0 {
            BatchLedger::deduct(&mut tx, batch_id, -delta, MovementType::Adjusted, &source).await?
        } else {
            BatchLedger::credit(&mut tx, batch_id, delta, MovementType::Received, &source).await?
        };
        tx.commit().await?;

        info!(
            batch_id = %batch_id,
            delta,
            remaining = batch.quantity_remaining,
            reason = %reason.trim(),
            "Stock adjusted"
        );
        Ok(batch)
    }

    /// Writes off the remaining units of an expired batch.
    pub async fn write_off_expired(&self, batch_id: &str, actor: &str) -> CommerceResult<Option<BatchMovement>> {
        let today = Utc::now().date_naive();
        let source = MovementSource::new(ReferenceType::Adjustment, batch_id, actor).with_notes("Expired stock written off");

        let mut tx = self.db.begin_serializable().await?;
        let movement = BatchLedger::expire(&mut tx, batch_id, today, &source).await?;
        tx.commit().await?;
        Ok(movement)
    }

    /// Full history of a batch with its supplier context and a balance check.
    pub async fn batch_traceability(&self, batch_id: &str) -> CommerceResult<BatchTraceability> {
        let today = Utc::now().date_naive();
        let mut conn = self.db.acquire().await?;

        let batch = BatchLedger::get(&mut conn, batch_id).await?;
        let product = product::find(&mut conn, &batch.product_id).await?;
        let movements = BatchLedger::movements(&mut conn, batch_id).await?;
        let sales = SaleStore::sales_for_batch(&mut conn, batch_id).await?;
        let reconciliation = BatchLedger::reconcile(&mut conn, batch_id).await?;

        let purchase_item = match &batch.purchase_item_id {
            Some(item_id) => match PurchaseStore::get_item(&mut conn, item_id).await {
                Ok(item) => Some(item),
                Err(DbError::NotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };
        let purchase_invoice = match &purchase_item {
            Some(item) => PurchaseStore::find_invoice(&mut conn, &item.invoice_id).await?,
            None => None,
        };

        debug!(
            batch_id = %batch_id,
            movements = movements.len(),
            sales = sales.len(),
            balanced = reconciliation.balanced,
            "Batch traced"
        );

        Ok(BatchTraceability {
            effective_status: batch.effective_status(today),
            days_to_expiry: batch.days_to_expiry(today),
            batch,
            product,
            movements,
            sales,
            purchase_item,
            purchase_invoice,
            reconciliation,
        })
    }

    /// ACTIVE batches with stock expiring within `days` (today excluded).
    pub async fn near_expiry_batches(&self, days: i64) -> CommerceResult<Vec<NearExpiryBatch>> {
        self.near_expiry_on(Utc::now().date_naive(), days).await
    }

    /// Near-expiry report over the configured window.
    pub async fn near_expiry_default(&self) -> CommerceResult<Vec<NearExpiryBatch>> {
        self.near_expiry_batches(self.near_expiry_days).await
    }

    async fn near_expiry_on(&self, today: NaiveDate, days: i64) -> CommerceResult<Vec<NearExpiryBatch>> {
        if !(1..=MAX_NEAR_EXPIRY_DAYS).contains(&days) {
            return Err(ValidationError::OutOfRange {
                field: "days".to_string(),
                min: 1,
                max: MAX_NEAR_EXPIRY_DAYS,
            }
            .into());
        }
        let mut conn = self.db.acquire().await?;
        Ok(BatchLedger::near_expiry(&mut conn, today, days).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommerceError;
    use crate::invoice::{InvoiceDesk, NewInvoice, NewInvoiceItem};
    use crate::returns::ReturnDesk;
    use crate::sale::{SaleOrchestrator, SaleRequest};
    use crate::testing::{self, days_from_today, line};
    use rxstock_core::pricing::PricingCalculator;

    fn desk(db: &Database) -> StockDesk {
        StockDesk::new(db.clone(), 90)
    }

    #[tokio::test]
    async fn test_recall_blocks_allocation() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Ranitidine 150mg").await;
        let batch = testing::stock(&db, &product.id, "RAN-1", days_from_today(120), 20).await;

        let movement = desk(&db).recall_batch(&batch.id, "NDMA impurity", "qa").await.unwrap();
        assert_eq!(movement.movement_type, MovementType::Recalled);
        assert_eq!(movement.quantity, 20);

        let err = desk(&db).recall_batch(&batch.id, "NDMA impurity", "qa").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::AlreadyRecalled { .. })));

        let sales = SaleOrchestrator::new(db.clone(), PricingCalculator::default());
        let err = sales
            .create_sale(
                SaleRequest {
                    customer_id: None,
                    items: vec![line(&product.id, 1)],
                },
                "counter",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::NoActiveBatches { .. })));
    }

    #[tokio::test]
    async fn test_adjustments_keep_the_ledger_balanced() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Dolo 650").await;
        let batch = testing::stock(&db, &product.id, "DL-1", days_from_today(200), 10).await;

        let after = desk(&db).adjust_stock(&batch.id, -3, "Broken strips", "store").await.unwrap();
        assert_eq!(after.quantity_remaining, 7);

        let after = desk(&db).adjust_stock(&batch.id, 2, "Found in back shelf", "store").await.unwrap();
        assert_eq!(after.quantity_remaining, 9);

        let err = desk(&db).adjust_stock(&batch.id, 5, "Miscount", "store").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::LedgerOverflow { .. })));

        let err = desk(&db).adjust_stock(&batch.id, 0, "Nothing", "store").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::InvalidQuantity { .. })));

        let err = desk(&db).adjust_stock(&batch.id, -1, " ", "store").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::Validation(_))));

        let trace = desk(&db).batch_traceability(&batch.id).await.unwrap();
        assert!(trace.reconciliation.balanced);
        assert_eq!(trace.reconciliation.outbound, 3);
        assert_eq!(trace.reconciliation.received_after, 2);
    }

    #[tokio::test]
    async fn test_traceability_links_supplier_and_customers() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Montelukast 10mg").await;
        let created = InvoiceDesk::new(db.clone())
            .create_invoice(
                NewInvoice {
                    invoice_no: "ML-77".into(),
                    vendor_id: "vendor-5".into(),
                    invoice_date: testing::today(),
                },
                vec![NewInvoiceItem {
                    product_id: product.id.clone(),
                    batch_number: "ML-1".into(),
                    expiry_date: Some(days_from_today(180)),
                    mfr_date: None,
                    qty: 6,
                    free_qty: 0,
                    pack_size: Some(1),
                    ptr_cents: testing::UNIT_COST_CENTS,
                    mrp_cents: testing::MRP_CENTS,
                    tax_rate_bps: None,
                }],
                "buyer",
            )
            .await
            .unwrap();
        let stock = testing::verifier(&db)
            .verify_item(&created.items[0].id, "pharmacist")
            .await
            .unwrap();

        let sales = SaleOrchestrator::new(db.clone(), PricingCalculator::default());
        let receipt = sales
            .create_sale(
                SaleRequest {
                    customer_id: Some("cust-42".into()),
                    items: vec![line(&product.id, 4)],
                },
                "counter",
            )
            .await
            .unwrap();
        ReturnDesk::new(db.clone())
            .create_return(&receipt.lines[0].item.id, 1, "Wrong strength", "counter")
            .await
            .unwrap();

        let trace = desk(&db).batch_traceability(&stock.batch.id).await.unwrap();
        assert_eq!(trace.product.map(|p| p.id), Some(product.id.clone()));
        assert_eq!(trace.effective_status, BatchStatus::Active);
        assert_eq!(trace.days_to_expiry, 180);
        assert_eq!(trace.movements.len(), 3);
        assert_eq!(trace.sales.len(), 1);
        assert_eq!(trace.sales[0].customer_id.as_deref(), Some("cust-42"));
        assert_eq!(trace.sales[0].quantity, 4);
        assert_eq!(trace.purchase_item.map(|i| i.id), Some(created.items[0].id.clone()));
        assert_eq!(trace.purchase_invoice.map(|i| i.vendor_id), Some("vendor-5".to_string()));
        assert_eq!(trace.batch.quantity_remaining, 3);
        assert!(trace.reconciliation.balanced);
    }

    #[tokio::test]
    async fn test_near_expiry_window() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Insulin Glargine").await;
        testing::stock(&db, &product.id, "SOON", days_from_today(10), 4).await;
        testing::stock(&db, &product.id, "LATER", days_from_today(60), 2).await;
        testing::stock(&db, &product.id, "FAR", days_from_today(400), 9).await;

        let rows = desk(&db).near_expiry_batches(30).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch_number, "SOON");
        assert_eq!(rows[0].days_to_expiry, 10);
        assert_eq!(rows[0].value_at_risk_cents, 4 * testing::UNIT_COST_CENTS);

        let rows = desk(&db).near_expiry_default().await.unwrap();
        assert_eq!(rows.len(), 2);

        let err = desk(&db).near_expiry_batches(0).await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_write_off_requires_expiry() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Eye Drops").await;
        let fresh = testing::stock(&db, &product.id, "FRESH", days_from_today(30), 5).await;
        let stale = testing::stock(&db, &product.id, "STALE", testing::today(), 5).await;

        let err = desk(&db).write_off_expired(&fresh.id, "auditor").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::InvalidBatchStatus { .. })));

        let movement = desk(&db).write_off_expired(&stale.id, "auditor").await.unwrap().unwrap();
        assert_eq!(movement.movement_type, MovementType::Expired);
        assert_eq!(movement.quantity, 5);

        let trace = desk(&db).batch_traceability(&stale.id).await.unwrap();
        assert_eq!(trace.batch.status, BatchStatus::Expired);
        assert!(trace.reconciliation.balanced);
    }

    /// Mixed sales, returns, adjustments and a recall: every batch still
    /// satisfies `received - remaining == out - returned - received after`.
    #[tokio::test]
    async fn test_ledger_balances_after_mixed_workflows() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Cetirizine Syrup").await;
        let batches = [
            testing::stock(&db, &product.id, "C-1", days_from_today(20), 7).await,
            testing::stock(&db, &product.id, "C-2", days_from_today(50), 11).await,
            testing::stock(&db, &product.id, "C-3", days_from_today(90), 13).await,
        ];

        let sales = SaleOrchestrator::new(db.clone(), PricingCalculator::default());
        let returns = ReturnDesk::new(db.clone());
        let stock = desk(&db);

        for (round, quantity) in [3_i64, 5, 2, 6, 4].into_iter().enumerate() {
            let receipt = sales
                .create_sale(
                    SaleRequest {
                        customer_id: None,
                        items: vec![line(&product.id, quantity)],
                    },
                    "counter",
                )
                .await
                .unwrap();
            if round % 2 == 0 {
                returns
                    .create_return(&receipt.lines[0].item.id, 1, "Customer changed mind", "counter")
                    .await
                    .unwrap();
            }
        }
        stock.adjust_stock(&batches[2].id, -2, "Damaged", "store").await.unwrap();
        stock.recall_batch(&batches[1].id, "Supplier notice", "qa").await.unwrap();

        let mut on_hand = 0;
        for batch in &batches {
            let trace = stock.batch_traceability(&batch.id).await.unwrap();
            let r = &trace.reconciliation;
            assert!(r.balanced, "batch {} unbalanced: {r:?}", batch.batch_number);
            assert_eq!(
                r.quantity_received - r.quantity_remaining,
                r.outbound - r.returned - r.received_after
            );
            on_hand += trace.batch.quantity_remaining;
        }
        // 31 received, 20 sold, 3 returned, 2 adjusted away
        assert_eq!(on_hand, 31 - 20 + 3 - 2);
    }
}
