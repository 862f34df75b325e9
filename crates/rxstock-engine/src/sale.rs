//! # Sale Orchestrator
//!
//! Creates a sale as one all-or-nothing transaction.
//!
//! ## Stages
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Validating ──► Allocating ──► PricingCheck ──► Persisting ──► Committed│
//! │      │              │               │               │                   │
//! │  EmptySale     FEFO per line    PriceMismatch   bill_no, order_no       │
//! │  InvalidQty    + expiry         (before any     header, SOLD deducts,   │
//! │                  re-check        write)         lines with snapshots    │
//! │                                                                         │
//! │  Any error: the transaction is dropped → SQLite rolls everything back, │
//! │  including the sequence increments.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rxstock_core::allocation::{encode_snapshot, reserve};
use rxstock_core::pricing::{PriceWarning, PricingCalculator, PricingInput};
use rxstock_core::validation::validate_sale_lines;
use rxstock_core::{
    BatchAllocation, Money, MovementType, Product, ReferenceType, Sale, SaleItem, SaleLine, SaleStatus,
    ValidationError,
};
use rxstock_db::repository::{pricing_rule, product};
use rxstock_db::sequence::{BILL_NO, ORDER_NO};
use rxstock_db::{BatchLedger, Database, MovementSource, SaleStore, SequenceGenerator};

use crate::allocation::{allocate_line, ensure_unexpired, LineAllocation};
use crate::error::{CommerceError, CommerceResult};

// =============================================================================
// Stage
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStage {
    Validating,
    Allocating,
    PricingCheck,
    Persisting,
    Committed,
}

impl fmt::Display for SaleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaleStage::Validating => "validating",
            SaleStage::Allocating => "allocating",
            SaleStage::PricingCheck => "pricing_check",
            SaleStage::Persisting => "persisting",
            SaleStage::Committed => "committed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Request / Receipt
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRequest {
    pub customer_id: Option<String>,
    pub items: Vec<SaleLine>,
}

/// A persisted line with the batches it drew from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub item: SaleItem,
    pub allocations: Vec<BatchAllocation>,
    pub rule_applied: String,
    pub warnings: Vec<PriceWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub sale: Sale,
    pub lines: Vec<ReceiptLine>,
}

/// Everything learnt about a line before anything is written.
struct PlannedLine {
    line: SaleLine,
    product: Product,
    allocation: LineAllocation,
    rule_applied: String,
    warnings: Vec<PriceWarning>,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct SaleOrchestrator {
    db: Database,
    pricing: PricingCalculator,
}

impl SaleOrchestrator {
    pub fn new(db: Database, pricing: PricingCalculator) -> Self {
        SaleOrchestrator { db, pricing }
    }

    /// Creates a sale, deducting stock FEFO.
    ///
    /// ## Errors
    /// * `EmptySale`, `InvalidQuantity`, `QuantityTooLarge` - bad request
    /// * `NoActiveBatches`, `AllBatchesExpired`, `InsufficientStock` - allocation
    /// * `ExpiredBatchInAllocation` - a batch expired while the sale was in flight
    /// * `PriceMismatch` - requested price outside tolerance
    /// * `Db(Busy | Conflict)` - lock contention, retry the whole call
    pub async fn create_sale(&self, request: SaleRequest, actor: &str) -> CommerceResult<SaleReceipt> {
        let mut stage = SaleStage::Validating;

        match self.run(request, actor, &mut stage).await {
            Ok(receipt) => {
                enter(&mut stage, SaleStage::Committed);
                info!(
                    sale_id = %receipt.sale.id,
                    bill_no = receipt.sale.bill_no,
                    lines = receipt.lines.len(),
                    total_cents = receipt.sale.total_cents,
                    "Sale committed"
                );
                Ok(receipt)
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "Sale aborted");
                Err(e)
            }
        }
    }

    async fn run(&self, request: SaleRequest, actor: &str, stage: &mut SaleStage) -> CommerceResult<SaleReceipt> {
        validate_sale_lines(&request.items)?;
        if actor.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "actor".to_string(),
            }
            .into());
        }

        let today = Utc::now().date_naive();
        let mut tx = self.db.begin_serializable().await?;

        // Allocating
        enter(stage, SaleStage::Allocating);
        let mut reserved: HashMap<String, i64> = HashMap::new();
        let mut planned: Vec<PlannedLine> = Vec::with_capacity(request.items.len());

        for line in request.items {
            let product = product::get(&mut tx, &line.product_id).await?;
            if !product.is_active {
                return Err(ValidationError::InvalidFormat {
                    field: "product_id".to_string(),
                    reason: format!("product {} is inactive", product.id),
                }
                .into());
            }

            let allocation = allocate_line(&mut tx, &line.product_id, line.quantity, today, &reserved).await?;
            reserve(&mut reserved, &allocation.allocations);

            planned.push(PlannedLine {
                line,
                product,
                allocation,
                rule_applied: String::new(),
                warnings: Vec::new(),
            });
        }

        ensure_unexpired(
            planned.iter().flat_map(|p| p.allocation.allocations.iter()),
            Utc::now().date_naive(),
        )?;

        // PricingCheck
        enter(stage, SaleStage::PricingCheck);
        let rule_book = pricing_rule::load_rule_book(&mut tx, today).await?;

        for plan in planned.iter_mut() {
            let batch = plan.allocation.first_batch().ok_or_else(|| {
                CommerceError::from(rxstock_core::CoreError::NoActiveBatches {
                    product_id: plan.line.product_id.clone(),
                })
            })?;

            let input = PricingInput {
                product_id: plan.product.id.clone(),
                category: plan.product.category.clone(),
                ptr: batch.unit_cost(),
                mrp: batch.mrp(),
                tax_rate: plan.product.tax_rate(),
                quantity: plan.line.quantity,
                on: today,
            };
            let quote = self
                .pricing
                .validate(&input, Money::from_cents(plan.line.unit_price_cents), &rule_book)?;

            for warning in &quote.warnings {
                warn!(product_id = %plan.product.id, ?warning, "Price warning");
            }
            plan.rule_applied = quote.rule_applied;
            plan.warnings = quote.warnings;
        }

        // Persisting
        enter(stage, SaleStage::Persisting);
        let bill_no = SequenceGenerator::next(&mut tx, BILL_NO).await?;
        let order_no = SequenceGenerator::next(&mut tx, ORDER_NO).await?;

        let now = Utc::now();
        let sale_id = Uuid::new_v4().to_string();

        let amounts: Vec<(Money, Money)> = planned
            .iter()
            .map(|p| {
                let taxable = Money::from_cents(p.line.unit_price_cents).multiply_quantity(p.line.quantity);
                (taxable, taxable.calculate_tax(p.product.tax_rate()))
            })
            .collect();
        let subtotal: Money = amounts.iter().map(|(taxable, _)| *taxable).sum();
        let tax: Money = amounts.iter().map(|(_, tax)| *tax).sum();

        let sale = Sale {
            id: sale_id.clone(),
            bill_no,
            order_no,
            bill_date: today,
            customer_id: request.customer_id,
            subtotal_cents: subtotal.cents(),
            tax_cents: tax.cents(),
            total_cents: (subtotal + tax).cents(),
            status: SaleStatus::Completed,
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };
        SaleStore::insert_sale(&mut tx, &sale).await?;

        let source = MovementSource::new(ReferenceType::Sale, &sale_id, actor);
        let mut lines = Vec::with_capacity(planned.len());

        for (plan, (taxable, line_tax)) in planned.into_iter().zip(amounts) {
            for a in &plan.allocation.allocations {
                BatchLedger::deduct(&mut tx, &a.batch_id, a.quantity, MovementType::Sold, &source).await?;
            }

            let first = plan.allocation.allocations.first();
            let item = SaleItem {
                id: Uuid::new_v4().to_string(),
                sale_id: sale_id.clone(),
                product_id: plan.line.product_id.clone(),
                quantity: plan.line.quantity,
                unit_price_cents: plan.line.unit_price_cents,
                tax_cents: line_tax.cents(),
                line_total_cents: (taxable + line_tax).cents(),
                batch_allocations: Some(encode_snapshot(&plan.allocation.allocations)?),
                batch_number: first.map(|a| a.batch_number.clone()),
                expiry_date: first.map(|a| a.expiry_date),
                return_of_item_id: None,
                return_reason: None,
                created_by: actor.to_string(),
                created_at: now,
            };
            SaleStore::insert_item(&mut tx, &item).await?;

            lines.push(ReceiptLine {
                item,
                allocations: plan.allocation.allocations,
                rule_applied: plan.rule_applied,
                warnings: plan.warnings,
            });
        }

        tx.commit().await?;

        Ok(SaleReceipt { sale, lines })
    }

    /// Reads a sale with all of its lines, return lines included.
    pub async fn get_sale(&self, sale_id: &str) -> CommerceResult<(Sale, Vec<SaleItem>)> {
        let mut conn = self.db.acquire().await?;
        let sale = SaleStore::get_sale(&mut conn, sale_id).await?;
        let items = SaleStore::items_for_sale(&mut conn, sale_id).await?;
        Ok((sale, items))
    }
}

fn enter(stage: &mut SaleStage, next: SaleStage) {
    debug!(from = %stage, to = %next, "Sale stage");
    *stage = next;
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, days_from_today, line, PRICE_CENTS};
    use rxstock_core::pricing::{CalculationMethod, RuleScope, RuleStatus};
    use rxstock_core::{BatchStatus, CoreError};
    use rxstock_db::NewPricingRule;

    fn orchestrator(db: &Database) -> SaleOrchestrator {
        SaleOrchestrator::new(db.clone(), PricingCalculator::default())
    }

    fn request(items: Vec<SaleLine>) -> SaleRequest {
        SaleRequest {
            customer_id: Some("walk-in".into()),
            items,
        }
    }

    #[tokio::test]
    async fn test_sale_spans_batches_fefo() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Paracetamol 500mg").await;
        let a = testing::stock(&db, &product.id, "A", days_from_today(30), 5).await;
        let b = testing::stock(&db, &product.id, "B", days_from_today(120), 10).await;

        let receipt = orchestrator(&db)
            .create_sale(request(vec![line(&product.id, 8)]), "cashier")
            .await
            .unwrap();

        assert_eq!(receipt.sale.bill_no, 1);
        assert_eq!(receipt.sale.order_no, 1);
        let allocations = &receipt.lines[0].allocations;
        assert_eq!(allocations.len(), 2);
        assert_eq!((allocations[0].batch_id.as_str(), allocations[0].quantity), (a.id.as_str(), 5));
        assert_eq!((allocations[1].batch_id.as_str(), allocations[1].quantity), (b.id.as_str(), 3));

        let a = testing::batch(&db, &a.id).await;
        let b = testing::batch(&db, &b.id).await;
        assert_eq!(a.quantity_remaining, 0);
        assert_eq!(a.status, BatchStatus::Depleted);
        assert_eq!(b.quantity_remaining, 7);
        assert_eq!(b.status, BatchStatus::Active);

        // Totals: 8 × 9.60 = 76.80 + 12% = 9.22
        assert_eq!(receipt.sale.subtotal_cents, 7680);
        assert_eq!(receipt.sale.tax_cents, 922);
        assert_eq!(receipt.sale.total_cents, 8602);

        let item = &receipt.lines[0].item;
        assert_eq!(item.batch_number.as_deref(), Some("A"));
        assert_eq!(item.allocations().unwrap().unwrap(), *allocations);
    }

    #[tokio::test]
    async fn test_price_mismatch_leaves_no_trace() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Ibuprofen 400mg").await;
        let batch = testing::stock(&db, &product.id, "A", days_from_today(90), 10).await;

        let mut bad = line(&product.id, 2);
        bad.unit_price_cents = PRICE_CENTS - 2;

        let err = orchestrator(&db)
            .create_sale(request(vec![bad]), "cashier")
            .await
            .unwrap_err();
        match err {
            CommerceError::Core(CoreError::PriceMismatch { expected, actual, .. }) => {
                assert_eq!(expected.cents(), PRICE_CENTS);
                assert_eq!(actual.cents(), PRICE_CENTS - 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(testing::batch(&db, &batch.id).await.quantity_remaining, 10);
        assert_eq!(testing::sequence_value(&db, BILL_NO).await, 0);
        assert_eq!(testing::sequence_value(&db, ORDER_NO).await, 0);
    }

    #[tokio::test]
    async fn test_one_cent_tolerance_is_accepted() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Antacid Gel").await;
        testing::stock(&db, &product.id, "A", days_from_today(90), 10).await;

        let mut near = line(&product.id, 1);
        near.unit_price_cents = PRICE_CENTS + 1;

        let receipt = orchestrator(&db)
            .create_sale(request(vec![near]), "cashier")
            .await
            .unwrap();
        assert_eq!(receipt.lines[0].item.unit_price_cents, PRICE_CENTS + 1);
    }

    #[tokio::test]
    async fn test_failing_line_rolls_back_earlier_lines() {
        let db = testing::memory_db().await;
        let stocked = testing::product(&db, "Vitamin C 500mg").await;
        let empty = testing::product(&db, "Calamine Lotion").await;
        let batch = testing::stock(&db, &stocked.id, "A", days_from_today(90), 10).await;

        let err = orchestrator(&db)
            .create_sale(
                request(vec![line(&stocked.id, 4), line(&empty.id, 1)]),
                "cashier",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::NoActiveBatches { .. })));

        assert_eq!(testing::batch(&db, &batch.id).await.quantity_remaining, 10);
        assert_eq!(testing::sequence_value(&db, BILL_NO).await, 0);
    }

    #[tokio::test]
    async fn test_two_lines_same_product_share_reservation() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Cough Syrup").await;
        let a = testing::stock(&db, &product.id, "A", days_from_today(30), 5).await;
        let b = testing::stock(&db, &product.id, "B", days_from_today(60), 5).await;

        let receipt = orchestrator(&db)
            .create_sale(
                request(vec![line(&product.id, 4), line(&product.id, 4)]),
                "cashier",
            )
            .await
            .unwrap();

        assert_eq!(receipt.lines[1].allocations[0].batch_id, a.id);
        assert_eq!(receipt.lines[1].allocations[0].quantity, 1);
        assert_eq!(testing::batch(&db, &a.id).await.quantity_remaining, 0);
        assert_eq!(testing::batch(&db, &b.id).await.quantity_remaining, 2);
    }

    #[tokio::test]
    async fn test_validation_runs_before_anything_else() {
        let db = testing::memory_db().await;
        let sales = orchestrator(&db);

        let err = sales.create_sale(request(vec![]), "cashier").await.unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::EmptySale)));

        let err = sales
            .create_sale(request(vec![line("p-1", 0)]), "cashier")
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::Core(CoreError::InvalidQuantity { quantity: 0 })));
    }

    #[tokio::test]
    async fn test_category_rule_prices_the_line() {
        let db = testing::memory_db().await;
        let product = testing::product(&db, "Cetirizine 10mg").await;
        testing::stock(&db, &product.id, "A", days_from_today(90), 10).await;

        db.pricing_rules()
            .insert(NewPricingRule {
                code: "OTC-10".into(),
                name: "OTC ten percent off MRP".into(),
                applies_to: RuleScope::Category,
                product_id: None,
                category: Some("OTC".into()),
                method: CalculationMethod::DiscountFromMrp,
                margin_bps: None,
                discount_bps: Some(1000),
                fixed_price_cents: None,
                min_quantity: None,
                max_quantity: None,
                valid_from: days_from_today(-1),
                valid_to: None,
                priority: 10,
                status: RuleStatus::Active,
            })
            .await
            .unwrap();

        // net(11.20 @ 12%) = 10.00, less 10% = 9.00
        let mut priced = line(&product.id, 1);
        priced.unit_price_cents = 900;
        let receipt = orchestrator(&db)
            .create_sale(request(vec![priced]), "cashier")
            .await
            .unwrap();
        assert_eq!(receipt.lines[0].rule_applied, "OTC-10");

        // The default price no longer passes
        let err = orchestrator(&db)
            .create_sale(request(vec![line(&product.id, 1)]), "cashier")
            .await
            .unwrap_err();
        assert_eq!(err.category(), rxstock_core::ErrorCategory::Pricing);
    }
}
