//! # Sale Returns
//!
//! Customer returns against an existing sale line, one transaction each.
//!
//! ```text
//! original line (qty 8, snapshot [{A,5},{B,3}])
//!        │
//!        │  return 4
//!        ▼
//! apportion_return → A: ceil(4×5/8)=3, B: min(ceil(4×3/8)=2, 1)=1
//!        │  (later returns apportion the running total and credit only
//!        │   what earlier return lines have not already put back)
//!        ├── credit A +3 (RETURNED)     ledger
//!        ├── credit B +1 (RETURNED)
//!        ├── insert line qty −4, return_of_item_id = original
//!        └── sale status → PARTIALLY_RETURNED / RETURNED
//! ```
//!
//! Lines written before snapshots existed are still returnable: the return
//! line is recorded but no batch can be credited.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use rxstock_core::allocation::{apportion_further_return, encode_snapshot};
use rxstock_core::validation::{validate_quantity, validate_reason};
use rxstock_core::{BatchAllocation, CoreError, Money, MovementType, ReferenceType, SaleItem, SaleStatus};
use rxstock_db::{BatchLedger, Database, MovementSource, SaleStore};

use crate::error::CommerceResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnOutcome {
    /// The new negative-quantity line.
    pub return_item: SaleItem,
    /// Units credited back per batch.
    pub credits: Vec<BatchAllocation>,
    /// False when the original line had no snapshot and no batch was credited.
    pub ledger_credited: bool,
    pub sale_status: SaleStatus,
}

pub struct ReturnDesk {
    db: Database,
}

impl ReturnDesk {
    pub fn new(db: Database) -> Self {
        ReturnDesk { db }
    }

    /// Returns `quantity` units of a sale line.
    ///
    /// ## Errors
    /// * `NotFound` - unknown sale line
    /// * `NotReturnable` - the line is itself a return
    /// * `ReturnExceedsSold` - more than `sold − already returned`
    /// * `LedgerOverflow` - a credit would exceed what the batch received
    pub async fn create_return(
        &self,
        sale_item_id: &str,
        quantity: i64,
        reason: &str,
        actor: &str,
    ) -> CommerceResult<ReturnOutcome> {
        validate_quantity(quantity)?;
        validate_reason("reason", reason)?;

        let mut tx = self.db.begin_serializable().await?;

        let original = SaleStore::get_item(&mut tx, sale_item_id).await?;
        if original.is_return() || original.return_of_item_id.is_some() {
            return Err(CoreError::NotReturnable {
                sale_item_id: sale_item_id.to_string(),
                reason: "line is a return".to_string(),
            }
            .into());
        }

        let already = SaleStore::returned_quantity(&mut tx, sale_item_id).await?;
        let returnable = original.quantity - already;
        if quantity > returnable {
            return Err(CoreError::ReturnExceedsSold {
                sale_item_id: sale_item_id.to_string(),
                requested: quantity,
                returnable,
            }
            .into());
        }

        let credits = match original.allocations()? {
            Some(snapshot) if !snapshot.is_empty() => {
                let credited = credited_so_far(&mut tx, sale_item_id).await?;
                apportion_further_return(&snapshot, &credited, quantity)
            }
            _ => Vec::new(),
        };
        let ledger_credited = !credits.is_empty();

        // Tax is refunded in proportion to the units returned
        let taxable = original.unit_price().multiply_quantity(quantity);
        let tax = Money::from_cents(original.tax_cents)
            .multiply_quantity(quantity)
            .divide_rounded(original.quantity);

        let return_item = SaleItem {
            id: Uuid::new_v4().to_string(),
            sale_id: original.sale_id.clone(),
            product_id: original.product_id.clone(),
            quantity: -quantity,
            unit_price_cents: original.unit_price_cents,
            tax_cents: -tax.cents(),
            line_total_cents: -(taxable + tax).cents(),
            batch_allocations: if ledger_credited {
                Some(encode_snapshot(&credits)?)
            } else {
                None
            },
            batch_number: credits.first().map(|c| c.batch_number.clone()),
            expiry_date: credits.first().map(|c| c.expiry_date),
            return_of_item_id: Some(original.id.clone()),
            return_reason: Some(reason.trim().to_string()),
            created_by: actor.to_string(),
            created_at: Utc::now(),
        };
        SaleStore::insert_item(&mut tx, &return_item).await?;

        if ledger_credited {
            let source = MovementSource::new(ReferenceType::SaleReturn, &return_item.id, actor)
                .with_notes(reason.trim());
            for credit in &credits {
                BatchLedger::credit(&mut tx, &credit.batch_id, credit.quantity, MovementType::Returned, &source)
                    .await?;
            }
        } else {
            warn!(
                sale_item_id = %sale_item_id,
                quantity,
                "Sale line has no allocation snapshot, return recorded without ledger credit"
            );
        }

        let (sold, returned) = SaleStore::quantity_totals(&mut tx, &original.sale_id).await?;
        let sale_status = if returned >= sold {
            SaleStatus::Returned
        } else {
            SaleStatus::PartiallyReturned
        };
        SaleStore::update_status(&mut tx, &original.sale_id, sale_status).await?;

        tx.commit().await?;

        info!(
            sale_id = %original.sale_id,
            sale_item_id = %sale_item_id,
            return_item_id = %return_item.id,
            quantity,
            batches = credits.len(),
            "Return recorded"
        );

        Ok(ReturnOutcome {
            return_item,
            credits,
            ledger_credited,
            sale_status,
        })
    }
}

/// Units each batch already got back from earlier returns of the line.
async fn credited_so_far(conn: &mut SqliteConnection, sale_item_id: &str) -> CommerceResult<HashMap<String, i64>> {
    let mut credited: HashMap<String, i64> = HashMap::new();
    for earlier in SaleStore::returns_of_item(conn, sale_item_id).await? {
        for credit in earlier.allocations()?.unwrap_or_default() {
            *credited.entry(credit.batch_id).or_insert(0) += credit.quantity;
        }
    }
    Ok(credited)
}
